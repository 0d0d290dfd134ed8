//! Public identifiers and admin capability tokens.

use base64::Engine as _;
use rand::Rng;

/// Symbols used for public IDs. Excludes `0`, `O`, `1`, `I` and `l`.
pub const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Length of every root entity ID.
pub const ROOT_ID_LEN: usize = 10;

/// Random bytes behind each admin token (encodes to 64 characters).
pub const ADMIN_TOKEN_BYTES: usize = 48;

/// Draw `length` symbols uniformly from [`ALPHABET`].
pub fn generate_public_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Generate a URL-safe admin capability token.
pub fn generate_admin_token() -> String {
    let mut bytes = [0u8; ADMIN_TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes[..]);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Check that `candidate` has exactly `length` symbols, all from [`ALPHABET`].
pub fn is_public_id(candidate: &str, length: usize) -> bool {
    candidate.len() == length && candidate.bytes().all(|b| ALPHABET.contains(&b))
}

/// Source of identifiers used by the engine.
///
/// Production code uses [`RandomIds`]; tests substitute a scripted source to
/// force key collisions.
pub trait IdSource: Send + Sync {
    fn public_id(&self, length: usize) -> String;

    fn admin_token(&self) -> String;
}

/// Cryptographically random identifiers (thread-local CSPRNG).
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn public_id(&self, length: usize) -> String {
        generate_public_id(length)
    }

    fn admin_token(&self) -> String {
        generate_admin_token()
    }
}
