//! Admin capability checks.
//!
//! Tokens are high-entropy, so a single SHA-256 over the raw bytes is enough;
//! no salt or slow hash. Every admin-gated operation goes through
//! [`authorize`], which folds "no such entity" and "wrong token" into one
//! outcome.

use crate::model::Entity;
use sha2::{Digest, Sha256};

/// Outcome of an admin check.
#[derive(Debug)]
pub enum AdminCheck {
    Authorized(Entity),
    NotFoundOrUnauthorized,
}

/// Hash a token for storage (lowercase hex SHA-256).
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Check `candidate` against a stored hash in constant time.
pub fn verify_token(candidate: &str, stored_hash: &str) -> bool {
    constant_time_eq(&hash_token(candidate), stored_hash)
}

/// Authorize an admin operation against an already-loaded entity.
pub fn authorize(found: Option<Entity>, candidate: &str) -> AdminCheck {
    match found {
        Some(entity) if verify_token(candidate, &entity.admin_token_hash) => {
            AdminCheck::Authorized(entity)
        }
        _ => AdminCheck::NotFoundOrUnauthorized,
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
