use crate::kind::AppKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A root entity (poll, list, group, quiz or note).
///
/// `payload` is ciphertext produced by clients; the engine never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub id: String,
    pub kind: AppKind,
    pub payload: String,
    #[serde(skip_serializing)]
    pub admin_token_hash: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A record scoped to one root entity (a vote, list item, expense or answer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Child {
    pub id: String,
    pub parent_id: String,
    /// Participant key for self-service records, `None` for anonymous adds.
    pub participant: Option<String>,
    pub payload: String,
    /// Unencrypted completion flag; changing it does not bump `version`.
    pub completed: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Root entity plus all of its live children, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullState {
    pub entity: Entity,
    pub children: Vec<Child>,
}

/// Result of `create`. The admin token is only ever returned here.
#[derive(Debug, Clone)]
pub struct Created {
    pub entity: Entity,
    pub admin_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_serialization_hides_token_hash() {
        let now = Utc::now();
        let entity = Entity {
            id: "abcdefghij".to_string(),
            kind: AppKind::Poll,
            payload: "ciphertext".to_string(),
            admin_token_hash: "deadbeef".to_string(),
            version: 1,
            created_at: now,
            updated_at: now,
            expires_at: now,
        };

        let json = serde_json::to_value(&entity).unwrap();
        assert!(json.get("admin_token_hash").is_none());
        assert_eq!(json["kind"], "polls");
        assert_eq!(json["payload"], "ciphertext");
        assert_eq!(json["version"], 1);
    }
}
