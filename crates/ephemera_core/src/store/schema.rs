use rusqlite::Connection;

/// SQL schema for root entities, child indexes and children
const SCHEMA: &str = r#"
-- Root entities (one per poll/list/group/quiz/note)
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    admin_token_hash TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    purge_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_purge ON entities(purge_at);

-- Child index: child IDs per parent, in insertion order
CREATE TABLE IF NOT EXISTS child_index (
    parent_id TEXT NOT NULL,
    child_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    purge_at INTEGER NOT NULL,
    PRIMARY KEY (parent_id, child_id)
);

CREATE INDEX IF NOT EXISTS idx_child_index_seq ON child_index(parent_id, seq);
CREATE INDEX IF NOT EXISTS idx_child_index_purge ON child_index(purge_at);

-- Child records (votes, items, expenses, answers)
CREATE TABLE IF NOT EXISTS children (
    parent_id TEXT NOT NULL,
    child_id TEXT NOT NULL,
    participant TEXT,
    payload TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    purge_at INTEGER NOT NULL,
    PRIMARY KEY (parent_id, child_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_children_participant
  ON children(parent_id, participant) WHERE participant IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_children_purge ON children(purge_at);
"#;

/// Initialize the database with the entity schema
pub fn init_database(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
