use super::{BackendError, ChildInsert, Store, Swap, init_database};
use crate::kind::AppKind;
use crate::model::{Child, Entity};
use crate::time::timestamp_to_datetime;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::sync::{Arc, Mutex};

const ENTITY_COLUMNS: &str =
    "id, kind, payload, admin_token_hash, version, created_at, updated_at, expires_at";

const CHILD_COLUMNS: &str =
    "parent_id, child_id, participant, payload, completed, version, created_at, updated_at";

const JOINED_CHILD_COLUMNS: &str = "c.parent_id, c.child_id, c.participant, c.payload, \
     c.completed, c.version, c.created_at, c.updated_at";

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a new SqliteStore with the given (already initialized) connection
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Open a fresh in-memory database with the schema applied.
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        init_database(&conn)?;
        Ok(Self::new(conn))
    }

    /// Number of stored rows belonging to an entity across all tables,
    /// ignoring purge deadlines.
    pub fn row_count(&self, entity_id: &str) -> Result<usize, BackendError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM entities WHERE id = ?1)
                  + (SELECT COUNT(*) FROM child_index WHERE parent_id = ?1)
                  + (SELECT COUNT(*) FROM children WHERE parent_id = ?1)",
            [entity_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl Store for SqliteStore {
    fn insert_entity(&self, entity: &Entity, purge_at: DateTime<Utc>) -> Result<(), BackendError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO entities (id, kind, payload, admin_token_hash, version, created_at, updated_at, expires_at, purge_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entity.id,
                entity.kind.as_str(),
                entity.payload,
                entity.admin_token_hash,
                entity.version as i64,
                entity.created_at.timestamp(),
                entity.updated_at.timestamp(),
                entity.expires_at.timestamp(),
                purge_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    fn load_entity(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Entity>, BackendError> {
        let conn = self.conn.lock().unwrap();
        let entity = conn
            .query_row(
                &format!(
                    "SELECT {} FROM entities WHERE id = ? AND purge_at > ?",
                    ENTITY_COLUMNS
                ),
                params![id, now.timestamp()],
                entity_from_row,
            )
            .optional()?;
        Ok(entity)
    }

    fn swap_entity_payload(
        &self,
        id: &str,
        expected_version: u64,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<Swap<Entity>, BackendError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM entities WHERE id = ? AND purge_at > ?",
                params![id, now.timestamp()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(Swap::Missing);
        };
        if current as u64 != expected_version {
            return Ok(Swap::VersionMismatch {
                current: current as u64,
            });
        }

        tx.execute(
            "UPDATE entities SET payload = ?, version = version + 1, updated_at = ?
             WHERE id = ? AND version = ?",
            params![payload, now.timestamp(), id, expected_version as i64],
        )?;
        let entity = tx.query_row(
            &format!("SELECT {} FROM entities WHERE id = ?", ENTITY_COLUMNS),
            [id],
            entity_from_row,
        )?;
        tx.commit()?;
        Ok(Swap::Applied(entity))
    }

    fn set_entity_expiry(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        purge_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Entity>, BackendError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE entities SET expires_at = ?, purge_at = ?, updated_at = ?
             WHERE id = ? AND purge_at > ?",
            params![
                expires_at.timestamp(),
                purge_at.timestamp(),
                now.timestamp(),
                id,
                now.timestamp()
            ],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        tx.execute(
            "UPDATE child_index SET purge_at = ? WHERE parent_id = ?",
            params![purge_at.timestamp(), id],
        )?;
        tx.execute(
            "UPDATE children SET purge_at = ? WHERE parent_id = ?",
            params![purge_at.timestamp(), id],
        )?;
        let entity = tx.query_row(
            &format!("SELECT {} FROM entities WHERE id = ?", ENTITY_COLUMNS),
            [id],
            entity_from_row,
        )?;
        tx.commit()?;
        Ok(Some(entity))
    }

    fn delete_entity(&self, id: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM children WHERE parent_id = ?", [id])?;
        tx.execute("DELETE FROM child_index WHERE parent_id = ?", [id])?;
        let deleted = tx.execute("DELETE FROM entities WHERE id = ?", [id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn insert_child(
        &self,
        child: &Child,
        cap: usize,
        now: DateTime<Utc>,
    ) -> Result<ChildInsert, BackendError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now_ts = now.timestamp();

        let parent_purge_at: Option<i64> = tx
            .query_row(
                "SELECT purge_at FROM entities WHERE id = ? AND purge_at > ?",
                params![child.parent_id, now_ts],
                |row| row.get(0),
            )
            .optional()?;
        let Some(purge_at) = parent_purge_at else {
            return Ok(ChildInsert::ParentMissing);
        };

        let live: i64 = tx.query_row(
            "SELECT COUNT(*) FROM child_index WHERE parent_id = ? AND purge_at > ?",
            params![child.parent_id, now_ts],
            |row| row.get(0),
        )?;
        if live as usize >= cap {
            return Ok(ChildInsert::CapacityExceeded);
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM child_index WHERE parent_id = ?",
            [&child.parent_id],
            |row| row.get(0),
        )?;

        let inserted = tx.execute(
            "INSERT INTO children (parent_id, child_id, participant, payload, completed, version, created_at, updated_at, purge_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                child.parent_id,
                child.id,
                child.participant,
                child.payload,
                child.completed,
                child.version as i64,
                child.created_at.timestamp(),
                child.updated_at.timestamp(),
                purge_at,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => return Ok(ChildInsert::DuplicateKey),
            Err(err) => return Err(err.into()),
        }

        let indexed = tx.execute(
            "INSERT INTO child_index (parent_id, child_id, seq, purge_at) VALUES (?, ?, ?, ?)",
            params![child.parent_id, child.id, seq, purge_at],
        );
        match indexed {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => return Ok(ChildInsert::DuplicateKey),
            Err(err) => return Err(err.into()),
        }

        tx.commit()?;
        Ok(ChildInsert::Inserted)
    }

    fn load_child(
        &self,
        parent_id: &str,
        child_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Child>, BackendError> {
        let conn = self.conn.lock().unwrap();
        let child = conn
            .query_row(
                &format!(
                    "SELECT {} FROM children WHERE parent_id = ? AND child_id = ? AND purge_at > ?",
                    CHILD_COLUMNS
                ),
                params![parent_id, child_id, now.timestamp()],
                child_from_row,
            )
            .optional()?;
        Ok(child)
    }

    fn find_participant_child(
        &self,
        parent_id: &str,
        participant: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Child>, BackendError> {
        let conn = self.conn.lock().unwrap();
        let child = conn
            .query_row(
                &format!(
                    "SELECT {} FROM children WHERE parent_id = ? AND participant = ? AND purge_at > ?",
                    CHILD_COLUMNS
                ),
                params![parent_id, participant, now.timestamp()],
                child_from_row,
            )
            .optional()?;
        Ok(child)
    }

    fn list_children(
        &self,
        parent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Child>, BackendError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM child_index i
             JOIN children c ON c.parent_id = i.parent_id AND c.child_id = i.child_id
             WHERE i.parent_id = ? AND i.purge_at > ?
             ORDER BY i.seq",
            JOINED_CHILD_COLUMNS
        ))?;
        let children = stmt
            .query_map(params![parent_id, now.timestamp()], child_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(children)
    }

    fn swap_child_payload(
        &self,
        parent_id: &str,
        child_id: &str,
        expected_version: u64,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<Swap<Child>, BackendError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM children WHERE parent_id = ? AND child_id = ? AND purge_at > ?",
                params![parent_id, child_id, now.timestamp()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(Swap::Missing);
        };
        if current as u64 != expected_version {
            return Ok(Swap::VersionMismatch {
                current: current as u64,
            });
        }

        tx.execute(
            "UPDATE children SET payload = ?, version = version + 1, updated_at = ?
             WHERE parent_id = ? AND child_id = ? AND version = ?",
            params![
                payload,
                now.timestamp(),
                parent_id,
                child_id,
                expected_version as i64
            ],
        )?;
        let child = tx.query_row(
            &format!(
                "SELECT {} FROM children WHERE parent_id = ? AND child_id = ?",
                CHILD_COLUMNS
            ),
            params![parent_id, child_id],
            child_from_row,
        )?;
        tx.commit()?;
        Ok(Swap::Applied(child))
    }

    fn set_child_completed(
        &self,
        parent_id: &str,
        child_id: &str,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Child>, BackendError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE children SET completed = ?, updated_at = ?
             WHERE parent_id = ? AND child_id = ? AND purge_at > ?",
            params![
                completed,
                now.timestamp(),
                parent_id,
                child_id,
                now.timestamp()
            ],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let child = tx.query_row(
            &format!(
                "SELECT {} FROM children WHERE parent_id = ? AND child_id = ?",
                CHILD_COLUMNS
            ),
            params![parent_id, child_id],
            child_from_row,
        )?;
        tx.commit()?;
        Ok(Some(child))
    }

    fn delete_child(&self, parent_id: &str, child_id: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM child_index WHERE parent_id = ? AND child_id = ?",
            params![parent_id, child_id],
        )?;
        let deleted = tx.execute(
            "DELETE FROM children WHERE parent_id = ? AND child_id = ?",
            params![parent_id, child_id],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, BackendError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now_ts = now.timestamp();
        tx.execute("DELETE FROM children WHERE purge_at <= ?", [now_ts])?;
        tx.execute("DELETE FROM child_index WHERE purge_at <= ?", [now_ts])?;
        let purged = tx.execute("DELETE FROM entities WHERE purge_at <= ?", [now_ts])?;
        tx.commit()?;
        Ok(purged)
    }

    fn ping(&self) -> Result<(), BackendError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

// ===== Row mapping =====
//
// These two functions are the only code that interprets raw columns.

fn entity_from_row(row: &Row) -> rusqlite::Result<Entity> {
    let kind_tag: String = row.get(1)?;
    let kind = AppKind::parse(&kind_tag)
        .ok_or_else(|| conversion_error(1, Type::Text, format!("unknown kind {:?}", kind_tag)))?;
    Ok(Entity {
        id: row.get(0)?,
        kind,
        payload: row.get(2)?,
        admin_token_hash: row.get(3)?,
        version: version_column(row, 4)?,
        created_at: datetime_column(row, 5)?,
        updated_at: datetime_column(row, 6)?,
        expires_at: datetime_column(row, 7)?,
    })
}

fn child_from_row(row: &Row) -> rusqlite::Result<Child> {
    Ok(Child {
        parent_id: row.get(0)?,
        id: row.get(1)?,
        participant: row.get(2)?,
        payload: row.get(3)?,
        completed: row.get(4)?,
        version: version_column(row, 5)?,
        created_at: datetime_column(row, 6)?,
        updated_at: datetime_column(row, 7)?,
    })
}

fn version_column(row: &Row, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw)
        .ok()
        .filter(|v| *v >= 1)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("invalid version {}", raw)))
}

fn datetime_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: i64 = row.get(idx)?;
    timestamp_to_datetime(raw)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("invalid timestamp {}", raw)))
}

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
}
