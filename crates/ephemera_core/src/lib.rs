//! # `ephemera_core`
//!
//! Engine for short-lived, end-to-end-encrypted shared objects.
//!
//! Clients create a root entity (a poll, list, group, quiz or note) holding
//! opaque ciphertext, receive a public ID plus a one-time admin token, and
//! collaborate on it through versioned writes. Every accepted write wakes the
//! entity's live subscribers, which re-read and push the full state.
//!
//! ```no_run
//! use ephemera_core::{AppKind, MemoryStore, NotificationBus, Runtime};
//! use std::sync::Arc;
//!
//! let runtime = Runtime::new(Arc::new(MemoryStore::new()), Arc::new(NotificationBus::new()));
//! let polls = runtime.engine(AppKind::Poll);
//! let created = polls.create("ciphertext", None)?;
//! polls.upsert_participant_child(&created.entity.id, "alice", "vote")?;
//! # Ok::<(), ephemera_core::EngineError>(())
//! ```

pub mod auth;
pub mod bus;
mod child;
pub mod engine;
mod entity;
pub mod error;
pub mod ids;
pub mod kind;
pub mod model;
pub mod store;
pub mod subscription;
pub mod time;
pub mod validate;

pub use bus::NotificationBus;
pub use engine::{Engine, Runtime};
pub use error::EngineError;
pub use kind::AppKind;
pub use model::{Child, Created, Entity, FullState};
pub use store::{MemoryStore, SqliteStore, Store};
pub use subscription::{LiveSnapshots, SnapshotEvent};
