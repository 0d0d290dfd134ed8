//! Engine behaviour against the SQLite store.
//!
//! Covers the properties callers rely on:
//!
//! - optimistic concurrency under racing writers
//! - expiry, grace period and physical purge
//! - child population caps
//! - atomic delete with no residual rows
//! - retention extension cascading to children
//! - ID collision handling

use chrono::{DateTime, Duration, Utc};
use ephemera_core::ids::{IdSource, generate_admin_token, generate_public_id};
use ephemera_core::time::ManualTimeSource;
use ephemera_core::{AppKind, EngineError, NotificationBus, Runtime, SqliteStore};
use std::collections::VecDeque;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

struct Harness {
    runtime: Runtime,
    store: Arc<SqliteStore>,
    clock: Arc<ManualTimeSource>,
}

fn setup() -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().expect("in-memory sqlite"));
    let clock = Arc::new(ManualTimeSource::new(start()));
    let runtime = Runtime::new(store.clone(), Arc::new(NotificationBus::new()))
        .with_clock(clock.clone());
    Harness {
        runtime,
        store,
        clock,
    }
}

/// Hands out queued IDs first, then random ones.
struct ScriptedIds {
    queued: Mutex<VecDeque<String>>,
}

impl ScriptedIds {
    fn new(ids: &[&str]) -> Self {
        Self {
            queued: Mutex::new(ids.iter().map(|id| id.to_string()).collect()),
        }
    }
}

impl IdSource for ScriptedIds {
    fn public_id(&self, length: usize) -> String {
        self.queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| generate_public_id(length))
    }

    fn admin_token(&self) -> String {
        generate_admin_token()
    }
}

#[test]
fn racing_writers_with_the_same_version_have_exactly_one_winner() {
    let h = setup();
    let polls = h.runtime.engine(AppKind::Poll);
    let created = polls.create("v1", None).unwrap();
    let id = created.entity.id.clone();
    let token = created.admin_token.clone();

    const WRITERS: usize = 8;
    const ROUNDS: usize = 5;
    let mut successes = 0;

    for round in 0..ROUNDS {
        let observed = polls.get(&id).unwrap().version;
        let barrier = Arc::new(Barrier::new(WRITERS));
        let handles: Vec<_> = (0..WRITERS)
            .map(|writer| {
                let polls = polls.clone();
                let barrier = barrier.clone();
                let id = id.clone();
                let token = token.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let payload = format!("round {} writer {}", round, writer);
                    polls.update(&id, &token, &payload, Some(observed))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "round {}", round);
        for result in results.iter().filter(|r| r.is_err()) {
            assert_eq!(
                result.as_ref().unwrap_err(),
                &EngineError::Conflict {
                    current_version: observed + 1
                }
            );
        }
        successes += winners;
    }

    assert_eq!(polls.get(&id).unwrap().version, successes as u64 + 1);
}

#[test]
fn unconditional_updates_all_land() {
    let h = setup();
    let lists = h.runtime.engine(AppKind::List);
    let created = lists.create("v1", None).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let lists = lists.clone();
            let id = created.entity.id.clone();
            let token = created.admin_token.clone();
            thread::spawn(move || lists.update(&id, &token, &format!("w{}", writer), None))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert_eq!(lists.get(&created.entity.id).unwrap().version, 5);
}

#[test]
fn fractional_expiry_is_stored_as_reported() {
    let h = setup();
    let notes = h.runtime.engine(AppKind::Note);
    let requested = start() + Duration::days(3) + Duration::milliseconds(500);
    let created = notes.create("secret", Some(requested)).unwrap();

    assert_eq!(created.entity.expires_at, start() + Duration::days(3));
    assert_eq!(notes.get(&created.entity.id).unwrap(), created.entity);
}

#[test]
fn expired_within_grace_then_not_found() {
    let h = setup();
    let notes = h.runtime.engine(AppKind::Note);
    let created = notes.create("secret", None).unwrap();
    let id = &created.entity.id;

    h.clock.advance(Duration::days(30));
    assert!(notes.get(id).is_ok());

    h.clock.advance(Duration::seconds(1));
    assert_eq!(notes.get(id), Err(EngineError::Expired));
    assert_eq!(notes.snapshot(id), Err(EngineError::Expired));

    h.clock.advance(Duration::days(7));
    assert_eq!(notes.get(id), Err(EngineError::NotFound));

    assert_eq!(h.runtime.purge_expired().unwrap(), 1);
    assert_eq!(h.store.row_count(id).unwrap(), 0);
}

#[test]
fn child_cap_is_enforced_and_frees_up_on_removal() {
    let h = setup();
    let quizzes = h.runtime.engine(AppKind::Quiz);
    let quiz = quizzes.create("q", None).unwrap();
    let id = &quiz.entity.id;
    let cap = quizzes.limits().child_cap;

    let mut first = None;
    for n in 0..cap {
        let child = quizzes.add_child(id, &format!("answer {}", n)).unwrap();
        first.get_or_insert(child.id);
    }
    assert_eq!(
        quizzes.add_child(id, "one too many"),
        Err(EngineError::CapacityExceeded { limit: cap })
    );
    assert_eq!(
        quizzes.upsert_participant_child(id, "late", "x"),
        Err(EngineError::CapacityExceeded { limit: cap })
    );

    let first = first.unwrap();
    quizzes.remove_child(id, &quiz.admin_token, &first).unwrap();
    quizzes.add_child(id, "fits again").unwrap();
    assert_eq!(quizzes.list_children(id).unwrap().len(), cap);
}

#[test]
fn delete_leaves_no_rows_behind() {
    let h = setup();
    let groups = h.runtime.engine(AppKind::Group);
    let group = groups.create("trip", None).unwrap();
    let id = &group.entity.id;
    for expense in ["fuel", "food", "tickets"] {
        groups.add_child(id, expense).unwrap();
    }
    // root + 3 index entries + 3 children
    assert_eq!(h.store.row_count(id).unwrap(), 7);

    groups.delete(id, &group.admin_token).unwrap();
    assert_eq!(h.store.row_count(id).unwrap(), 0);
    assert_eq!(groups.list_children(id), Err(EngineError::NotFound));
}

#[test]
fn extend_carries_children_past_the_old_deadline() {
    let h = setup();
    let lists = h.runtime.engine(AppKind::List);
    let list = lists.create("groceries", None).unwrap();
    let id = &list.entity.id;
    lists.add_child(id, "milk").unwrap();
    lists.add_child(id, "eggs").unwrap();

    h.clock.advance(Duration::days(80));
    lists.extend(id, &list.admin_token, 60).unwrap();

    // Original purge deadline was day 97.
    h.clock.advance(Duration::days(20));
    assert_eq!(h.runtime.purge_expired().unwrap(), 0);
    assert_eq!(lists.list_children(id).unwrap().len(), 2);
    assert_eq!(h.store.row_count(id).unwrap(), 5);
}

#[test]
fn poll_scenario() {
    let h = setup();
    let polls = h.runtime.engine(AppKind::Poll);

    let poll = polls.create("P1", None).unwrap();
    assert_eq!(poll.entity.version, 1);
    let id = &poll.entity.id;

    let vote = polls.upsert_participant_child(id, "alice", "V1").unwrap();
    assert_eq!(vote.version, 1);
    let votes = polls.list_children(id).unwrap();
    assert_eq!(votes.len(), 1);

    let revote = polls.upsert_participant_child(id, "alice", "V2").unwrap();
    assert_eq!(revote.id, vote.id);
    assert_eq!(revote.version, 2);
    assert_eq!(polls.list_children(id).unwrap().len(), 1);

    let state = polls.snapshot(id).unwrap();
    assert_eq!(state.entity.payload, "P1");
    assert_eq!(state.children[0].payload, "V2");

    polls.delete(id, &poll.admin_token).unwrap();
    assert_eq!(polls.get(id), Err(EngineError::NotFound));
}

#[test]
fn wrong_token_is_indistinguishable_from_missing() {
    let h = setup();
    let lists = h.runtime.engine(AppKind::List);
    let list = lists.create("x", None).unwrap();
    let other = lists.create("y", None).unwrap();
    let id = &list.entity.id;

    let calls = [
        lists.update(id, &other.admin_token, "z", None).map(|_| ()),
        lists.extend(id, &other.admin_token, 5).map(|_| ()),
        lists.delete(id, &other.admin_token),
    ];
    for result in calls {
        assert_eq!(result, Err(EngineError::NotFound));
    }
    assert_eq!(lists.get(id).unwrap().version, 1);
}

#[test]
fn id_collisions_are_retried() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let ids = Arc::new(ScriptedIds::new(&[
        "AAAAAAAAAA",
        "AAAAAAAAAA",
        "BBBBBBBBBB",
        "CCCCCCCCCCCC",
        "CCCCCCCCCCCC",
        "DDDDDDDDDDDD",
    ]));
    let runtime = Runtime::new(store, Arc::new(NotificationBus::new())).with_ids(ids);
    let lists = runtime.engine(AppKind::List);

    let first = lists.create("one", None).unwrap();
    let second = lists.create("two", None).unwrap();
    assert_eq!(first.entity.id, "AAAAAAAAAA");
    assert_eq!(second.entity.id, "BBBBBBBBBB");

    let a = lists.add_child(&first.entity.id, "a").unwrap();
    let b = lists.add_child(&first.entity.id, "b").unwrap();
    assert_eq!(a.id, "CCCCCCCCCCCC");
    assert_eq!(b.id, "DDDDDDDDDDDD");
}

#[test]
fn persistent_collisions_surface_as_internal() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let ids = Arc::new(ScriptedIds::new(&["EEEEEEEEEE"; 8]));
    let runtime = Runtime::new(store, Arc::new(NotificationBus::new())).with_ids(ids);
    let notes = runtime.engine(AppKind::Note);

    notes.create("one", None).unwrap();
    assert!(matches!(
        notes.create("two", None),
        Err(EngineError::Internal(_))
    ));
}
