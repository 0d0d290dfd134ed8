use crate::engine::{Engine, MAX_ID_ATTEMPTS, MAX_UPDATE_ATTEMPTS};
use crate::error::{EngineError, Result};
use crate::model::Child;
use crate::store::{ChildInsert, Swap};
use crate::validate::{self, MAX_CHILD_PAYLOAD_BYTES};
use tracing::{debug, warn};

impl Engine {
    /// Add an anonymous child under a live parent.
    pub fn add_child(&self, parent_id: &str, payload: &str) -> Result<Child> {
        validate::payload(payload, MAX_CHILD_PAYLOAD_BYTES)?;
        self.load_live(parent_id)?;

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let child = self.new_child(parent_id, None, payload);
            match self.store.insert_child(&child, self.limits.child_cap, self.now())? {
                ChildInsert::Inserted => return Ok(self.child_changed(child)),
                ChildInsert::DuplicateKey => {
                    warn!(parent_id, attempt, "Child id collision, regenerating");
                }
                outcome => return Err(self.insert_failure(outcome)),
            }
        }
        Err(EngineError::Internal(
            "could not allocate a unique child id".to_string(),
        ))
    }

    /// Live children of a live parent, in insertion order.
    pub fn list_children(&self, parent_id: &str) -> Result<Vec<Child>> {
        self.load_live(parent_id)?;
        Ok(self.store.list_children(parent_id, self.now())?)
    }

    /// Replace a child's payload under the same version contract as the root.
    pub fn update_child(
        &self,
        parent_id: &str,
        child_id: &str,
        payload: &str,
        expected_version: Option<u64>,
    ) -> Result<Child> {
        validate::id(child_id, self.limits.child_id_len)?;
        validate::payload(payload, MAX_CHILD_PAYLOAD_BYTES)?;
        self.load_live(parent_id)?;

        let mut observed = self.load_child(parent_id, child_id)?;
        if let Some(expected) = expected_version {
            if observed.version != expected {
                return Err(EngineError::Conflict {
                    current_version: observed.version,
                });
            }
        }

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            match self.store.swap_child_payload(
                parent_id,
                child_id,
                observed.version,
                payload,
                self.now(),
            )? {
                Swap::Applied(child) => return Ok(self.child_changed(child)),
                Swap::VersionMismatch { current } if expected_version.is_some() => {
                    return Err(EngineError::Conflict {
                        current_version: current,
                    });
                }
                Swap::VersionMismatch { .. } => {
                    observed = self.load_child(parent_id, child_id)?;
                }
                Swap::Missing => return Err(EngineError::NotFound),
            }
        }
        Err(EngineError::Conflict {
            current_version: observed.version,
        })
    }

    /// Flip the unencrypted completion flag. The version is left untouched.
    pub fn set_child_completed(
        &self,
        parent_id: &str,
        child_id: &str,
        completed: bool,
    ) -> Result<Child> {
        validate::id(child_id, self.limits.child_id_len)?;
        self.load_live(parent_id)?;
        let child = self
            .store
            .set_child_completed(parent_id, child_id, completed, self.now())?
            .ok_or(EngineError::NotFound)?;
        Ok(self.child_changed(child))
    }

    /// Admin-gated removal of one child.
    pub fn remove_child(&self, parent_id: &str, admin_token: &str, child_id: &str) -> Result<()> {
        validate::id(child_id, self.limits.child_id_len)?;
        self.authorize_admin(parent_id, admin_token)?;
        if !self.store.delete_child(parent_id, child_id)? {
            return Err(EngineError::NotFound);
        }
        debug!(parent_id, child_id, "Removed child");
        self.publish(parent_id);
        Ok(())
    }

    /// Create or overwrite the child owned by `participant`, without the admin
    /// token. Anyone who knows the parent ID may write under any participant
    /// key; only kinds with self-service enabled accept this.
    pub fn upsert_participant_child(
        &self,
        parent_id: &str,
        participant: &str,
        payload: &str,
    ) -> Result<Child> {
        if !self.limits.self_service {
            return Err(EngineError::InvalidArgument(format!(
                "{} do not accept participant records",
                self.kind.as_str()
            )));
        }
        let participant = validate::participant(participant)?;
        validate::payload(payload, MAX_CHILD_PAYLOAD_BYTES)?;
        self.load_live(parent_id)?;

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let now = self.now();
            match self
                .store
                .find_participant_child(parent_id, &participant, now)?
            {
                Some(existing) => {
                    match self.store.swap_child_payload(
                        parent_id,
                        &existing.id,
                        existing.version,
                        payload,
                        now,
                    )? {
                        Swap::Applied(child) => return Ok(self.child_changed(child)),
                        // Raced with another write or a removal; look again.
                        Swap::VersionMismatch { .. } | Swap::Missing => continue,
                    }
                }
                None => {
                    let child = self.new_child(parent_id, Some(participant.clone()), payload);
                    match self.store.insert_child(&child, self.limits.child_cap, now)? {
                        ChildInsert::Inserted => return Ok(self.child_changed(child)),
                        // Either the participant key was claimed concurrently
                        // or the generated ID collided.
                        ChildInsert::DuplicateKey => continue,
                        outcome => return Err(self.insert_failure(outcome)),
                    }
                }
            }
        }
        Err(EngineError::Internal(format!(
            "participant record for {} did not settle",
            parent_id
        )))
    }

    fn load_child(&self, parent_id: &str, child_id: &str) -> Result<Child> {
        self.store
            .load_child(parent_id, child_id, self.now())?
            .ok_or(EngineError::NotFound)
    }

    fn new_child(&self, parent_id: &str, participant: Option<String>, payload: &str) -> Child {
        let now = self.now();
        Child {
            id: self.ids.public_id(self.limits.child_id_len),
            parent_id: parent_id.to_string(),
            participant,
            payload: payload.to_string(),
            completed: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn child_changed(&self, child: Child) -> Child {
        debug!(parent_id = %child.parent_id, child_id = %child.id, version = child.version, "Child written");
        self.publish(&child.parent_id);
        child
    }

    fn insert_failure(&self, outcome: ChildInsert) -> EngineError {
        match outcome {
            ChildInsert::CapacityExceeded => EngineError::CapacityExceeded {
                limit: self.limits.child_cap,
            },
            ChildInsert::ParentMissing => EngineError::NotFound,
            ChildInsert::Inserted | ChildInsert::DuplicateKey => {
                EngineError::Internal(format!("unexpected child insert outcome {:?}", outcome))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::testing::runtime;
    use crate::error::EngineError;
    use crate::kind::AppKind;

    #[test]
    fn test_children_keep_insertion_order() {
        let (runtime, _) = runtime();
        let lists = runtime.engine(AppKind::List);
        let list = lists.create("list", None).unwrap();
        let id = &list.entity.id;

        let milk = lists.add_child(id, "milk").unwrap();
        let eggs = lists.add_child(id, "eggs").unwrap();
        let bread = lists.add_child(id, "bread").unwrap();
        assert_eq!(milk.id.len(), 12);

        let ids: Vec<_> = lists
            .list_children(id)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![milk.id, eggs.id, bread.id]);
    }

    #[test]
    fn test_toggle_does_not_bump_version() {
        let (runtime, _) = runtime();
        let lists = runtime.engine(AppKind::List);
        let list = lists.create("list", None).unwrap();
        let item = lists.add_child(&list.entity.id, "milk").unwrap();

        let done = lists
            .set_child_completed(&list.entity.id, &item.id, true)
            .unwrap();
        assert!(done.completed);
        assert_eq!(done.version, 1);

        let edited = lists
            .update_child(&list.entity.id, &item.id, "oat milk", Some(1))
            .unwrap();
        assert_eq!(edited.version, 2);
        assert!(edited.completed);
        assert_eq!(
            lists.update_child(&list.entity.id, &item.id, "x", Some(1)),
            Err(EngineError::Conflict { current_version: 2 })
        );
        assert_eq!(
            lists.update_child(&list.entity.id, &item.id, "x", Some(0)),
            Err(EngineError::Conflict { current_version: 2 })
        );
    }

    #[test]
    fn test_update_unknown_child_is_not_found() {
        let (runtime, _) = runtime();
        let groups = runtime.engine(AppKind::Group);
        let group = groups.create("g", None).unwrap();
        assert_eq!(
            groups.update_child(&group.entity.id, "222222222222", "x", None),
            Err(EngineError::NotFound)
        );
        assert_eq!(
            groups.set_child_completed(&group.entity.id, "222222222222", true),
            Err(EngineError::NotFound)
        );
    }

    #[test]
    fn test_remove_child_requires_admin_token() {
        let (runtime, _) = runtime();
        let groups = runtime.engine(AppKind::Group);
        let group = groups.create("g", None).unwrap();
        let id = &group.entity.id;
        let expense = groups.add_child(id, "lunch").unwrap();

        assert_eq!(
            groups.remove_child(id, "wrong", &expense.id),
            Err(EngineError::NotFound)
        );
        groups
            .remove_child(id, &group.admin_token, &expense.id)
            .unwrap();
        assert!(groups.list_children(id).unwrap().is_empty());
        assert_eq!(
            groups.remove_child(id, &group.admin_token, &expense.id),
            Err(EngineError::NotFound)
        );
    }

    #[test]
    fn test_participant_upsert_creates_then_updates() {
        let (runtime, _) = runtime();
        let quizzes = runtime.engine(AppKind::Quiz);
        let quiz = quizzes.create("q", None).unwrap();
        let id = &quiz.entity.id;

        let first = quizzes.upsert_participant_child(id, "alice", "A1").unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.participant.as_deref(), Some("alice"));

        let second = quizzes.upsert_participant_child(id, " alice ", "A2").unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.version, 2);
        assert_eq!(second.payload, "A2");

        quizzes.upsert_participant_child(id, "bob", "B1").unwrap();
        assert_eq!(quizzes.list_children(id).unwrap().len(), 2);
    }

    #[test]
    fn test_participant_upsert_needs_self_service_kind() {
        let (runtime, _) = runtime();
        let lists = runtime.engine(AppKind::List);
        let list = lists.create("l", None).unwrap();
        assert!(matches!(
            lists.upsert_participant_child(&list.entity.id, "alice", "x"),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_notes_take_no_children() {
        let (runtime, _) = runtime();
        let notes = runtime.engine(AppKind::Note);
        let note = notes.create("secret", None).unwrap();
        assert_eq!(
            notes.add_child(&note.entity.id, "x"),
            Err(EngineError::CapacityExceeded { limit: 0 })
        );
    }
}
