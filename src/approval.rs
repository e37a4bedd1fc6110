//! Approval state machine
//!
//! `Unsubmitted -> Submitted -> Approved`, and back to `Submitted` on
//! withdrawal. Each transition is a single transaction: the hierarchy check
//! reads the neighbouring documents in the same transaction that rewrites
//! the target, so an approval and a withdrawal one level apart serialize.
use super::aggregate::SnapshotSource;
use super::error::{Action, Rejection, ServiceError, StoreError};
use super::identity::{Actor, Role};
use super::registry::{Registry, TableDef};
use super::store::SubmissionStore;
use super::types::{Payload, SnapshotDocument, TableId, TimeStamp, WithdrawalMarker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Unsubmitted,
    Submitted,
    Approved,
}

impl ApprovalState {
    pub fn of(doc: &SnapshotDocument) -> Self {
        if doc.approved.is_some() {
            ApprovalState::Approved
        } else if doc.submitted.is_some() {
            ApprovalState::Submitted
        } else {
            ApprovalState::Unsubmitted
        }
    }
}

/// Role-and-scope check shared by every mutating operation.
pub fn authorize(
    registry: &Registry,
    actor: &Actor,
    action: Action,
    table: &TableDef,
) -> Result<(), Rejection> {
    let allowed = match actor.role {
        Role::Top => true,
        Role::Unit => {
            action != Action::Unapprove && actor.unit.is_some() && table.unit == actor.unit
        }
        Role::Regional => match (action, actor.region.as_deref()) {
            (_, None) => false,
            (Action::Approve, Some(region)) => {
                !table.is_leaf() && table.region.as_deref() == Some(region)
            }
            (_, Some(region)) => registry.region_scope(region).contains(&table.id),
        },
    };

    if allowed {
        Ok(())
    } else {
        Err(Rejection::Unauthorized {
            actor: actor.username.clone(),
            action,
            table: table.id.clone(),
        })
    }
}

pub struct ApprovalMachine<'a> {
    registry: &'a Registry,
    store: &'a SubmissionStore,
}

impl<'a> ApprovalMachine<'a> {
    pub fn new(registry: &'a Registry, store: &'a SubmissionStore) -> Self {
        Self { registry, store }
    }

    fn table(&self, table_id: &str) -> Result<&'a TableDef, Rejection> {
        self.registry
            .resolve(table_id)
            .ok_or_else(|| Rejection::UnknownTable(table_id.to_string()))
    }

    /// Copy `submitted` into `approved`. Every direct child must already be
    /// approved.
    pub fn approve(&self, table_id: &str, actor: &Actor) -> Result<Payload, ServiceError> {
        let table = self.table(table_id)?;
        authorize(self.registry, actor, Action::Approve, table)?;

        let now = TimeStamp::new();
        let signature = actor.signature();
        let project = self.registry.project();
        self.store
            .update_with(project, &table.id, |doc, neighbours| -> Result<Payload, ServiceError> {
                let blocking = approved_among(neighbours, table.children(), false);
                if !blocking.is_empty() {
                    return Err(Rejection::ChildrenNotApproved {
                        table: table.id.clone(),
                        blocking,
                    }
                    .into());
                }

                let submitted = match (ApprovalState::of(doc), &doc.submitted) {
                    (ApprovalState::Approved, _) => {
                        return Err(Rejection::AlreadyApproved(table.id.clone()).into());
                    }
                    (_, None) => return Err(Rejection::NotSubmitted(table.id.clone()).into()),
                    (_, Some(submitted)) => submitted,
                };

                let mut approved = submitted.clone().without_approval();
                approved.approved_at = Some(now);
                approved.approved_by = Some(signature.clone());
                approved.approval_digest = Some(approved.digest().map_err(StoreError::from)?);

                doc.approved = Some(approved.clone());
                Ok(approved)
            })
    }

    /// Remove `approved`. Refused while any direct parent is approved.
    pub fn unapprove(
        &self,
        table_id: &str,
        actor: &Actor,
    ) -> Result<WithdrawalMarker, ServiceError> {
        let table = self.table(table_id)?;
        authorize(self.registry, actor, Action::Unapprove, table)?;

        let parents = self.registry.parents(&table.id);
        let marker = WithdrawalMarker {
            withdrawn_at: TimeStamp::new(),
            withdrawn_by: actor.signature(),
        };
        let project = self.registry.project();
        self.store.update_with(
            project,
            &table.id,
            |doc, neighbours| -> Result<WithdrawalMarker, ServiceError> {
                let blocking = approved_among(neighbours, parents.iter().map(String::as_str), true);
                if !blocking.is_empty() {
                    return Err(Rejection::ParentsApproved {
                        table: table.id.clone(),
                        blocking,
                    }
                    .into());
                }

                let Some(approved) = doc.approved.take() else {
                    return Err(Rejection::NotApproved(table.id.clone()).into());
                };
                if doc.submitted.is_none() {
                    doc.submitted = Some(approved.without_approval());
                }
                doc.withdrawal = Some(marker.clone());
                Ok(marker.clone())
            },
        )
    }
}

/// The tables among `ids` whose approval state is `approved`.
fn approved_among<'t>(
    source: &impl SnapshotSource,
    ids: impl IntoIterator<Item = &'t str>,
    approved: bool,
) -> Vec<TableId> {
    ids.into_iter()
        .filter(|id| source.document(id).is_approved() == approved)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RollupPolicy, Template};
    use crate::types::{Cell, Row, TableRef, Version};

    fn registry() -> Registry {
        Registry::new(
            "heating",
            vec![Template {
                name: "subsidiary".into(),
                ..Template::default()
            }],
            vec![
                TableDef::summary("1", "group", "subsidiary", &["2", "3"], RollupPolicy::Approved),
                TableDef::summary("2", "downtown", "subsidiary", &["4"], RollupPolicy::Submitted)
                    .in_region("downtown"),
                TableDef::leaf("3", "beihai", "subsidiary").owned_by_unit("beihai"),
                TableDef::leaf("4", "plant", "subsidiary").owned_by_unit("plant"),
            ],
        )
        .unwrap()
    }

    fn payload(id: &str) -> Payload {
        Payload::new(
            TableRef {
                id: id.into(),
                name: id.into(),
            },
            vec![Row::new(6, vec![Cell::new(1003, 10.0)])],
        )
    }

    fn store() -> (tempfile::TempDir, SubmissionStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("approval.db")).unwrap();
        (dir, SubmissionStore::open(&db).unwrap())
    }

    #[test]
    fn authorization_matrix() {
        let registry = registry();
        let top = Actor::new("root", Role::Top);
        let regional = Actor::new("zc", Role::Regional).with_region("downtown");
        let unit = Actor::new("bh", Role::Unit).with_unit("beihai");
        let table = |id| registry.resolve(id).unwrap();

        assert!(authorize(&registry, &top, Action::Unapprove, table("1")).is_ok());

        assert!(authorize(&registry, &regional, Action::Approve, table("2")).is_ok());
        // leaves are approved by their unit, not the region
        assert!(authorize(&registry, &regional, Action::Approve, table("4")).is_err());
        assert!(authorize(&registry, &regional, Action::Unapprove, table("4")).is_ok());
        assert!(authorize(&registry, &regional, Action::Submit, table("4")).is_ok());
        assert!(authorize(&registry, &regional, Action::Submit, table("3")).is_err());
        assert!(authorize(&registry, &regional, Action::Unapprove, table("3")).is_err());

        assert!(authorize(&registry, &unit, Action::Approve, table("3")).is_ok());
        assert!(authorize(&registry, &unit, Action::SaveDraft, table("3")).is_ok());
        assert!(authorize(&registry, &unit, Action::Unapprove, table("3")).is_err());
        assert!(authorize(&registry, &unit, Action::Approve, table("4")).is_err());

        let homeless = Actor::new("nobody", Role::Unit);
        assert!(authorize(&registry, &homeless, Action::Submit, table("3")).is_err());
    }

    #[test]
    fn approve_requires_submission_and_children() {
        let registry = registry();
        let (_dir, store) = store();
        let machine = ApprovalMachine::new(&registry, &store);
        let root = Actor::new("root", Role::Top);

        let err = machine.approve("4", &root).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::NotSubmitted("4".into())));

        store.put("heating", "4", Version::Submitted, payload("4")).unwrap();
        let approved = machine.approve("4", &root).unwrap();
        assert_eq!(approved.approved_by.as_ref().unwrap().username, "root");
        assert_eq!(approved.approval_digest, Some(approved.digest().unwrap()));

        let err = machine.approve("4", &root).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::AlreadyApproved("4".into())));

        let err = machine.approve("1", &root).unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&Rejection::ChildrenNotApproved {
                table: "1".into(),
                blocking: vec!["2".into(), "3".into()],
            })
        );
    }

    #[test]
    fn unapprove_restores_submitted_and_marks_withdrawal() {
        let registry = registry();
        let (_dir, store) = store();
        let machine = ApprovalMachine::new(&registry, &store);
        let root = Actor::new("root", Role::Top);

        store.put("heating", "3", Version::Submitted, payload("3")).unwrap();
        machine.approve("3", &root).unwrap();
        store
            .update("heating", "3", |doc| {
                doc.submitted = None;
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let marker = machine.unapprove("3", &root).unwrap();
        let doc = store.document("heating", "3");

        assert_eq!(ApprovalState::of(&doc), ApprovalState::Submitted);
        assert_eq!(doc.withdrawal, Some(marker));
        let restored = doc.submitted.unwrap();
        assert!(restored.approved_by.is_none() && restored.approval_digest.is_none());
        assert_eq!(restored.table_data, payload("3").table_data);
    }

    #[test]
    fn unapprove_blocked_by_approved_parent() {
        let registry = registry();
        let (_dir, store) = store();
        let machine = ApprovalMachine::new(&registry, &store);
        let root = Actor::new("root", Role::Top);

        for id in ["4", "2"] {
            store.put("heating", id, Version::Submitted, payload(id)).unwrap();
            machine.approve(id, &root).unwrap();
        }

        let err = machine.unapprove("4", &root).unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&Rejection::ParentsApproved {
                table: "4".into(),
                blocking: vec!["2".into()],
            })
        );
        assert!(store.document("heating", "4").is_approved());

        machine.unapprove("2", &root).unwrap();
        machine.unapprove("4", &root).unwrap();
        let err = machine.unapprove("4", &root).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::NotApproved("4".into())));
    }

    #[test]
    fn parent_never_stays_approved_over_withdrawn_child() {
        let registry = registry();
        let (_dir, store) = store();
        let root = Actor::new("root", Role::Top);

        for id in ["4", "2"] {
            store.put("heating", id, Version::Submitted, payload(id)).unwrap();
        }
        ApprovalMachine::new(&registry, &store).approve("4", &root).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                let machine = ApprovalMachine::new(&registry, &store);
                for _ in 0..50 {
                    let _ = machine.unapprove("2", &root);
                    let _ = machine.approve("2", &root);
                }
            });
            s.spawn(|| {
                let machine = ApprovalMachine::new(&registry, &store);
                for _ in 0..50 {
                    let _ = machine.approve("4", &root);
                    let _ = machine.unapprove("4", &root);
                }
            });
        });

        if store.document("heating", "2").is_approved() {
            assert!(store.document("heating", "4").is_approved());
        }
    }
}
