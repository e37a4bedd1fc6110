//! Append-only audit trail of table transitions
use super::error::StoreError;
use super::types::{Signature, TableId, TableRef, TimeStamp};
use super::utils::{event_key, project_prefix, uuid_to_bech32};
use serde::{Deserialize, Serialize};
use uuid7::uuid7;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    #[n(0)]
    SaveDraft,
    #[n(1)]
    Submit,
    #[n(2)]
    Approve,
    #[n(3)]
    Unapprove,
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HistoryAction::SaveDraft => "save_draft",
            HistoryAction::Submit => "submit",
            HistoryAction::Approve => "approve",
            HistoryAction::Unapprove => "unapprove",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub table_id: TableId,
    #[n(2)]
    pub table_name: String,
    #[n(3)]
    pub action: HistoryAction,
    #[n(4)]
    pub timestamp: TimeStamp,
    #[n(5)]
    pub actor: String,
    #[n(6)]
    pub hidden_from_audit: bool,
}

pub struct HistoryLog {
    events: sled::Tree,
}

impl HistoryLog {
    pub const TREE: &'static str = "history";

    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            events: db.open_tree(Self::TREE)?,
        })
    }

    pub fn record(
        &self,
        project: &str,
        table: &TableRef,
        action: HistoryAction,
        by: &Signature,
    ) -> Result<HistoryEvent, StoreError> {
        let uuid = uuid7();
        let event = HistoryEvent {
            id: uuid_to_bech32("event_", &uuid)
                .map_err(|e| StoreError::EncodeEvent(e.to_string()))?,
            table_id: table.id.clone(),
            table_name: table.name.clone(),
            action,
            timestamp: TimeStamp::new(),
            actor: by.username.clone(),
            hidden_from_audit: by.hidden_from_audit,
        };

        let cbor = minicbor::to_vec(&event).map_err(|e| StoreError::EncodeEvent(e.to_string()))?;
        self.events.insert(event_key(project, &uuid), cbor)?;
        Ok(event)
    }

    /// Visible events of a project, newest first.
    pub fn project_history(&self, project: &str) -> Result<Vec<HistoryEvent>, StoreError> {
        let mut events = Vec::new();
        for entry in self.events.scan_prefix(project_prefix(project)) {
            let (key, bytes) = entry?;
            match minicbor::decode::<HistoryEvent>(&bytes) {
                Ok(event) if !event.hidden_from_audit => events.push(event),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(key = ?key, error = %e, "undecodable history event skipped")
                }
            }
        }
        // keys are in append order; reversing first keeps equal timestamps newest first
        events.reverse();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }

    pub fn table_history(
        &self,
        project: &str,
        table_id: &str,
    ) -> Result<Vec<HistoryEvent>, StoreError> {
        let mut events = self.project_history(project)?;
        events.retain(|e| e.table_id == table_id);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (tempfile::TempDir, HistoryLog) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("history.db")).unwrap();
        (dir, HistoryLog::open(&db).unwrap())
    }

    fn table(id: &str) -> TableRef {
        TableRef {
            id: id.into(),
            name: format!("{id} 表"),
        }
    }

    fn by(username: &str, hidden: bool) -> Signature {
        Signature {
            username: username.into(),
            hidden_from_audit: hidden,
        }
    }

    #[test]
    fn event_encoding() {
        let event = HistoryEvent {
            id: "event_1".into(),
            table_id: "4".into(),
            table_name: "4 表".into(),
            action: HistoryAction::Approve,
            timestamp: TimeStamp::new(),
            actor: "root".into(),
            hidden_from_audit: false,
        };

        let encoding = minicbor::to_vec(&event).unwrap();
        let decode: HistoryEvent = minicbor::decode(&encoding).unwrap();

        assert_eq!(event, decode);
    }

    #[test]
    fn newest_first_and_hidden_dropped() {
        let (_dir, log) = log();

        log.record("heating", &table("4"), HistoryAction::SaveDraft, &by("unit4", false)).unwrap();
        log.record("heating", &table("4"), HistoryAction::Submit, &by("ghost", true)).unwrap();
        log.record("heating", &table("4"), HistoryAction::Approve, &by("root", false)).unwrap();
        log.record("heating", &table("5"), HistoryAction::Submit, &by("unit5", false)).unwrap();

        let events = log.table_history("heating", "4").unwrap();
        let actions: Vec<_> = events.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![HistoryAction::Approve, HistoryAction::SaveDraft]);
        assert!(events.iter().all(|e| e.id.starts_with("event_1")));

        assert_eq!(log.project_history("heating").unwrap().len(), 3);
        assert!(log.project_history("other").unwrap().is_empty());
    }
}
