//! Per-table display status
use super::types::{Signature, SnapshotDocument, TimeStamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    New,
    Saved,
    Submitted,
    Approved,
}

impl std::fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DisplayStatus::New => "new",
            DisplayStatus::Saved => "saved",
            DisplayStatus::Submitted => "submitted",
            DisplayStatus::Approved => "approved",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub status: DisplayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<TimeStamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<TimeStamp>,
}

impl StatusInfo {
    fn new(status: DisplayStatus) -> Self {
        Self {
            status,
            submitted_by: None,
            submitted_at: None,
            approved_by: None,
            approved_at: None,
        }
    }
}

fn visible(signature: &Option<Signature>) -> Option<String> {
    signature
        .as_ref()
        .filter(|s| !s.hidden_from_audit)
        .map(|s| s.username.clone())
}

/// Status as shown to users. Writes by hidden-from-audit actors never
/// surface: a hidden submission reads as the draft beneath it.
pub fn derive_status(doc: &SnapshotDocument) -> StatusInfo {
    if let Some(approved) = &doc.approved {
        let mut info = StatusInfo::new(DisplayStatus::Approved);
        info.approved_by = visible(&approved.approved_by);
        info.approved_at = info.approved_by.as_ref().and(approved.approved_at);
        info.submitted_by = visible(&approved.submitted_by);
        info.submitted_at = info.submitted_by.as_ref().and(approved.submitted_at);
        return info;
    }

    if let Some(submitted) = &doc.submitted {
        if let Some(by) = visible(&submitted.submitted_by) {
            let mut info = StatusInfo::new(DisplayStatus::Submitted);
            info.submitted_by = Some(by);
            info.submitted_at = submitted.submitted_at;
            return info;
        }
    }

    if doc.draft.is_some() {
        StatusInfo::new(DisplayStatus::Saved)
    } else {
        StatusInfo::new(DisplayStatus::New)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Payload, TableRef};

    fn signed(username: &str, hidden: bool) -> Payload {
        let mut payload = Payload::new(
            TableRef {
                id: "9".into(),
                name: "9 热力公司表".into(),
            },
            vec![],
        );
        payload.submitted_by = Some(Signature {
            username: username.into(),
            hidden_from_audit: hidden,
        });
        payload.submitted_at = Some(TimeStamp::new_with(2025, 10, 1, 8, 0, 0));
        payload
    }

    #[test]
    fn empty_document_is_new() {
        assert_eq!(derive_status(&SnapshotDocument::default()).status, DisplayStatus::New);
    }

    #[test]
    fn visible_submission_carries_submitter() {
        let doc = SnapshotDocument {
            draft: Some(signed("unit9", false)),
            submitted: Some(signed("unit9", false)),
            ..Default::default()
        };
        let info = derive_status(&doc);
        assert_eq!(info.status, DisplayStatus::Submitted);
        assert_eq!(info.submitted_by.as_deref(), Some("unit9"));
        assert!(info.submitted_at.is_some());
    }

    #[test]
    fn hidden_submission_reads_as_saved_or_new() {
        let doc = SnapshotDocument {
            submitted: Some(signed("ghost", true)),
            ..Default::default()
        };
        assert_eq!(derive_status(&doc).status, DisplayStatus::New);

        let doc = SnapshotDocument {
            draft: Some(signed("unit9", false)),
            submitted: Some(signed("ghost", true)),
            ..Default::default()
        };
        assert_eq!(derive_status(&doc).status, DisplayStatus::Saved);
    }

    #[test]
    fn approval_hides_hidden_submitter_but_keeps_status() {
        let mut approved = signed("ghost", true);
        approved.approved_by = Some(Signature {
            username: "root".into(),
            hidden_from_audit: false,
        });
        approved.approved_at = Some(TimeStamp::new());
        let doc = SnapshotDocument {
            approved: Some(approved),
            ..Default::default()
        };

        let info = derive_status(&doc);
        assert_eq!(info.status, DisplayStatus::Approved);
        assert_eq!(info.approved_by.as_deref(), Some("root"));
        assert!(info.submitted_by.is_none() && info.submitted_at.is_none());
    }
}
