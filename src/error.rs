use crate::types::TableId;

/// Invalid static configuration. Fatal at startup.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("duplicate project `{0}`")]
    DuplicateProject(String),
    #[error("duplicate table `{0}`")]
    DuplicateTable(TableId),
    #[error("duplicate template `{0}`")]
    DuplicateTemplate(String),
    #[error("table `{table}` references unknown template `{template}`")]
    UnknownTemplate { table: TableId, template: String },
    #[error("table `{parent}` references undefined child `{child}`")]
    DanglingChild { parent: TableId, child: TableId },
    #[error("table hierarchy contains a cycle through {0:?}")]
    Cycle(Vec<TableId>),
    #[error("more than one group root: `{0}` and `{1}`")]
    MultipleGroupRoots(TableId, TableId),
    #[error("group root `{table}` maps column {field} to more than one child")]
    OverlappingColumns { table: TableId, field: u32 },
    #[error("duplicate user `{0}`")]
    DuplicateUser(String),
    #[error("invalid id `{0}`")]
    InvalidId(String),
}

/// Storage failures. Fatal for the triggering request only.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to encode history event: {0}")]
    EncodeEvent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SaveDraft,
    Submit,
    Approve,
    Unapprove,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::SaveDraft => "save a draft of",
            Action::Submit => "submit",
            Action::Approve => "approve",
            Action::Unapprove => "withdraw approval of",
        };
        f.write_str(name)
    }
}

/// A transition or request refused without touching state.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("unknown project `{0}`")]
    UnknownProject(String),
    #[error("unknown table `{0}`")]
    UnknownTable(TableId),
    #[error("principal `{0}` could not be resolved")]
    Unauthenticated(String),
    #[error("`{actor}` is not permitted to {action} table `{table}`")]
    Unauthorized {
        actor: String,
        action: Action,
        table: TableId,
    },
    #[error("table `{0}` has no submitted data")]
    NotSubmitted(TableId),
    #[error("table `{0}` is not approved")]
    NotApproved(TableId),
    #[error("table `{0}` is already approved")]
    AlreadyApproved(TableId),
    #[error("table `{table}` has children awaiting approval: {blocking:?}")]
    ChildrenNotApproved {
        table: TableId,
        blocking: Vec<TableId>,
    },
    #[error("table `{table}` has approved parents: {blocking:?}")]
    ParentsApproved {
        table: TableId,
        blocking: Vec<TableId>,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ServiceError::Rejected(r) => Some(r),
            ServiceError::Store(_) => None,
        }
    }
}
