//! Submission store: one multi-version JSON document per table, kept in sled
use super::aggregate::SnapshotSource;
use super::error::StoreError;
use super::types::{Payload, SnapshotDocument, Version};
use super::utils::document_key;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionResult, TransactionalTree,
    UnabortableTransactionError,
};
use std::cell::RefCell;

pub struct SubmissionStore {
    snapshots: sled::Tree,
}

impl SubmissionStore {
    pub const TREE: &'static str = "snapshots";

    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            snapshots: db.open_tree(Self::TREE)?,
        })
    }

    /// The table's document. Missing, unreadable and corrupt documents are
    /// all empty.
    pub fn document(&self, project: &str, table_id: &str) -> SnapshotDocument {
        let key = document_key(project, table_id);
        match self.snapshots.get(key.as_bytes()) {
            Ok(Some(bytes)) => decode_document(&key, &bytes),
            Ok(None) => SnapshotDocument::default(),
            Err(e) => {
                tracing::warn!(
                    %key,
                    error = %e,
                    "snapshot document unreadable, treating as absent"
                );
                SnapshotDocument::default()
            }
        }
    }

    pub fn get(&self, project: &str, table_id: &str, version: Version) -> Option<Payload> {
        self.document(project, table_id).version(version).cloned()
    }

    /// Replace one version, leaving the others untouched.
    pub fn put(
        &self,
        project: &str,
        table_id: &str,
        version: Version,
        payload: Payload,
    ) -> Result<(), StoreError> {
        self.update(project, table_id, |doc| {
            *doc.version_mut(version) = Some(payload.clone());
            Ok::<_, StoreError>(())
        })
    }

    /// Read-modify-write of the whole document inside one transaction.
    ///
    /// `f` may run more than once when a concurrent writer conflicts, so it
    /// must not have side effects outside the document. An `Err` from `f`
    /// aborts without writing anything.
    pub fn update<T, E, F>(&self, project: &str, table_id: &str, f: F) -> Result<T, E>
    where
        F: Fn(&mut SnapshotDocument) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.update_with(project, table_id, |doc, _| f(doc))
    }

    /// As [`Self::update`], with the project's other documents readable
    /// through [`Neighbours`] in the same transaction. A concurrent write to
    /// any document read there conflicts with this one.
    pub fn update_with<T, E, F>(&self, project: &str, table_id: &str, f: F) -> Result<T, E>
    where
        F: Fn(&mut SnapshotDocument, &Neighbours<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let key = document_key(project, table_id);

        let result: TransactionResult<T, E> = self.snapshots.transaction(|tx| {
            let mut doc = match tx.get(key.as_bytes())? {
                Some(bytes) => decode_document(&key, &bytes),
                None => SnapshotDocument::default(),
            };

            let neighbours = Neighbours {
                tx,
                project,
                failure: RefCell::new(None),
            };
            let out = f(&mut doc, &neighbours);
            // a failed neighbour read must retry or fail the transaction,
            // whatever `f` decided from the empty document it saw
            if let Some(e) = neighbours.failure.take() {
                return Err(e.into());
            }
            let out = out.map_err(ConflictableTransactionError::Abort)?;

            if doc.is_empty() {
                tx.remove(key.as_bytes())?;
            } else {
                let encoded = serde_json::to_vec(&doc).map_err(|e| {
                    ConflictableTransactionError::Abort(E::from(StoreError::from(e)))
                })?;
                tx.insert(key.as_bytes(), encoded)?;
            }
            Ok(out)
        });

        result.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => E::from(StoreError::from(e)),
        })
    }

    /// Read-only view of one project's documents.
    pub fn scoped<'a>(&'a self, project: &'a str) -> ProjectSnapshots<'a> {
        ProjectSnapshots { store: self, project }
    }

    #[cfg(test)]
    fn put_raw(&self, project: &str, table_id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.snapshots.insert(document_key(project, table_id).as_bytes(), bytes)?;
        Ok(())
    }
}

fn decode_document(key: &str, bytes: &[u8]) -> SnapshotDocument {
    serde_json::from_slice(bytes).unwrap_or_else(|e| {
        tracing::warn!(%key, error = %e, "corrupt snapshot document, treating as absent");
        SnapshotDocument::default()
    })
}

/// Documents of one project as seen from inside a running transaction.
pub struct Neighbours<'a> {
    tx: &'a TransactionalTree,
    project: &'a str,
    failure: RefCell<Option<UnabortableTransactionError>>,
}

impl SnapshotSource for Neighbours<'_> {
    fn document(&self, table_id: &str) -> SnapshotDocument {
        let key = document_key(self.project, table_id);
        match self.tx.get(key.as_bytes()) {
            Ok(Some(bytes)) => decode_document(&key, &bytes),
            Ok(None) => SnapshotDocument::default(),
            Err(e) => {
                *self.failure.borrow_mut() = Some(e);
                SnapshotDocument::default()
            }
        }
    }
}

pub struct ProjectSnapshots<'a> {
    store: &'a SubmissionStore,
    project: &'a str,
}

impl SnapshotSource for ProjectSnapshots<'_> {
    fn document(&self, table_id: &str) -> SnapshotDocument {
        self.store.document(self.project, table_id)
    }
}
