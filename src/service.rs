//! Service layer API for plan reporting operations
//!
//! Every call is scoped by project id. Writes resolve the acting principal
//! through the identity provider first and are authorized against the
//! project's registry before touching the store.
use super::aggregate::{Aggregator, ViewMode};
use super::approval::{ApprovalMachine, authorize};
use super::config::EngineConfig;
use super::error::{Action, Rejection, ServiceError};
use super::history::{HistoryAction, HistoryEvent, HistoryLog};
use super::identity::{Actor, IdentityProvider};
use super::registry::{Catalog, Registry, TableDef};
use super::status::{StatusInfo, derive_status};
use super::store::SubmissionStore;
use super::types::{
    AggregatedView, Payload, Signature, TableId, TableRef, TimeStamp, Version, WithdrawalMarker,
};
use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

pub struct PlanService {
    instance: Arc<sled::Db>,
    catalog: Catalog,
    identities: Arc<dyn IdentityProvider + Send + Sync>,
    store: SubmissionStore,
    history: HistoryLog,
}

impl PlanService {
    pub fn new(
        instance: Arc<sled::Db>,
        catalog: Catalog,
        identities: Arc<dyn IdentityProvider + Send + Sync>,
    ) -> anyhow::Result<Self> {
        let store = SubmissionStore::open(&instance).context("opening snapshot store")?;
        let history = HistoryLog::open(&instance).context("opening history log")?;
        Ok(Self {
            instance,
            catalog,
            identities,
            store,
            history,
        })
    }

    /// Validate the configuration and open its database.
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let catalog = config.catalog()?;
        let directory = config.directory()?;
        let db = sled::open(&config.data_dir)
            .with_context(|| format!("opening database at {}", config.data_dir.display()))?;
        Self::new(Arc::new(db), catalog, Arc::new(directory))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> anyhow::Result<()> {
        self.instance.flush().context("flushing database")?;
        Ok(())
    }

    fn registry(&self, project: &str) -> Result<&Registry, Rejection> {
        self.catalog
            .get(project)
            .map(Arc::as_ref)
            .ok_or_else(|| Rejection::UnknownProject(project.to_string()))
    }

    fn table<'r>(registry: &'r Registry, table_id: &str) -> Result<&'r TableDef, Rejection> {
        registry
            .resolve(table_id)
            .ok_or_else(|| Rejection::UnknownTable(table_id.to_string()))
    }

    fn actor(&self, principal: &str) -> Result<Actor, Rejection> {
        self.identities
            .resolve(principal)
            .ok_or_else(|| Rejection::Unauthenticated(principal.to_string()))
    }

    // the audit sink must never fail the transition it records
    fn audit(&self, project: &str, table: &TableRef, action: HistoryAction, by: &Signature) {
        if let Err(e) = self.history.record(project, table, action, by) {
            error!(
                project,
                table = %table.id,
                %action,
                error = %e,
                "failed to append history event"
            );
        }
    }

    fn view(
        &self,
        project: &str,
        table_id: &str,
        mode: ViewMode,
    ) -> Result<Option<AggregatedView>, Rejection> {
        let registry = self.registry(project)?;
        let table = Self::table(registry, table_id)?;
        let source = self.store.scoped(project);
        Ok(Aggregator::new(registry, &source).compute_view(&table.id, mode))
    }

    /// Displayed data of a table: submitted data for leaves, rolled up data otherwise.
    pub fn compute_view(
        &self,
        project: &str,
        table_id: &str,
    ) -> Result<Option<AggregatedView>, Rejection> {
        self.view(project, table_id, ViewMode::Authoritative)
    }

    /// As [`Self::compute_view`], but an unsubmitted leaf shows its draft.
    pub fn preview_view(
        &self,
        project: &str,
        table_id: &str,
    ) -> Result<Option<AggregatedView>, Rejection> {
        self.view(project, table_id, ViewMode::Preview)
    }

    fn write(
        &self,
        project: &str,
        table_id: &str,
        principal: &str,
        payload: Payload,
        action: Action,
    ) -> Result<Payload, ServiceError> {
        let registry = self.registry(project)?;
        let table = Self::table(registry, table_id)?;
        let actor = self.actor(principal)?;
        authorize(registry, &actor, action, table)?;

        let mut payload = payload.without_approval();
        payload.table = TableRef {
            id: table.id.clone(),
            name: table.name.clone(),
        };
        for cell in payload.table_data.iter_mut().flat_map(|row| row.values.iter_mut()) {
            cell.issues.clear();
        }

        let (version, history_action) = match action {
            Action::Submit => {
                payload.submitted_at = Some(TimeStamp::new());
                payload.submitted_by = Some(actor.signature());
                (Version::Submitted, HistoryAction::Submit)
            }
            _ => {
                // drafts are unsigned; only submit stamps a signature
                payload.submitted_at = None;
                payload.submitted_by = None;
                (Version::Draft, HistoryAction::SaveDraft)
            }
        };

        self.store.put(project, &table.id, version, payload.clone())?;
        info!(project, table = %table.id, actor = %actor.username, %version, "snapshot stored");
        self.audit(project, &payload.table, history_action, &actor.signature());
        Ok(payload)
    }

    pub fn save_draft(
        &self,
        project: &str,
        table_id: &str,
        principal: &str,
        payload: Payload,
    ) -> Result<Payload, ServiceError> {
        self.write(project, table_id, principal, payload, Action::SaveDraft)
    }

    pub fn submit(
        &self,
        project: &str,
        table_id: &str,
        principal: &str,
        payload: Payload,
    ) -> Result<Payload, ServiceError> {
        self.write(project, table_id, principal, payload, Action::Submit)
    }

    pub fn approve(
        &self,
        project: &str,
        table_id: &str,
        principal: &str,
    ) -> Result<Payload, ServiceError> {
        let registry = self.registry(project)?;
        let actor = self.actor(principal)?;

        let approved = ApprovalMachine::new(registry, &self.store).approve(table_id, &actor)?;
        info!(project, table = %approved.table.id, actor = %actor.username, "table approved");
        self.audit(project, &approved.table, HistoryAction::Approve, &actor.signature());
        Ok(approved)
    }

    pub fn unapprove(
        &self,
        project: &str,
        table_id: &str,
        principal: &str,
    ) -> Result<WithdrawalMarker, ServiceError> {
        let registry = self.registry(project)?;
        let actor = self.actor(principal)?;

        let marker = ApprovalMachine::new(registry, &self.store).unapprove(table_id, &actor)?;
        let table = Self::table(registry, table_id)?;
        info!(project, table = %table.id, actor = %actor.username, "approval withdrawn");
        let table_ref = TableRef {
            id: table.id.clone(),
            name: table.name.clone(),
        };
        self.audit(project, &table_ref, HistoryAction::Unapprove, &marker.withdrawn_by);
        Ok(marker)
    }

    pub fn statuses<S: AsRef<str>>(
        &self,
        project: &str,
        table_ids: &[S],
    ) -> Result<BTreeMap<TableId, StatusInfo>, Rejection> {
        let registry = self.registry(project)?;
        let mut statuses = BTreeMap::new();
        for table_id in table_ids {
            let table = Self::table(registry, table_id.as_ref())?;
            let doc = self.store.document(project, &table.id);
            statuses.insert(table.id.clone(), derive_status(&doc));
        }
        Ok(statuses)
    }

    pub fn history(
        &self,
        project: &str,
        table_id: &str,
    ) -> Result<Vec<HistoryEvent>, ServiceError> {
        let registry = self.registry(project)?;
        let table = Self::table(registry, table_id)?;
        Ok(self.history.table_history(project, &table.id)?)
    }

    pub fn project_history(&self, project: &str) -> Result<Vec<HistoryEvent>, ServiceError> {
        self.registry(project)?;
        Ok(self.history.project_history(project)?)
    }

    /// One stored version, as written.
    pub fn snapshot(
        &self,
        project: &str,
        table_id: &str,
        version: Version,
    ) -> Result<Option<Payload>, Rejection> {
        let registry = self.registry(project)?;
        let table = Self::table(registry, table_id)?;
        Ok(self.store.get(project, &table.id, version))
    }
}
