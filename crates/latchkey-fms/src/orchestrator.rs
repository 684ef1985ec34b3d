//! Sync run orchestration.
//!
//! [`SyncOrchestrator::perform_sync`] owns one run end-to-end: single-flight
//! admission, adapter fetch under a timeout, diffing, atomic change
//! persistence, and log finalization. Either all detected changes land
//! together with a completed log, or the run is marked failed with zero
//! changes persisted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{error, info, warn};

use latchkey_core::{FacilityId, SyncLogId, UserId};

use crate::adapter::AdapterRegistry;
use crate::change::{Change, ChangeStore};
use crate::config::{FmsConfigStore, SyncSettings};
use crate::diff::{DiffEngine, ExternalSnapshot};
use crate::directory::DirectoryService;
use crate::error::{FmsError, FmsResult};
use crate::log::{SyncCounts, SyncLogStore};
use crate::mapping::EntityMappingStore;
use crate::types::{ChangeType, TriggeredBy};

/// Per-type change tally returned to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub tenants_added: u32,
    pub tenants_removed: u32,
    pub tenants_updated: u32,
    pub units_added: u32,
    pub units_removed: u32,
    pub units_updated: u32,
}

impl ChangeSummary {
    fn tally(changes: &[Change]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.change_type {
                ChangeType::TenantAdded => summary.tenants_added += 1,
                ChangeType::TenantRemoved => summary.tenants_removed += 1,
                ChangeType::TenantUpdated => summary.tenants_updated += 1,
                ChangeType::UnitAdded => summary.units_added += 1,
                ChangeType::UnitRemoved => summary.units_removed += 1,
                ChangeType::UnitUpdated => summary.units_updated += 1,
            }
        }
        summary
    }
}

/// Result of a completed sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    /// The run's audit log.
    pub sync_log_id: SyncLogId,
    /// Total changes detected.
    pub changes_detected: u32,
    /// Per-type breakdown.
    pub summary: ChangeSummary,
    /// Whether any change needs human review before apply.
    pub requires_review: bool,
}

/// Owns one sync run end-to-end.
pub struct SyncOrchestrator {
    configs: Arc<dyn FmsConfigStore>,
    sync_logs: Arc<dyn SyncLogStore>,
    changes: Arc<dyn ChangeStore>,
    mappings: Arc<dyn EntityMappingStore>,
    directory: Arc<dyn DirectoryService>,
    registry: Arc<AdapterRegistry>,
    settings: SyncSettings,
    diff: DiffEngine,
}

impl SyncOrchestrator {
    /// Create a new orchestrator with injected collaborators.
    pub fn new(
        configs: Arc<dyn FmsConfigStore>,
        sync_logs: Arc<dyn SyncLogStore>,
        changes: Arc<dyn ChangeStore>,
        mappings: Arc<dyn EntityMappingStore>,
        directory: Arc<dyn DirectoryService>,
        registry: Arc<AdapterRegistry>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            configs,
            sync_logs,
            changes,
            mappings,
            directory,
            registry,
            settings,
            diff: DiffEngine::new(),
        }
    }

    /// Execute one sync run for a facility.
    ///
    /// Fails with [`FmsError::Conflict`] if a run is already in flight for
    /// this facility. On provider failure the run is marked failed and no
    /// changes are persisted; a new manual trigger is the only retry path.
    pub async fn perform_sync(
        &self,
        facility_id: FacilityId,
        triggered_by: TriggeredBy,
        actor_id: Option<UserId>,
    ) -> FmsResult<SyncSummary> {
        let config = self
            .configs
            .get_for_facility(facility_id)
            .await?
            .ok_or_else(|| {
                FmsError::configuration(format!(
                    "No FMS configuration for facility {facility_id}"
                ))
            })?;
        if !config.is_enabled {
            return Err(FmsError::configuration(format!(
                "FMS sync is disabled for facility {facility_id}"
            )));
        }

        // Single-flight admission: the store rejects a second running log.
        let log = self
            .sync_logs
            .create_running(facility_id, config.id, triggered_by)
            .await?;

        info!(
            facility_id = %facility_id,
            sync_log_id = %log.id,
            provider = %config.provider_type,
            triggered_by = %triggered_by,
            actor_id = ?actor_id,
            "Started sync run"
        );

        match self.run(log.id, facility_id, &config).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.fail_run(log.id, &e).await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        sync_log_id: SyncLogId,
        facility_id: FacilityId,
        config: &crate::config::FmsConfiguration,
    ) -> FmsResult<SyncSummary> {
        let adapter = self.registry.get(config.provider_type)?;

        let snapshot = ExternalSnapshot {
            tenants: self
                .fetch(adapter.fetch_tenants(config), config.provider_type)
                .await?,
            units: self
                .fetch(adapter.fetch_units(config), config.provider_type)
                .await?,
        };

        let roster = self.directory.facility_roster(facility_id).await?;
        let mappings = self
            .mappings
            .list_for_facility(facility_id, config.provider_type)
            .await?;

        let changes = self
            .diff
            .diff(sync_log_id, &snapshot, &roster, &mappings);

        // Destructive or identity-affecting changes are never auto-applied.
        let requires_review = changes.iter().any(Change::is_security_sensitive);

        self.changes.insert_all(&changes).await?;

        let summary = ChangeSummary::tally(&changes);
        let log = self
            .sync_logs
            .mark_completed(
                sync_log_id,
                SyncCounts::detected(changes.len()),
                requires_review,
            )
            .await?;

        info!(
            facility_id = %facility_id,
            sync_log_id = %log.id,
            changes_detected = changes.len(),
            requires_review,
            "Completed sync run"
        );

        Ok(SyncSummary {
            sync_log_id: log.id,
            changes_detected: changes.len() as u32,
            summary,
            requires_review,
        })
    }

    async fn fetch<F>(
        &self,
        fut: F,
        provider: crate::types::ProviderType,
    ) -> FmsResult<Vec<crate::adapter::ExternalEntity>>
    where
        F: std::future::Future<Output = FmsResult<Vec<crate::adapter::ExternalEntity>>>,
    {
        match timeout(self.settings.adapter_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(FmsError::provider(
                provider,
                format!(
                    "Fetch timed out after {}s",
                    self.settings.adapter_timeout_secs
                ),
            )),
        }
    }

    /// Mark the run failed; the original error wins if finalization also
    /// fails.
    async fn fail_run(&self, sync_log_id: SyncLogId, cause: &FmsError) {
        error!(
            sync_log_id = %sync_log_id,
            error = %cause,
            "Sync run failed"
        );
        if let Err(e) = self
            .sync_logs
            .mark_failed(sync_log_id, &cause.to_string())
            .await
        {
            warn!(
                sync_log_id = %sync_log_id,
                error = %e,
                "Could not finalize failed sync run"
            );
        }
    }
}
