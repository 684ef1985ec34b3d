//! Facility-scoped service facade.
//!
//! The HTTP and auth layers hand this facade an already-authenticated
//! [`AuthContext`] and already-parsed identifiers. Every operation follows
//! the same order: request validation, then existence, then authorization —
//! so a missing field can never leak whether a resource exists, and an
//! authorization failure never names the owning facility.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use latchkey_core::{ChangeId, FacilityId, SyncLogId, UserId};

use crate::apply::{ApplyEngine, ApplyOutcome, RemovalOutcome};
use crate::change::Change;
use crate::config::SyncSettings;
use crate::error::{FmsError, FmsResult};
use crate::log::{SyncLog, SyncLogStore};
use crate::orchestrator::{SyncOrchestrator, SyncSummary};
use crate::review::{BulkReviewOutcome, ReviewService};
use crate::types::TriggeredBy;

/// Role of the calling actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// May operate on any facility.
    GlobalAdmin,
    /// Restricted to an explicit set of facilities.
    FacilityAdmin,
}

/// Authenticated caller context supplied by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The calling user.
    pub actor_id: UserId,
    /// The caller's role.
    pub role: ActorRole,
    /// Facilities a facility admin may operate on. Ignored for global
    /// admins.
    pub accessible_facilities: HashSet<FacilityId>,
}

impl AuthContext {
    /// Context for a global administrator.
    #[must_use]
    pub fn global_admin(actor_id: UserId) -> Self {
        Self {
            actor_id,
            role: ActorRole::GlobalAdmin,
            accessible_facilities: HashSet::new(),
        }
    }

    /// Context for a facility-scoped administrator.
    #[must_use]
    pub fn facility_admin(
        actor_id: UserId,
        facilities: impl IntoIterator<Item = FacilityId>,
    ) -> Self {
        Self {
            actor_id,
            role: ActorRole::FacilityAdmin,
            accessible_facilities: facilities.into_iter().collect(),
        }
    }

    /// Whether the caller may operate on a facility.
    #[must_use]
    pub fn can_access(&self, facility_id: FacilityId) -> bool {
        match self.role {
            ActorRole::GlobalAdmin => true,
            ActorRole::FacilityAdmin => self.accessible_facilities.contains(&facility_id),
        }
    }
}

/// Body of a review request.
///
/// `sync_log_id` is optional at the wire level so its absence surfaces as a
/// validation error naming the field, not a deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRequest {
    /// The run whose changes are being reviewed.
    pub sync_log_id: Option<SyncLogId>,
    /// Changes to decide.
    #[serde(default)]
    pub change_ids: Vec<ChangeId>,
    /// The decision to record for every id.
    pub accepted: bool,
}

/// Body of an apply request.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyRequest {
    /// The run whose changes are being applied.
    pub sync_log_id: Option<SyncLogId>,
    /// Changes to apply.
    #[serde(default)]
    pub change_ids: Vec<ChangeId>,
}

fn require_log_id(sync_log_id: Option<SyncLogId>) -> FmsResult<SyncLogId> {
    sync_log_id.ok_or_else(|| FmsError::validation("sync_log_id"))
}

fn require_change_ids(change_ids: &[ChangeId]) -> FmsResult<()> {
    if change_ids.is_empty() {
        return Err(FmsError::validation("change_ids"));
    }
    Ok(())
}

/// Entry point for the HTTP/auth layer.
///
/// Constructed with explicit collaborators; holds no process-wide state.
pub struct FmsService {
    orchestrator: SyncOrchestrator,
    review: ReviewService,
    apply: ApplyEngine,
    sync_logs: Arc<dyn SyncLogStore>,
    settings: SyncSettings,
}

impl FmsService {
    /// Create a new service facade.
    pub fn new(
        orchestrator: SyncOrchestrator,
        review: ReviewService,
        apply: ApplyEngine,
        sync_logs: Arc<dyn SyncLogStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            orchestrator,
            review,
            apply,
            sync_logs,
            settings,
        }
    }

    /// Trigger a manual sync run for a facility.
    pub async fn trigger_sync(
        &self,
        auth: &AuthContext,
        facility_id: FacilityId,
    ) -> FmsResult<SyncSummary> {
        if !auth.can_access(facility_id) {
            return Err(FmsError::Authorization);
        }
        self.orchestrator
            .perform_sync(facility_id, TriggeredBy::Manual, Some(auth.actor_id))
            .await
    }

    /// Paginated sync history for a facility, newest first. Pages are
    /// zero-based.
    pub async fn sync_history(
        &self,
        auth: &AuthContext,
        facility_id: FacilityId,
        page: u32,
    ) -> FmsResult<Vec<SyncLog>> {
        if !auth.can_access(facility_id) {
            return Err(FmsError::Authorization);
        }
        let limit = self.settings.history_page_size;
        self.sync_logs
            .list_for_facility(facility_id, limit, page * limit)
            .await
    }

    /// Pending (unreviewed) changes for a run.
    pub async fn pending_changes(
        &self,
        auth: &AuthContext,
        sync_log_id: SyncLogId,
    ) -> FmsResult<Vec<Change>> {
        self.resolve_log(auth, sync_log_id).await?;
        self.review.pending_changes(sync_log_id).await
    }

    /// Review a batch of changes belonging to one run.
    pub async fn review_changes(
        &self,
        auth: &AuthContext,
        request: ReviewRequest,
    ) -> FmsResult<BulkReviewOutcome> {
        let sync_log_id = require_log_id(request.sync_log_id)?;
        require_change_ids(&request.change_ids)?;
        self.resolve_log(auth, sync_log_id).await?;

        self.review
            .bulk_review(
                sync_log_id,
                &request.change_ids,
                request.accepted,
                auth.actor_id,
            )
            .await
    }

    /// Apply a batch of accepted changes belonging to one run.
    pub async fn apply_changes(
        &self,
        auth: &AuthContext,
        request: ApplyRequest,
    ) -> FmsResult<ApplyOutcome> {
        let sync_log_id = require_log_id(request.sync_log_id)?;
        require_change_ids(&request.change_ids)?;
        self.resolve_log(auth, sync_log_id).await?;

        self.apply
            .apply_changes(sync_log_id, &request.change_ids, Some(auth.actor_id))
            .await
    }

    /// Direct tenant-removal path for provider push events.
    pub async fn remove_tenant(
        &self,
        auth: &AuthContext,
        facility_id: FacilityId,
        external_tenant_id: &str,
    ) -> FmsResult<RemovalOutcome> {
        if !auth.can_access(facility_id) {
            return Err(FmsError::Authorization);
        }
        if external_tenant_id.is_empty() {
            return Err(FmsError::validation("external_tenant_id"));
        }
        self.apply
            .apply_tenant_removed(facility_id, external_tenant_id, Some(auth.actor_id))
            .await
    }

    /// Existence before authorization: an unknown id is `NotFound` for
    /// everyone; a real id outside the caller's accessible set is
    /// `Authorization` with no facility named.
    async fn resolve_log(&self, auth: &AuthContext, sync_log_id: SyncLogId) -> FmsResult<SyncLog> {
        let log = self
            .sync_logs
            .get(sync_log_id)
            .await?
            .ok_or_else(|| FmsError::not_found("Sync log", sync_log_id))?;
        if !auth.can_access(log.facility_id) {
            return Err(FmsError::Authorization);
        }
        Ok(log)
    }
}
