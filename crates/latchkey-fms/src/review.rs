//! Change review operations.
//!
//! Review decisions are terminal: a reviewed change keeps its original
//! decision, and re-reviewing returns that decision marked
//! `already_decided` rather than overwriting it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use latchkey_core::{ChangeId, SyncLogId, UserId};

use crate::change::{Change, ChangeStore};
use crate::error::{FmsError, FmsResult};
use crate::log::{SyncCounts, SyncLogStore};
use crate::types::ReviewDecision;

/// Outcome of reviewing one change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    /// The reviewed change.
    pub change_id: ChangeId,
    /// The decision now on record.
    pub decision: ReviewDecision,
    /// True if a decision already existed and was returned unchanged.
    pub already_decided: bool,
}

/// Per-id result inside a bulk review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkReviewItem {
    /// The change this result refers to.
    pub change_id: ChangeId,
    /// The recorded decision, if the id was reviewable.
    pub decision: Option<ReviewDecision>,
    /// True if a decision already existed for this change.
    pub already_decided: bool,
    /// Why the id could not be reviewed, if it could not.
    pub error: Option<String>,
}

/// Outcome of a bulk review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkReviewOutcome {
    /// Per-id results, in request order.
    pub results: Vec<BulkReviewItem>,
    /// Ids whose decision was recorded by this call.
    pub reviewed: u32,
    /// Ids that already carried a decision.
    pub already_decided: u32,
    /// Ids that could not be reviewed.
    pub failed: u32,
}

/// Review operations over the change store, scoped to a sync log.
pub struct ReviewService {
    sync_logs: Arc<dyn SyncLogStore>,
    changes: Arc<dyn ChangeStore>,
}

impl ReviewService {
    /// Create a new review service with injected stores.
    pub fn new(sync_logs: Arc<dyn SyncLogStore>, changes: Arc<dyn ChangeStore>) -> Self {
        Self { sync_logs, changes }
    }

    /// Unreviewed changes for a run.
    pub async fn pending_changes(&self, sync_log_id: SyncLogId) -> FmsResult<Vec<Change>> {
        self.changes.list_pending(sync_log_id).await
    }

    /// Record a decision for one change.
    ///
    /// Idempotent: an already-reviewed change returns its existing decision.
    pub async fn review_change(
        &self,
        change_id: ChangeId,
        accepted: bool,
        reviewer: UserId,
    ) -> FmsResult<ReviewOutcome> {
        let decision = ReviewDecision::from_accepted(accepted);
        let cas = self
            .changes
            .review(change_id, decision, reviewer)
            .await?
            .ok_or_else(|| FmsError::not_found("Change", change_id))?;

        let recorded = cas.change.decision.unwrap_or(decision);
        if cas.newly_reviewed {
            info!(
                change_id = %change_id,
                decision = %recorded,
                reviewer = %reviewer,
                "Change reviewed"
            );
            refresh_log_counts(&*self.changes, &*self.sync_logs, cas.change.sync_log_id).await?;
        }

        Ok(ReviewOutcome {
            change_id,
            decision: recorded,
            already_decided: !cas.newly_reviewed,
        })
    }

    /// Apply the same decision to many changes of one run, with per-id
    /// result reporting. An id that does not belong to the run is a per-id
    /// error, not a batch abort.
    pub async fn bulk_review(
        &self,
        sync_log_id: SyncLogId,
        change_ids: &[ChangeId],
        accepted: bool,
        reviewer: UserId,
    ) -> FmsResult<BulkReviewOutcome> {
        let decision = ReviewDecision::from_accepted(accepted);
        let mut outcome = BulkReviewOutcome::default();

        for &change_id in change_ids {
            let item = match self.review_one(sync_log_id, change_id, decision, reviewer).await {
                Ok((recorded, already_decided)) => {
                    if already_decided {
                        outcome.already_decided += 1;
                    } else {
                        outcome.reviewed += 1;
                    }
                    BulkReviewItem {
                        change_id,
                        decision: Some(recorded),
                        already_decided,
                        error: None,
                    }
                }
                Err(e) => {
                    outcome.failed += 1;
                    BulkReviewItem {
                        change_id,
                        decision: None,
                        already_decided: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcome.results.push(item);
        }

        if outcome.reviewed > 0 {
            refresh_log_counts(&*self.changes, &*self.sync_logs, sync_log_id).await?;
        }

        info!(
            sync_log_id = %sync_log_id,
            reviewed = outcome.reviewed,
            already_decided = outcome.already_decided,
            failed = outcome.failed,
            "Bulk review finished"
        );

        Ok(outcome)
    }

    async fn review_one(
        &self,
        sync_log_id: SyncLogId,
        change_id: ChangeId,
        decision: ReviewDecision,
        reviewer: UserId,
    ) -> FmsResult<(ReviewDecision, bool)> {
        let change = self
            .changes
            .get(change_id)
            .await?
            .ok_or_else(|| FmsError::not_found("Change", change_id))?;
        if change.sync_log_id != sync_log_id {
            return Err(FmsError::conflict(format!(
                "Change {change_id} does not belong to this sync log"
            )));
        }

        let cas = self
            .changes
            .review(change_id, decision, reviewer)
            .await?
            .ok_or_else(|| FmsError::not_found("Change", change_id))?;
        let recorded = cas.change.decision.unwrap_or(decision);
        Ok((recorded, !cas.newly_reviewed))
    }
}

/// Recompute a log's aggregate counters from its change rows.
pub(crate) async fn refresh_log_counts(
    changes: &dyn ChangeStore,
    sync_logs: &dyn SyncLogStore,
    sync_log_id: SyncLogId,
) -> FmsResult<()> {
    let rows = changes.list_for_log(sync_log_id).await?;
    let detected = rows.len();
    let applied = rows.iter().filter(|c| c.is_applied()).count();
    let rejected = rows
        .iter()
        .filter(|c| c.decision == Some(ReviewDecision::Rejected))
        .count();
    let pending = detected.saturating_sub(applied + rejected);

    sync_logs
        .update_counts(
            sync_log_id,
            SyncCounts {
                detected: detected as i32,
                applied: applied as i32,
                pending: pending as i32,
                rejected: rejected as i32,
            },
        )
        .await
}
