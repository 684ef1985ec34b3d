//! Detected change tracking.
//!
//! A [`Change`] is one difference between external and internal state,
//! created by the diff engine and mutated only by review and apply
//! operations. The owning facility is inherited transitively from the
//! change's sync log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use latchkey_core::{ChangeId, SyncLogId, UserId};

use crate::error::{FmsError, FmsResult};
use crate::types::{ChangeType, EntityType, RequiredAction, ReviewDecision};

/// One detected difference awaiting review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// Change ID.
    pub id: ChangeId,
    /// Sync run that produced this change.
    pub sync_log_id: SyncLogId,
    /// Kind of difference.
    pub change_type: ChangeType,
    /// Entity kind the change refers to.
    pub entity_type: EntityType,
    /// External system's identifier for the entity.
    pub external_id: String,
    /// Internal state of the changed fields (updates and removals only).
    pub before_data: Option<serde_json::Value>,
    /// External state of the changed fields (updates and additions only).
    pub after_data: Option<serde_json::Value>,
    /// Ordered mutation intents the apply engine will execute.
    pub required_actions: Vec<RequiredAction>,
    /// Human-readable summary of the change's effect.
    pub impact_summary: String,
    /// Whether a reviewer has recorded a decision.
    pub is_reviewed: bool,
    /// Terminal review decision, if reviewed.
    pub decision: Option<ReviewDecision>,
    /// Reviewer who decided.
    pub reviewed_by: Option<UserId>,
    /// When the decision was recorded.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// When the change was applied, if it has been.
    pub applied_at: Option<DateTime<Utc>>,
    /// When the change was detected.
    pub created_at: DateTime<Utc>,
}

impl Change {
    /// Create a new unreviewed change.
    #[must_use]
    pub fn new(
        sync_log_id: SyncLogId,
        change_type: ChangeType,
        external_id: impl Into<String>,
    ) -> Self {
        Self {
            id: ChangeId::new(),
            sync_log_id,
            change_type,
            entity_type: change_type.entity_type(),
            external_id: external_id.into(),
            before_data: None,
            after_data: None,
            required_actions: Vec::new(),
            impact_summary: String::new(),
            is_reviewed: false,
            decision: None,
            reviewed_by: None,
            reviewed_at: None,
            applied_at: None,
            created_at: Utc::now(),
        }
    }

    /// Set the internal-side snapshot of the changed fields.
    #[must_use]
    pub fn with_before(mut self, data: serde_json::Value) -> Self {
        self.before_data = Some(data);
        self
    }

    /// Set the external-side snapshot of the changed fields.
    #[must_use]
    pub fn with_after(mut self, data: serde_json::Value) -> Self {
        self.after_data = Some(data);
        self
    }

    /// Set the ordered mutation intents.
    #[must_use]
    pub fn with_actions(mut self, actions: Vec<RequiredAction>) -> Self {
        self.required_actions = actions;
        self
    }

    /// Set the human-readable impact summary.
    #[must_use]
    pub fn with_impact(mut self, summary: impl Into<String>) -> Self {
        self.impact_summary = summary.into();
        self
    }

    /// Check if this change still awaits review.
    #[must_use]
    pub fn is_pending_review(&self) -> bool {
        !self.is_reviewed
    }

    /// Check if a reviewer accepted this change.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.decision == Some(ReviewDecision::Accepted)
    }

    /// Check if this change has been applied.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }

    /// Whether any required action affects identity or access.
    #[must_use]
    pub fn is_security_sensitive(&self) -> bool {
        self.required_actions
            .iter()
            .any(RequiredAction::is_security_sensitive)
    }
}

/// Outcome of a review compare-and-set.
#[derive(Debug, Clone)]
pub struct ReviewCas {
    /// The change as stored after the operation.
    pub change: Change,
    /// True if this call recorded the decision; false if a decision already
    /// existed and was returned unchanged.
    pub newly_reviewed: bool,
}

/// Storage for detected changes, scoped to their sync log.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Persist every change of a run atomically: all rows land together or
    /// none do.
    async fn insert_all(&self, changes: &[Change]) -> FmsResult<()>;

    /// Fetch a change by ID.
    async fn get(&self, id: ChangeId) -> FmsResult<Option<Change>>;

    /// Every change belonging to a run.
    async fn list_for_log(&self, sync_log_id: SyncLogId) -> FmsResult<Vec<Change>>;

    /// Unreviewed changes belonging to a run.
    async fn list_pending(&self, sync_log_id: SyncLogId) -> FmsResult<Vec<Change>>;

    /// Record a review decision with compare-and-set semantics.
    ///
    /// If the change is already reviewed, the existing decision is returned
    /// unchanged (`newly_reviewed == false`) — never a silent overwrite.
    /// Returns `None` if the change does not exist.
    async fn review(
        &self,
        id: ChangeId,
        decision: ReviewDecision,
        reviewer: UserId,
    ) -> FmsResult<Option<ReviewCas>>;

    /// Stamp `applied_at` with compare-and-set semantics.
    ///
    /// Fails with [`FmsError::Conflict`] if the change is already applied,
    /// so a concurrent double-apply can never double-mutate.
    async fn mark_applied(&self, id: ChangeId) -> FmsResult<Change>;
}

/// Postgres-backed change store.
#[derive(Debug, Clone)]
pub struct PgChangeStore {
    pool: PgPool,
}

impl PgChangeStore {
    /// Create a new store over a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: Uuid,
    sync_log_id: Uuid,
    change_type: String,
    external_id: String,
    before_data: Option<serde_json::Value>,
    after_data: Option<serde_json::Value>,
    required_actions: serde_json::Value,
    impact_summary: String,
    is_reviewed: bool,
    decision: Option<String>,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    applied_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

const CHANGE_COLUMNS: &str = r"
    id, sync_log_id, change_type, external_id, before_data, after_data,
    required_actions, impact_summary, is_reviewed, decision, reviewed_by,
    reviewed_at, applied_at, created_at
";

impl ChangeRow {
    fn into_change(self) -> FmsResult<Change> {
        let change_type = ChangeType::from_str(&self.change_type).map_err(FmsError::internal)?;
        let decision = self
            .decision
            .as_deref()
            .map(ReviewDecision::from_str)
            .transpose()
            .map_err(FmsError::internal)?;
        let required_actions: Vec<RequiredAction> =
            serde_json::from_value(self.required_actions)?;
        Ok(Change {
            id: ChangeId::from_uuid(self.id),
            sync_log_id: SyncLogId::from_uuid(self.sync_log_id),
            change_type,
            entity_type: change_type.entity_type(),
            external_id: self.external_id,
            before_data: self.before_data,
            after_data: self.after_data,
            required_actions,
            impact_summary: self.impact_summary,
            is_reviewed: self.is_reviewed,
            decision,
            reviewed_by: self.reviewed_by.map(UserId::from_uuid),
            reviewed_at: self.reviewed_at,
            applied_at: self.applied_at,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl ChangeStore for PgChangeStore {
    async fn insert_all(&self, changes: &[Change]) -> FmsResult<()> {
        let mut tx = self.pool.begin().await?;

        for change in changes {
            sqlx::query(
                r"
                INSERT INTO fms_sync_changes
                    (id, sync_log_id, change_type, external_id, before_data,
                     after_data, required_actions, impact_summary, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(change.id.as_uuid())
            .bind(change.sync_log_id.as_uuid())
            .bind(change.change_type.as_str())
            .bind(&change.external_id)
            .bind(&change.before_data)
            .bind(&change.after_data)
            .bind(serde_json::to_value(&change.required_actions)?)
            .bind(&change.impact_summary)
            .bind(change.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: ChangeId) -> FmsResult<Option<Change>> {
        let row: Option<ChangeRow> = sqlx::query_as(&format!(
            r"
            SELECT {CHANGE_COLUMNS}
            FROM fms_sync_changes
            WHERE id = $1
            ",
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChangeRow::into_change).transpose()
    }

    async fn list_for_log(&self, sync_log_id: SyncLogId) -> FmsResult<Vec<Change>> {
        let rows: Vec<ChangeRow> = sqlx::query_as(&format!(
            r"
            SELECT {CHANGE_COLUMNS}
            FROM fms_sync_changes
            WHERE sync_log_id = $1
            ORDER BY change_type, external_id
            ",
        ))
        .bind(sync_log_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChangeRow::into_change).collect()
    }

    async fn list_pending(&self, sync_log_id: SyncLogId) -> FmsResult<Vec<Change>> {
        let rows: Vec<ChangeRow> = sqlx::query_as(&format!(
            r"
            SELECT {CHANGE_COLUMNS}
            FROM fms_sync_changes
            WHERE sync_log_id = $1 AND is_reviewed = FALSE
            ORDER BY change_type, external_id
            ",
        ))
        .bind(sync_log_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChangeRow::into_change).collect()
    }

    async fn review(
        &self,
        id: ChangeId,
        decision: ReviewDecision,
        reviewer: UserId,
    ) -> FmsResult<Option<ReviewCas>> {
        // The WHERE is_reviewed = FALSE guard makes the decision write atomic:
        // a concurrent reviewer loses the race and falls through to the read.
        let updated: Option<ChangeRow> = sqlx::query_as(&format!(
            r"
            UPDATE fms_sync_changes
            SET is_reviewed = TRUE,
                decision = $2,
                reviewed_by = $3,
                reviewed_at = NOW()
            WHERE id = $1 AND is_reviewed = FALSE
            RETURNING {CHANGE_COLUMNS}
            ",
        ))
        .bind(id.as_uuid())
        .bind(decision.as_str())
        .bind(reviewer.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(Some(ReviewCas {
                change: row.into_change()?,
                newly_reviewed: true,
            }));
        }

        let existing = self.get(id).await?;
        Ok(existing.map(|change| ReviewCas {
            change,
            newly_reviewed: false,
        }))
    }

    async fn mark_applied(&self, id: ChangeId) -> FmsResult<Change> {
        let row: Option<ChangeRow> = sqlx::query_as(&format!(
            r"
            UPDATE fms_sync_changes
            SET applied_at = NOW()
            WHERE id = $1 AND applied_at IS NULL
            RETURNING {CHANGE_COLUMNS}
            ",
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChangeRow::into_change)
            .transpose()?
            .ok_or_else(|| FmsError::conflict(format!("Change {id} is already applied")))
    }
}
