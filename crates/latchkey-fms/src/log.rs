//! Sync run audit log.
//!
//! One [`SyncLog`] per run. A log is created `running`, finalized exactly
//! once to `completed` or `failed`, and its lifecycle fields are immutable
//! thereafter; only the aggregate counters move as changes are reviewed and
//! applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use latchkey_core::{FacilityId, FacilityScoped, FmsConfigId, SyncLogId};

use crate::error::{FmsError, FmsResult};
use crate::types::{SyncRunStatus, TriggeredBy};

/// Aggregate change counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    /// Changes detected by the diff engine.
    pub detected: i32,
    /// Changes applied so far.
    pub applied: i32,
    /// Changes still awaiting review or apply.
    pub pending: i32,
    /// Changes rejected by a reviewer.
    pub rejected: i32,
}

impl SyncCounts {
    /// Counters for a freshly completed run: everything detected is pending.
    #[must_use]
    pub fn detected(count: usize) -> Self {
        let count = i32::try_from(count).unwrap_or(i32::MAX);
        Self {
            detected: count,
            applied: 0,
            pending: count,
            rejected: 0,
        }
    }
}

/// Append-only audit record of one synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    /// Run ID.
    pub id: SyncLogId,
    /// Facility the run belongs to.
    pub facility_id: FacilityId,
    /// Configuration the run used.
    pub fms_config_id: FmsConfigId,
    /// Run status.
    pub status: SyncRunStatus,
    /// How the run was triggered.
    pub triggered_by: TriggeredBy,
    /// Whether any detected change needs human review before apply.
    pub requires_review: bool,
    /// Failure reason, if the run failed.
    pub error_message: Option<String>,
    /// Aggregate counters.
    pub counts: SyncCounts,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished, if finalized.
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncLog {
    /// Check if the run is still in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == SyncRunStatus::Running
    }

    /// Check if the run has been finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }
}

impl FacilityScoped for SyncLog {
    fn facility_id(&self) -> FacilityId {
        self.facility_id
    }
}

/// Storage for sync run records.
#[async_trait]
pub trait SyncLogStore: Send + Sync {
    /// Create a new `running` log.
    ///
    /// Enforces single-flight per facility: fails with [`FmsError::Conflict`]
    /// if a running log already exists for `facility_id`. The check and the
    /// insert are atomic at the store.
    async fn create_running(
        &self,
        facility_id: FacilityId,
        fms_config_id: FmsConfigId,
        triggered_by: TriggeredBy,
    ) -> FmsResult<SyncLog>;

    /// Finalize a running log as completed.
    ///
    /// Fails with [`FmsError::Conflict`] if the log is already finalized.
    async fn mark_completed(
        &self,
        id: SyncLogId,
        counts: SyncCounts,
        requires_review: bool,
    ) -> FmsResult<SyncLog>;

    /// Finalize a running log as failed. No changes may be persisted for a
    /// failed run.
    async fn mark_failed(&self, id: SyncLogId, reason: &str) -> FmsResult<SyncLog>;

    /// Update the aggregate counters on a finalized log as its changes move
    /// through review and apply. Lifecycle fields are never touched.
    async fn update_counts(&self, id: SyncLogId, counts: SyncCounts) -> FmsResult<()>;

    /// Fetch a log by ID.
    async fn get(&self, id: SyncLogId) -> FmsResult<Option<SyncLog>>;

    /// Paginated history for a facility, newest first.
    async fn list_for_facility(
        &self,
        facility_id: FacilityId,
        limit: u32,
        offset: u32,
    ) -> FmsResult<Vec<SyncLog>>;
}

/// Postgres-backed sync log store.
///
/// Single-flight is enforced by a partial unique index on
/// `(facility_id) WHERE status = 'running'`.
#[derive(Debug, Clone)]
pub struct PgSyncLogStore {
    pool: PgPool,
}

impl PgSyncLogStore {
    /// Create a new store over a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SyncLogRow {
    id: Uuid,
    facility_id: Uuid,
    fms_config_id: Uuid,
    status: String,
    triggered_by: String,
    requires_review: bool,
    error_message: Option<String>,
    changes_detected: i32,
    changes_applied: i32,
    changes_pending: i32,
    changes_rejected: i32,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

const SYNC_LOG_COLUMNS: &str = r"
    id, facility_id, fms_config_id, status, triggered_by, requires_review,
    error_message, changes_detected, changes_applied, changes_pending,
    changes_rejected, started_at, completed_at
";

impl SyncLogRow {
    fn into_log(self) -> FmsResult<SyncLog> {
        let status = SyncRunStatus::from_str(&self.status).map_err(FmsError::internal)?;
        let triggered_by = TriggeredBy::from_str(&self.triggered_by).map_err(FmsError::internal)?;
        Ok(SyncLog {
            id: SyncLogId::from_uuid(self.id),
            facility_id: FacilityId::from_uuid(self.facility_id),
            fms_config_id: FmsConfigId::from_uuid(self.fms_config_id),
            status,
            triggered_by,
            requires_review: self.requires_review,
            error_message: self.error_message,
            counts: SyncCounts {
                detected: self.changes_detected,
                applied: self.changes_applied,
                pending: self.changes_pending,
                rejected: self.changes_rejected,
            },
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[async_trait]
impl SyncLogStore for PgSyncLogStore {
    async fn create_running(
        &self,
        facility_id: FacilityId,
        fms_config_id: FmsConfigId,
        triggered_by: TriggeredBy,
    ) -> FmsResult<SyncLog> {
        let result: Result<SyncLogRow, sqlx::Error> = sqlx::query_as(&format!(
            r"
            INSERT INTO fms_sync_logs
                (id, facility_id, fms_config_id, status, triggered_by, started_at)
            VALUES ($1, $2, $3, 'running', $4, NOW())
            RETURNING {SYNC_LOG_COLUMNS}
            ",
        ))
        .bind(Uuid::new_v4())
        .bind(facility_id.as_uuid())
        .bind(fms_config_id.as_uuid())
        .bind(triggered_by.as_str())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.into_log(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(FmsError::conflict(
                format!("A sync is already running for facility {facility_id}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_completed(
        &self,
        id: SyncLogId,
        counts: SyncCounts,
        requires_review: bool,
    ) -> FmsResult<SyncLog> {
        let row: Option<SyncLogRow> = sqlx::query_as(&format!(
            r"
            UPDATE fms_sync_logs
            SET status = 'completed',
                requires_review = $2,
                changes_detected = $3,
                changes_applied = $4,
                changes_pending = $5,
                changes_rejected = $6,
                completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING {SYNC_LOG_COLUMNS}
            ",
        ))
        .bind(id.as_uuid())
        .bind(requires_review)
        .bind(counts.detected)
        .bind(counts.applied)
        .bind(counts.pending)
        .bind(counts.rejected)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncLogRow::into_log)
            .transpose()?
            .ok_or_else(|| FmsError::conflict(format!("Sync log {id} is already finalized")))
    }

    async fn mark_failed(&self, id: SyncLogId, reason: &str) -> FmsResult<SyncLog> {
        let row: Option<SyncLogRow> = sqlx::query_as(&format!(
            r"
            UPDATE fms_sync_logs
            SET status = 'failed',
                error_message = $2,
                completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING {SYNC_LOG_COLUMNS}
            ",
        ))
        .bind(id.as_uuid())
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncLogRow::into_log)
            .transpose()?
            .ok_or_else(|| FmsError::conflict(format!("Sync log {id} is already finalized")))
    }

    async fn update_counts(&self, id: SyncLogId, counts: SyncCounts) -> FmsResult<()> {
        sqlx::query(
            r"
            UPDATE fms_sync_logs
            SET changes_detected = $2,
                changes_applied = $3,
                changes_pending = $4,
                changes_rejected = $5
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .bind(counts.detected)
        .bind(counts.applied)
        .bind(counts.pending)
        .bind(counts.rejected)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: SyncLogId) -> FmsResult<Option<SyncLog>> {
        let row: Option<SyncLogRow> = sqlx::query_as(&format!(
            r"
            SELECT {SYNC_LOG_COLUMNS}
            FROM fms_sync_logs
            WHERE id = $1
            ",
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncLogRow::into_log).transpose()
    }

    async fn list_for_facility(
        &self,
        facility_id: FacilityId,
        limit: u32,
        offset: u32,
    ) -> FmsResult<Vec<SyncLog>> {
        let rows: Vec<SyncLogRow> = sqlx::query_as(&format!(
            r"
            SELECT {SYNC_LOG_COLUMNS}
            FROM fms_sync_logs
            WHERE facility_id = $1
            ORDER BY started_at DESC
            LIMIT $2 OFFSET $3
            ",
        ))
        .bind(facility_id.as_uuid())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncLogRow::into_log).collect()
    }
}
