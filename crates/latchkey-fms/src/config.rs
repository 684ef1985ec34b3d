//! Per-facility FMS provider configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use latchkey_core::{FacilityId, FacilityScoped, FmsConfigId};

use crate::error::{FmsError, FmsResult};
use crate::types::ProviderType;

/// Provider settings for one facility.
///
/// Created by an administrator, mutated on settings update, never deleted
/// while sync history references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FmsConfiguration {
    /// Configuration ID.
    pub id: FmsConfigId,
    /// Facility this configuration belongs to.
    pub facility_id: FacilityId,
    /// Which provider adapter to use.
    pub provider_type: ProviderType,
    /// Whether synchronization is enabled for this facility.
    pub is_enabled: bool,
    /// Opaque provider-specific settings (credentials reference, site code).
    pub config: serde_json::Value,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl FmsConfiguration {
    /// Create a new enabled configuration.
    #[must_use]
    pub fn new(
        facility_id: FacilityId,
        provider_type: ProviderType,
        config: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: FmsConfigId::new(),
            facility_id,
            provider_type,
            is_enabled: true,
            config,
            created_at: now,
            updated_at: now,
        }
    }
}

impl FacilityScoped for FmsConfiguration {
    fn facility_id(&self) -> FacilityId {
        self.facility_id
    }
}

/// Engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum time to wait for one adapter fetch call, in seconds.
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
    /// Page size for sync history listings.
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,
}

fn default_adapter_timeout_secs() -> u64 {
    30
}

fn default_history_page_size() -> u32 {
    20
}

impl SyncSettings {
    /// Adapter timeout as a [`Duration`].
    #[must_use]
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: default_adapter_timeout_secs(),
            history_page_size: default_history_page_size(),
        }
    }
}

/// Storage for per-facility FMS configurations.
#[async_trait]
pub trait FmsConfigStore: Send + Sync {
    /// Fetch the configuration for a facility, enabled or not.
    async fn get_for_facility(
        &self,
        facility_id: FacilityId,
    ) -> FmsResult<Option<FmsConfiguration>>;

    /// Fetch a configuration by its ID.
    async fn get(&self, id: FmsConfigId) -> FmsResult<Option<FmsConfiguration>>;

    /// Insert or update a configuration.
    async fn save(&self, config: &FmsConfiguration) -> FmsResult<()>;
}

/// Postgres-backed configuration store.
#[derive(Debug, Clone)]
pub struct PgFmsConfigStore {
    pool: PgPool,
}

impl PgFmsConfigStore {
    /// Create a new store over a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FmsConfigRow {
    id: Uuid,
    facility_id: Uuid,
    provider_type: String,
    is_enabled: bool,
    config: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FmsConfigRow {
    fn into_config(self) -> FmsResult<FmsConfiguration> {
        let provider_type = ProviderType::from_str(&self.provider_type)
            .map_err(FmsError::configuration)?;
        Ok(FmsConfiguration {
            id: FmsConfigId::from_uuid(self.id),
            facility_id: FacilityId::from_uuid(self.facility_id),
            provider_type,
            is_enabled: self.is_enabled,
            config: self.config,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl FmsConfigStore for PgFmsConfigStore {
    async fn get_for_facility(
        &self,
        facility_id: FacilityId,
    ) -> FmsResult<Option<FmsConfiguration>> {
        let row: Option<FmsConfigRow> = sqlx::query_as(
            r"
            SELECT id, facility_id, provider_type, is_enabled, config,
                   created_at, updated_at
            FROM fms_configurations
            WHERE facility_id = $1
            ",
        )
        .bind(facility_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(FmsConfigRow::into_config).transpose()
    }

    async fn get(&self, id: FmsConfigId) -> FmsResult<Option<FmsConfiguration>> {
        let row: Option<FmsConfigRow> = sqlx::query_as(
            r"
            SELECT id, facility_id, provider_type, is_enabled, config,
                   created_at, updated_at
            FROM fms_configurations
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(FmsConfigRow::into_config).transpose()
    }

    async fn save(&self, config: &FmsConfiguration) -> FmsResult<()> {
        sqlx::query(
            r"
            INSERT INTO fms_configurations
                (id, facility_id, provider_type, is_enabled, config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (facility_id) DO UPDATE SET
                provider_type = EXCLUDED.provider_type,
                is_enabled = EXCLUDED.is_enabled,
                config = EXCLUDED.config,
                updated_at = NOW()
            ",
        )
        .bind(config.id.as_uuid())
        .bind(config.facility_id.as_uuid())
        .bind(config.provider_type.as_str())
        .bind(config.is_enabled)
        .bind(&config.config)
        .bind(config.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
