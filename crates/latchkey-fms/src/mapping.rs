//! External-to-internal entity mappings.
//!
//! A mapping is the durable association between a provider's identifier and
//! an internal one. Creation is the only way an `external_id` becomes
//! linkable; identity is immutable once recorded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use latchkey_core::{FacilityId, FacilityScoped, MappingId};

use crate::error::{FmsError, FmsResult};
use crate::types::{EntityType, ProviderType};

/// A single external-to-internal identity link.
///
/// Unique on `(facility_id, entity_type, provider_type, external_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Mapping ID.
    pub id: MappingId,
    /// Facility that owns the link.
    pub facility_id: FacilityId,
    /// Entity kind the link refers to.
    pub entity_type: EntityType,
    /// Provider that issued the external identifier.
    pub provider_type: ProviderType,
    /// Provider-defined identifier.
    pub external_id: String,
    /// Internal identifier (user or unit UUID).
    pub internal_id: Uuid,
    /// When the link was first recorded.
    pub created_at: DateTime<Utc>,
}

impl EntityMapping {
    /// Create a new mapping record.
    #[must_use]
    pub fn new(
        facility_id: FacilityId,
        entity_type: EntityType,
        provider_type: ProviderType,
        external_id: impl Into<String>,
        internal_id: Uuid,
    ) -> Self {
        Self {
            id: MappingId::new(),
            facility_id,
            entity_type,
            provider_type,
            external_id: external_id.into(),
            internal_id,
            created_at: Utc::now(),
        }
    }
}

impl FacilityScoped for EntityMapping {
    fn facility_id(&self) -> FacilityId {
        self.facility_id
    }
}

/// Persistent bidirectional map between external and internal identifiers.
#[async_trait]
pub trait EntityMappingStore: Send + Sync {
    /// Resolve an external identifier to its internal one, if linked.
    async fn resolve(
        &self,
        facility_id: FacilityId,
        entity_type: EntityType,
        provider_type: ProviderType,
        external_id: &str,
    ) -> FmsResult<Option<Uuid>>;

    /// Record a new link.
    ///
    /// Fails with [`FmsError::Conflict`] if the unique key already exists;
    /// this constraint is the sole guard against concurrent duplicate
    /// creation.
    async fn create(&self, mapping: &EntityMapping) -> FmsResult<()>;

    /// Point-in-time snapshot of every link for a facility and provider.
    ///
    /// Feeds the diff engine so diffing is a pure function of its inputs.
    async fn list_for_facility(
        &self,
        facility_id: FacilityId,
        provider_type: ProviderType,
    ) -> FmsResult<Vec<EntityMapping>>;

    /// Remove one link. Only used to roll back a mapping created moments
    /// earlier by a failed apply step; established identities are immutable.
    async fn delete(&self, id: MappingId) -> FmsResult<()>;

    /// Remove every link for a facility. Used only when the facility's FMS
    /// integration is torn down.
    async fn delete_for_facility(&self, facility_id: FacilityId) -> FmsResult<u64>;
}

/// Postgres-backed mapping store.
#[derive(Debug, Clone)]
pub struct PgEntityMappingStore {
    pool: PgPool,
}

impl PgEntityMappingStore {
    /// Create a new store over a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EntityMappingRow {
    id: Uuid,
    facility_id: Uuid,
    entity_type: String,
    provider_type: String,
    external_id: String,
    internal_id: Uuid,
    created_at: DateTime<Utc>,
}

impl EntityMappingRow {
    fn into_mapping(self) -> FmsResult<EntityMapping> {
        let entity_type = EntityType::from_str(&self.entity_type).map_err(FmsError::internal)?;
        let provider_type =
            ProviderType::from_str(&self.provider_type).map_err(FmsError::internal)?;
        Ok(EntityMapping {
            id: MappingId::from_uuid(self.id),
            facility_id: FacilityId::from_uuid(self.facility_id),
            entity_type,
            provider_type,
            external_id: self.external_id,
            internal_id: self.internal_id,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl EntityMappingStore for PgEntityMappingStore {
    async fn resolve(
        &self,
        facility_id: FacilityId,
        entity_type: EntityType,
        provider_type: ProviderType,
        external_id: &str,
    ) -> FmsResult<Option<Uuid>> {
        let internal_id: Option<(Uuid,)> = sqlx::query_as(
            r"
            SELECT internal_id
            FROM fms_entity_mappings
            WHERE facility_id = $1
              AND entity_type = $2
              AND provider_type = $3
              AND external_id = $4
            ",
        )
        .bind(facility_id.as_uuid())
        .bind(entity_type.as_str())
        .bind(provider_type.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(internal_id.map(|row| row.0))
    }

    async fn create(&self, mapping: &EntityMapping) -> FmsResult<()> {
        let result = sqlx::query(
            r"
            INSERT INTO fms_entity_mappings
                (id, facility_id, entity_type, provider_type, external_id, internal_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(mapping.id.as_uuid())
        .bind(mapping.facility_id.as_uuid())
        .bind(mapping.entity_type.as_str())
        .bind(mapping.provider_type.as_str())
        .bind(&mapping.external_id)
        .bind(mapping.internal_id)
        .bind(mapping.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(FmsError::conflict(format!(
                    "Mapping already exists for {} {}",
                    mapping.entity_type, mapping.external_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_for_facility(
        &self,
        facility_id: FacilityId,
        provider_type: ProviderType,
    ) -> FmsResult<Vec<EntityMapping>> {
        let rows: Vec<EntityMappingRow> = sqlx::query_as(
            r"
            SELECT id, facility_id, entity_type, provider_type, external_id,
                   internal_id, created_at
            FROM fms_entity_mappings
            WHERE facility_id = $1 AND provider_type = $2
            ORDER BY entity_type, external_id
            ",
        )
        .bind(facility_id.as_uuid())
        .bind(provider_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(EntityMappingRow::into_mapping)
            .collect()
    }

    async fn delete(&self, id: MappingId) -> FmsResult<()> {
        sqlx::query(
            r"
            DELETE FROM fms_entity_mappings
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_for_facility(&self, facility_id: FacilityId) -> FmsResult<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM fms_entity_mappings
            WHERE facility_id = $1
            ",
        )
        .bind(facility_id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
