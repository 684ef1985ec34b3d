//! Three-way set diff between an external snapshot and internal state.
//!
//! The diff is a pure function of its three inputs (external snapshot,
//! facility roster, mapping snapshot). Entities are keyed by `external_id`
//! before comparison, so adapter result ordering is irrelevant, and the
//! output carries no wall-clock dependence. Re-running against unchanged
//! inputs yields an empty change set.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;
use uuid::Uuid;

use latchkey_core::SyncLogId;

use crate::adapter::ExternalEntity;
use crate::change::Change;
use crate::directory::{FacilityRoster, InternalTenant, InternalUnit};
use crate::mapping::EntityMapping;
use crate::types::{ChangeType, EntityType, RequiredAction};

/// The full external state for one facility, as fetched by an adapter.
#[derive(Debug, Clone, Default)]
pub struct ExternalSnapshot {
    /// Current tenant roster.
    pub tenants: Vec<ExternalEntity>,
    /// Current unit roster.
    pub units: Vec<ExternalEntity>,
}

/// Computes change sets between external and internal state.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine;

impl DiffEngine {
    /// Create a new diff engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compute the change set for one facility.
    ///
    /// `mappings` is the facility's point-in-time mapping snapshot; an
    /// external entity with no mapping is treated as added, a mapped internal
    /// entity absent from the snapshot as removed.
    #[must_use]
    pub fn diff(
        &self,
        sync_log_id: SyncLogId,
        snapshot: &ExternalSnapshot,
        roster: &FacilityRoster,
        mappings: &[EntityMapping],
    ) -> Vec<Change> {
        let tenant_mappings = mapping_index(mappings, EntityType::Tenant);
        let unit_mappings = mapping_index(mappings, EntityType::Unit);

        let mut changes = Vec::new();
        let active_tenants: Vec<ExternalEntity> = snapshot
            .tenants
            .iter()
            .filter(|t| t.is_active)
            .cloned()
            .collect();
        changes.extend(self.diff_tenants(
            sync_log_id,
            &keyed(&active_tenants),
            roster,
            &tenant_mappings,
        ));
        changes.extend(self.diff_units(
            sync_log_id,
            &keyed(&snapshot.units),
            roster,
            &unit_mappings,
        ));

        // Deterministic output order regardless of adapter or map iteration.
        changes.sort_by(|a, b| {
            (a.entity_type, &a.external_id, a.change_type.as_str()).cmp(&(
                b.entity_type,
                &b.external_id,
                b.change_type.as_str(),
            ))
        });
        changes
    }

    // A tenant the provider reports as inactive is treated as absent from
    // the snapshot, so a mapped-but-inactive tenant surfaces as removed and
    // re-running after apply stays quiet.
    fn diff_tenants(
        &self,
        sync_log_id: SyncLogId,
        external: &BTreeMap<&str, &ExternalEntity>,
        roster: &FacilityRoster,
        mappings: &BTreeMap<&str, Uuid>,
    ) -> Vec<Change> {
        let internal: HashMap<Uuid, &InternalTenant> = roster
            .tenants
            .iter()
            .map(|t| (*t.user_id.as_uuid(), t))
            .collect();

        let mut changes = Vec::new();

        for (external_id, entity) in external {
            match mappings.get(external_id) {
                None => changes.push(tenant_added(sync_log_id, entity)),
                Some(internal_id) => {
                    if let Some(tenant) = internal.get(internal_id) {
                        if let Some(change) = tenant_updated(sync_log_id, entity, tenant) {
                            changes.push(change);
                        }
                    }
                }
            }
        }

        for (external_id, internal_id) in mappings {
            if external.contains_key(external_id) {
                continue;
            }
            if let Some(tenant) = internal.get(internal_id) {
                changes.push(tenant_removed(sync_log_id, external_id, tenant));
            }
        }

        changes
    }

    fn diff_units(
        &self,
        sync_log_id: SyncLogId,
        external: &BTreeMap<&str, &ExternalEntity>,
        roster: &FacilityRoster,
        mappings: &BTreeMap<&str, Uuid>,
    ) -> Vec<Change> {
        let internal: HashMap<Uuid, &InternalUnit> = roster
            .units
            .iter()
            .map(|u| (*u.unit_id.as_uuid(), u))
            .collect();

        let mut changes = Vec::new();

        for (external_id, entity) in external {
            match mappings.get(external_id) {
                None => changes.push(unit_added(sync_log_id, entity)),
                Some(internal_id) => {
                    if let Some(unit) = internal.get(internal_id) {
                        if let Some(change) = unit_updated(sync_log_id, entity, unit) {
                            changes.push(change);
                        }
                    }
                }
            }
        }

        for (external_id, internal_id) in mappings {
            if external.contains_key(external_id) {
                continue;
            }
            if let Some(unit) = internal.get(internal_id) {
                changes.push(unit_removed(sync_log_id, external_id, unit));
            }
        }

        changes
    }
}

/// Key entities by `external_id`, first occurrence wins.
fn keyed(entities: &[ExternalEntity]) -> BTreeMap<&str, &ExternalEntity> {
    let mut map = BTreeMap::new();
    for entity in entities {
        if map.insert(entity.external_id.as_str(), entity).is_some() {
            warn!(
                external_id = %entity.external_id,
                "Duplicate external_id in provider snapshot; keeping last occurrence"
            );
        }
    }
    map
}

fn mapping_index(mappings: &[EntityMapping], entity_type: EntityType) -> BTreeMap<&str, Uuid> {
    mappings
        .iter()
        .filter(|m| m.entity_type == entity_type)
        .map(|m| (m.external_id.as_str(), m.internal_id))
        .collect()
}

fn tenant_added(sync_log_id: SyncLogId, entity: &ExternalEntity) -> Change {
    let label = entity.name.as_deref().unwrap_or(&entity.external_id);
    let impact = match &entity.unit_number {
        Some(unit) => format!("New tenant {label}: account will be linked and granted access to unit {unit}"),
        None => format!("New tenant {label}: account will be created or matched"),
    };
    Change::new(sync_log_id, ChangeType::TenantAdded, &entity.external_id)
        .with_after(external_tenant_fields(entity))
        .with_actions(vec![
            RequiredAction::CreateMapping,
            RequiredAction::CreateOrMatchUser,
            RequiredAction::GrantUnitAccess,
        ])
        .with_impact(impact)
}

fn tenant_removed(sync_log_id: SyncLogId, external_id: &str, tenant: &InternalTenant) -> Change {
    let label = tenant.name.as_deref().unwrap_or(external_id);
    Change::new(sync_log_id, ChangeType::TenantRemoved, external_id)
        .with_before(internal_tenant_fields(tenant))
        .with_actions(vec![
            RequiredAction::RevokeUnitAccess,
            RequiredAction::DeactivateUserIfOrphaned,
        ])
        .with_impact(format!(
            "Tenant {label} no longer present at provider: facility access will be revoked; account deactivated only if no assignments remain elsewhere"
        ))
}

fn tenant_updated(
    sync_log_id: SyncLogId,
    entity: &ExternalEntity,
    tenant: &InternalTenant,
) -> Option<Change> {
    let mut before = Map::new();
    let mut after = Map::new();

    compare_field("name", &tenant.name, &entity.name, &mut before, &mut after);
    compare_field(
        "email",
        &tenant.email,
        &entity.email,
        &mut before,
        &mut after,
    );
    compare_field(
        "phone",
        &tenant.phone,
        &entity.phone,
        &mut before,
        &mut after,
    );
    compare_field(
        "unit_number",
        &tenant.unit_number,
        &entity.unit_number,
        &mut before,
        &mut after,
    );

    if after.is_empty() {
        return None;
    }

    let fields: Vec<&str> = after.keys().map(String::as_str).collect();
    let label = entity.name.as_deref().unwrap_or(&entity.external_id);
    Some(
        Change::new(sync_log_id, ChangeType::TenantUpdated, &entity.external_id)
            .with_before(Value::Object(before))
            .with_after(Value::Object(after.clone()))
            .with_actions(vec![RequiredAction::UpdateUser])
            .with_impact(format!(
                "Tenant {label}: {} will be updated",
                fields.join(", ")
            )),
    )
}

fn unit_added(sync_log_id: SyncLogId, entity: &ExternalEntity) -> Change {
    let label = entity
        .unit_number
        .as_deref()
        .unwrap_or(&entity.external_id);
    Change::new(sync_log_id, ChangeType::UnitAdded, &entity.external_id)
        .with_after(external_unit_fields(entity))
        .with_actions(vec![RequiredAction::CreateMapping, RequiredAction::CreateUnit])
        .with_impact(format!("New unit {label} will be created"))
}

fn unit_removed(sync_log_id: SyncLogId, external_id: &str, unit: &InternalUnit) -> Change {
    Change::new(sync_log_id, ChangeType::UnitRemoved, external_id)
        .with_before(internal_unit_fields(unit))
        .with_actions(vec![RequiredAction::RetireUnit])
        .with_impact(format!("Unit {} will be retired", unit.unit_number))
}

fn unit_updated(
    sync_log_id: SyncLogId,
    entity: &ExternalEntity,
    unit: &InternalUnit,
) -> Option<Change> {
    let mut before = Map::new();
    let mut after = Map::new();

    let external_number = entity.unit_number.clone();
    if external_number.as_deref() != Some(unit.unit_number.as_str())
        && external_number.is_some()
    {
        before.insert("unit_number".into(), json!(unit.unit_number));
        after.insert("unit_number".into(), json!(external_number));
    }
    compare_field(
        "status",
        &unit.status,
        &entity.status,
        &mut before,
        &mut after,
    );
    if unit.rent_amount != entity.rent_amount {
        before.insert("rent_amount".into(), json!(unit.rent_amount));
        after.insert("rent_amount".into(), json!(entity.rent_amount));
    }

    if after.is_empty() {
        return None;
    }

    let fields: Vec<String> = after.keys().cloned().collect();
    Some(
        Change::new(sync_log_id, ChangeType::UnitUpdated, &entity.external_id)
            .with_before(Value::Object(before))
            .with_after(Value::Object(after))
            .with_actions(vec![RequiredAction::UpdateUnit])
            .with_impact(format!(
                "Unit {}: {} will be updated",
                unit.unit_number,
                fields.join(", ")
            )),
    )
}

fn compare_field(
    name: &str,
    internal: &Option<String>,
    external: &Option<String>,
    before: &mut Map<String, Value>,
    after: &mut Map<String, Value>,
) {
    if internal != external {
        before.insert(name.into(), json!(internal));
        after.insert(name.into(), json!(external));
    }
}

fn external_tenant_fields(entity: &ExternalEntity) -> Value {
    json!({
        "name": entity.name,
        "email": entity.email,
        "phone": entity.phone,
        "unit_number": entity.unit_number,
        "is_active": entity.is_active,
        "move_in": entity.move_in,
        "move_out": entity.move_out,
    })
}

fn internal_tenant_fields(tenant: &InternalTenant) -> Value {
    json!({
        "name": tenant.name,
        "email": tenant.email,
        "phone": tenant.phone,
        "unit_number": tenant.unit_number,
        "is_active": tenant.is_active,
    })
}

fn external_unit_fields(entity: &ExternalEntity) -> Value {
    json!({
        "unit_number": entity.unit_number,
        "status": entity.status,
        "rent_amount": entity.rent_amount,
    })
}

fn internal_unit_fields(unit: &InternalUnit) -> Value {
    json!({
        "unit_number": unit.unit_number,
        "status": unit.status,
        "rent_amount": unit.rent_amount,
    })
}
