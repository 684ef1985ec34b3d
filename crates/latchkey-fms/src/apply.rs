//! Apply engine.
//!
//! Turns accepted, reviewed changes into mutations on users, units, and
//! unit assignments. The batch is not globally atomic: each change applies
//! or fails independently, but one change's mutation set runs as a
//! compensating transaction that is rolled back in reverse order on failure.
//!
//! Facility isolation is enforced at every write: each mutation's target
//! must resolve to the sync log's facility; a mismatch is a fatal per-change
//! error and is never executed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use latchkey_core::{ChangeId, FacilityId, SyncLogId, UnitId, UserId};

use crate::change::{Change, ChangeStore};
use crate::config::FmsConfigStore;
use crate::directory::{DirectoryService, UnitPatch, UnitRecord, UserProfile};
use crate::error::{FmsError, FmsResult};
use crate::events::{
    AccessEvent, AccessGranted, AccessRevoked, EventEnvelope, EventPublisher, UserDeactivated,
    UserProvisioned,
};
use crate::log::SyncLogStore;
use crate::mapping::{EntityMapping, EntityMappingStore};
use crate::types::{ChangeType, EntityType, ProviderType};

/// Tally of access-affecting mutations performed by one apply call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessChangeTotals {
    /// User accounts newly created.
    pub users_created: u32,
    /// User accounts deactivated.
    pub users_deactivated: u32,
    /// Unit assignments granted.
    pub access_granted: u32,
    /// Unit assignments revoked.
    pub access_revoked: u32,
}

/// Per-change failure recorded during apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyChangeError {
    /// The change that failed.
    pub change_id: ChangeId,
    /// Why it failed.
    pub message: String,
}

/// Result of one apply call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Changes applied successfully.
    pub changes_applied: u32,
    /// Changes that failed.
    pub changes_failed: u32,
    /// Per-change errors.
    pub errors: Vec<ApplyChangeError>,
    /// Access mutation tally.
    pub access_changes: AccessChangeTotals,
}

/// Result of the direct tenant-removal path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalOutcome {
    /// The affected user.
    pub user_id: UserId,
    /// Assignments revoked in the facility.
    pub assignments_removed: u64,
    /// Whether the account was deactivated.
    pub user_deactivated: bool,
}

/// A completed mutation step, recorded so a failed change can be undone.
#[derive(Debug)]
enum ApplyStep {
    UserCreated(UserId),
    MappingCreated(EntityMapping),
    AssignmentCreated {
        user_id: UserId,
        unit_id: UnitId,
    },
    AssignmentsRemoved {
        user_id: UserId,
        unit_ids: Vec<UnitId>,
    },
    UnitCreated(UnitId),
}

/// Fields the diff engine records for a tenant-side change payload.
#[derive(Debug, Default, Deserialize)]
struct TenantFields {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    unit_number: Option<String>,
}

/// Fields the diff engine records for a unit-side change payload.
#[derive(Debug, Default, Deserialize)]
struct UnitFields {
    unit_number: Option<String>,
    status: Option<String>,
    rent_amount: Option<i64>,
}

/// Executes accepted changes against the internal directory.
///
/// All collaborators are injected at construction; the engine holds no
/// global state.
pub struct ApplyEngine {
    sync_logs: Arc<dyn SyncLogStore>,
    changes: Arc<dyn ChangeStore>,
    mappings: Arc<dyn EntityMappingStore>,
    configs: Arc<dyn FmsConfigStore>,
    directory: Arc<dyn DirectoryService>,
    publisher: Arc<dyn EventPublisher>,
}

impl ApplyEngine {
    /// Create a new apply engine with injected collaborators.
    pub fn new(
        sync_logs: Arc<dyn SyncLogStore>,
        changes: Arc<dyn ChangeStore>,
        mappings: Arc<dyn EntityMappingStore>,
        configs: Arc<dyn FmsConfigStore>,
        directory: Arc<dyn DirectoryService>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            sync_logs,
            changes,
            mappings,
            configs,
            directory,
            publisher,
        }
    }

    /// Apply a batch of reviewed-and-accepted changes belonging to one run.
    ///
    /// Each change applies or fails independently; a failure is recorded in
    /// the outcome and the batch continues. Re-applying an already-applied
    /// change is rejected per change, never a double mutation.
    pub async fn apply_changes(
        &self,
        sync_log_id: SyncLogId,
        change_ids: &[ChangeId],
        actor_id: Option<UserId>,
    ) -> FmsResult<ApplyOutcome> {
        let log = self
            .sync_logs
            .get(sync_log_id)
            .await?
            .ok_or_else(|| FmsError::not_found("Sync log", sync_log_id))?;
        let facility_id = log.facility_id;

        let config = self
            .configs
            .get_for_facility(facility_id)
            .await?
            .ok_or_else(|| {
                FmsError::configuration(format!(
                    "No FMS configuration for facility {facility_id}"
                ))
            })?;
        let provider_type = config.provider_type;

        let mut outcome = ApplyOutcome::default();

        for &change_id in change_ids {
            match self
                .apply_one(
                    sync_log_id,
                    facility_id,
                    provider_type,
                    change_id,
                    actor_id,
                    &mut outcome.access_changes,
                )
                .await
            {
                Ok(()) => outcome.changes_applied += 1,
                Err(e) => {
                    warn!(
                        sync_log_id = %sync_log_id,
                        change_id = %change_id,
                        error = %e,
                        "Change failed to apply"
                    );
                    outcome.changes_failed += 1;
                    outcome.errors.push(ApplyChangeError {
                        change_id,
                        message: e.to_string(),
                    });
                }
            }
        }

        crate::review::refresh_log_counts(&*self.changes, &*self.sync_logs, sync_log_id).await?;

        info!(
            sync_log_id = %sync_log_id,
            facility_id = %facility_id,
            applied = outcome.changes_applied,
            failed = outcome.changes_failed,
            "Apply batch finished"
        );

        Ok(outcome)
    }

    /// Direct removal path used when a provider pushes a tenant-removal
    /// event outside a full sync. Follows the same
    /// deactivate-iff-zero-remaining-assignments rule as the batch path.
    pub async fn apply_tenant_removed(
        &self,
        facility_id: FacilityId,
        external_tenant_id: &str,
        actor_id: Option<UserId>,
    ) -> FmsResult<RemovalOutcome> {
        let config = self
            .configs
            .get_for_facility(facility_id)
            .await?
            .ok_or_else(|| {
                FmsError::configuration(format!(
                    "No FMS configuration for facility {facility_id}"
                ))
            })?;

        let internal_id = self
            .mappings
            .resolve(
                facility_id,
                EntityType::Tenant,
                config.provider_type,
                external_tenant_id,
            )
            .await?
            .ok_or_else(|| FmsError::not_found("Tenant mapping", external_tenant_id))?;
        let user_id = UserId::from_uuid(internal_id);

        let removed = self
            .directory
            .remove_assignments(facility_id, user_id)
            .await?;
        if !removed.is_empty() {
            self.publish(
                facility_id,
                actor_id,
                &AccessRevoked {
                    user_id,
                    assignments_removed: removed.len() as u64,
                },
            )
            .await;
        }

        let user_deactivated = self.deactivate_if_orphaned(facility_id, user_id, actor_id).await?;

        info!(
            facility_id = %facility_id,
            external_tenant_id = %external_tenant_id,
            user_id = %user_id,
            assignments_removed = removed.len(),
            user_deactivated,
            "Processed direct tenant removal"
        );

        Ok(RemovalOutcome {
            user_id,
            assignments_removed: removed.len() as u64,
            user_deactivated,
        })
    }

    async fn apply_one(
        &self,
        sync_log_id: SyncLogId,
        facility_id: FacilityId,
        provider_type: ProviderType,
        change_id: ChangeId,
        actor_id: Option<UserId>,
        totals: &mut AccessChangeTotals,
    ) -> FmsResult<()> {
        let change = self
            .changes
            .get(change_id)
            .await?
            .ok_or_else(|| FmsError::not_found("Change", change_id))?;

        if change.sync_log_id != sync_log_id {
            return Err(FmsError::apply(
                change_id,
                "Change does not belong to this sync log",
            ));
        }
        if !change.is_reviewed {
            return Err(FmsError::apply(change_id, "Change has not been reviewed"));
        }
        if !change.is_accepted() {
            return Err(FmsError::apply(change_id, "Change was not accepted"));
        }
        if change.is_applied() {
            return Err(FmsError::apply(change_id, "Change is already applied"));
        }

        let mut steps: Vec<ApplyStep> = Vec::new();
        let result = self
            .execute(
                &change,
                facility_id,
                provider_type,
                actor_id,
                totals,
                &mut steps,
            )
            .await;

        if let Err(e) = result {
            self.rollback(facility_id, steps).await;
            return Err(e);
        }

        // CAS guard: if a concurrent apply won the race, undo our mutations.
        if let Err(e) = self.changes.mark_applied(change_id).await {
            self.rollback(facility_id, steps).await;
            return Err(e);
        }

        Ok(())
    }

    async fn execute(
        &self,
        change: &Change,
        facility_id: FacilityId,
        provider_type: ProviderType,
        actor_id: Option<UserId>,
        totals: &mut AccessChangeTotals,
        steps: &mut Vec<ApplyStep>,
    ) -> FmsResult<()> {
        match change.change_type {
            ChangeType::TenantAdded => {
                self.apply_tenant_added(change, facility_id, provider_type, actor_id, totals, steps)
                    .await
            }
            ChangeType::TenantRemoved => {
                self.apply_tenant_removed_change(change, facility_id, provider_type, actor_id, totals, steps)
                    .await
            }
            ChangeType::TenantUpdated => {
                self.apply_tenant_updated(change, facility_id, provider_type)
                    .await
            }
            ChangeType::UnitAdded => {
                self.apply_unit_added(change, facility_id, provider_type, steps)
                    .await
            }
            ChangeType::UnitRemoved => {
                self.apply_unit_removed(change, facility_id, provider_type)
                    .await
            }
            ChangeType::UnitUpdated => {
                self.apply_unit_updated(change, facility_id, provider_type)
                    .await
            }
        }
    }

    async fn apply_tenant_added(
        &self,
        change: &Change,
        facility_id: FacilityId,
        provider_type: ProviderType,
        actor_id: Option<UserId>,
        totals: &mut AccessChangeTotals,
        steps: &mut Vec<ApplyStep>,
    ) -> FmsResult<()> {
        let fields: TenantFields = decode_payload(change.after_data.as_ref(), change.id)?;

        // Create or match the user account by email.
        let (user_id, created) = match &fields.email {
            Some(email) => match self.directory.find_user_by_email(email).await? {
                Some(existing) => (existing, false),
                None => {
                    let user_id = self
                        .directory
                        .create_user(&UserProfile {
                            name: fields.name.clone(),
                            email: fields.email.clone(),
                            phone: fields.phone.clone(),
                        })
                        .await?;
                    steps.push(ApplyStep::UserCreated(user_id));
                    (user_id, true)
                }
            },
            None => {
                let user_id = self
                    .directory
                    .create_user(&UserProfile {
                        name: fields.name.clone(),
                        email: None,
                        phone: fields.phone.clone(),
                    })
                    .await?;
                steps.push(ApplyStep::UserCreated(user_id));
                (user_id, true)
            }
        };

        let mapping = EntityMapping::new(
            facility_id,
            EntityType::Tenant,
            provider_type,
            &change.external_id,
            *user_id.as_uuid(),
        );
        self.mappings.create(&mapping).await?;
        steps.push(ApplyStep::MappingCreated(mapping));

        if let Some(unit_number) = &fields.unit_number {
            let unit_id = self
                .directory
                .find_unit_by_number(facility_id, unit_number)
                .await?
                .ok_or_else(|| {
                    FmsError::apply(
                        change.id,
                        format!("Unit {unit_number} does not exist in this facility"),
                    )
                })?;
            self.directory
                .create_assignment(facility_id, user_id, unit_id)
                .await?;
            steps.push(ApplyStep::AssignmentCreated { user_id, unit_id });
            totals.access_granted += 1;
            self.publish(facility_id, actor_id, &AccessGranted { user_id, unit_id })
                .await;
        }

        if created {
            totals.users_created += 1;
        }
        self.publish(facility_id, actor_id, &UserProvisioned { user_id, created })
            .await;

        Ok(())
    }

    async fn apply_tenant_removed_change(
        &self,
        change: &Change,
        facility_id: FacilityId,
        provider_type: ProviderType,
        actor_id: Option<UserId>,
        totals: &mut AccessChangeTotals,
        steps: &mut Vec<ApplyStep>,
    ) -> FmsResult<()> {
        let user_id = self
            .resolve_tenant(change, facility_id, provider_type)
            .await?;

        let removed = self
            .directory
            .remove_assignments(facility_id, user_id)
            .await?;
        if !removed.is_empty() {
            steps.push(ApplyStep::AssignmentsRemoved {
                user_id,
                unit_ids: removed.clone(),
            });
            totals.access_revoked += removed.len() as u32;
            self.publish(
                facility_id,
                actor_id,
                &AccessRevoked {
                    user_id,
                    assignments_removed: removed.len() as u64,
                },
            )
            .await;
        }

        if self.deactivate_if_orphaned(facility_id, user_id, actor_id).await? {
            totals.users_deactivated += 1;
        }

        Ok(())
    }

    async fn apply_tenant_updated(
        &self,
        change: &Change,
        facility_id: FacilityId,
        provider_type: ProviderType,
    ) -> FmsResult<()> {
        let user_id = self
            .resolve_tenant(change, facility_id, provider_type)
            .await?;
        let fields: TenantFields = decode_payload(change.after_data.as_ref(), change.id)?;

        self.directory
            .update_user(
                user_id,
                &UserProfile {
                    name: fields.name,
                    email: fields.email,
                    phone: fields.phone,
                },
            )
            .await
    }

    async fn apply_unit_added(
        &self,
        change: &Change,
        facility_id: FacilityId,
        provider_type: ProviderType,
        steps: &mut Vec<ApplyStep>,
    ) -> FmsResult<()> {
        let fields: UnitFields = decode_payload(change.after_data.as_ref(), change.id)?;
        let unit_number = fields.unit_number.ok_or_else(|| {
            FmsError::apply(change.id, "Unit change payload is missing unit_number")
        })?;

        let unit_id = self
            .directory
            .create_unit(
                facility_id,
                &UnitRecord {
                    unit_number,
                    status: fields.status,
                    rent_amount: fields.rent_amount,
                },
            )
            .await?;
        steps.push(ApplyStep::UnitCreated(unit_id));

        let mapping = EntityMapping::new(
            facility_id,
            EntityType::Unit,
            provider_type,
            &change.external_id,
            *unit_id.as_uuid(),
        );
        self.mappings.create(&mapping).await?;
        steps.push(ApplyStep::MappingCreated(mapping));

        Ok(())
    }

    async fn apply_unit_removed(
        &self,
        change: &Change,
        facility_id: FacilityId,
        provider_type: ProviderType,
    ) -> FmsResult<()> {
        let unit_id = self
            .resolve_unit(change, facility_id, provider_type)
            .await?;
        self.directory.retire_unit(unit_id).await
    }

    async fn apply_unit_updated(
        &self,
        change: &Change,
        facility_id: FacilityId,
        provider_type: ProviderType,
    ) -> FmsResult<()> {
        let unit_id = self
            .resolve_unit(change, facility_id, provider_type)
            .await?;
        let fields: UnitFields = decode_payload(change.after_data.as_ref(), change.id)?;

        self.directory
            .update_unit(
                unit_id,
                &UnitPatch {
                    unit_number: fields.unit_number,
                    status: fields.status,
                    rent_amount: fields.rent_amount,
                },
            )
            .await
    }

    /// Resolve a tenant change's external ID to a user through the
    /// facility-scoped mapping table.
    async fn resolve_tenant(
        &self,
        change: &Change,
        facility_id: FacilityId,
        provider_type: ProviderType,
    ) -> FmsResult<UserId> {
        let internal_id = self
            .mappings
            .resolve(
                facility_id,
                EntityType::Tenant,
                provider_type,
                &change.external_id,
            )
            .await?
            .ok_or_else(|| {
                FmsError::apply(
                    change.id,
                    format!("No mapping for tenant {} in this facility", change.external_id),
                )
            })?;
        Ok(UserId::from_uuid(internal_id))
    }

    /// Resolve a unit change's external ID and verify the unit belongs to
    /// the sync log's facility.
    async fn resolve_unit(
        &self,
        change: &Change,
        facility_id: FacilityId,
        provider_type: ProviderType,
    ) -> FmsResult<UnitId> {
        let internal_id = self
            .mappings
            .resolve(
                facility_id,
                EntityType::Unit,
                provider_type,
                &change.external_id,
            )
            .await?
            .ok_or_else(|| {
                FmsError::apply(
                    change.id,
                    format!("No mapping for unit {} in this facility", change.external_id),
                )
            })?;
        let unit_id = UnitId::from_uuid(internal_id);

        match self.directory.unit_facility(unit_id).await? {
            Some(owner) if owner == facility_id => Ok(unit_id),
            Some(_) => Err(FmsError::apply(
                change.id,
                "Unit belongs to a different facility",
            )),
            None => Err(FmsError::apply(change.id, "Unit record does not exist")),
        }
    }

    /// Deactivate the user iff, after removal, zero active assignments
    /// remain across all facilities.
    async fn deactivate_if_orphaned(
        &self,
        facility_id: FacilityId,
        user_id: UserId,
        actor_id: Option<UserId>,
    ) -> FmsResult<bool> {
        let remaining = self.directory.active_assignment_count(user_id).await?;
        if remaining > 0 {
            return Ok(false);
        }
        self.directory.deactivate_user(user_id).await?;
        self.publish(facility_id, actor_id, &UserDeactivated { user_id })
            .await;
        Ok(true)
    }

    /// Undo completed steps in reverse order. Best effort: a rollback
    /// failure is logged and the remaining steps still run.
    async fn rollback(&self, facility_id: FacilityId, steps: Vec<ApplyStep>) {
        for step in steps.into_iter().rev() {
            let result = match &step {
                ApplyStep::UserCreated(user_id) => self.directory.delete_user(*user_id).await,
                ApplyStep::MappingCreated(mapping) => self.mappings.delete(mapping.id).await,
                ApplyStep::AssignmentCreated { user_id, unit_id } => self
                    .directory
                    .remove_assignment(facility_id, *user_id, *unit_id)
                    .await
                    .map(|_| ()),
                ApplyStep::AssignmentsRemoved { user_id, unit_ids } => {
                    let mut result = Ok(());
                    for unit_id in unit_ids {
                        if let Err(e) = self
                            .directory
                            .create_assignment(facility_id, *user_id, *unit_id)
                            .await
                        {
                            result = Err(e);
                        }
                    }
                    result
                }
                ApplyStep::UnitCreated(unit_id) => self.directory.retire_unit(*unit_id).await,
            };
            if let Err(e) = result {
                warn!(
                    facility_id = %facility_id,
                    step = ?step,
                    error = %e,
                    "Rollback step failed"
                );
            }
        }
    }

    async fn publish<E: AccessEvent>(
        &self,
        facility_id: FacilityId,
        actor_id: Option<UserId>,
        event: &E,
    ) {
        match EventEnvelope::new(event, facility_id, actor_id) {
            Ok(envelope) => {
                if let Err(e) = self.publisher.publish(envelope).await {
                    warn!(error = %e, "Failed to publish access event");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode access event"),
        }
    }
}

fn decode_payload<T: serde::de::DeserializeOwned + Default>(
    data: Option<&serde_json::Value>,
    change_id: ChangeId,
) -> FmsResult<T> {
    match data {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| FmsError::apply(change_id, format!("Malformed change payload: {e}"))),
        None => Ok(T::default()),
    }
}
