//! Shared in-memory fakes for engine integration tests.
//!
//! Mirrors the production trait seams: one `MemStore` implements every
//! storage trait, `MemDirectory` implements the directory seam, and
//! `MockAdapter` plays the external provider with switchable behavior.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use latchkey_core::{ChangeId, FacilityId, FmsConfigId, MappingId, SyncLogId, UnitId, UserId};
use latchkey_fms::adapter::{ExternalEntity, FmsAdapter};
use latchkey_fms::change::{Change, ChangeStore, ReviewCas};
use latchkey_fms::config::{FmsConfigStore, FmsConfiguration};
use latchkey_fms::directory::{
    DirectoryService, FacilityRoster, InternalTenant, InternalUnit, UnitPatch, UnitRecord,
    UserProfile,
};
use latchkey_fms::error::{FmsError, FmsResult};
use latchkey_fms::log::{SyncCounts, SyncLog, SyncLogStore};
use latchkey_fms::mapping::{EntityMapping, EntityMappingStore};
use latchkey_fms::types::{EntityType, ProviderType, ReviewDecision, SyncRunStatus, TriggeredBy};

// =============================================================================
// In-memory storage
// =============================================================================

type MappingKey = (FacilityId, EntityType, ProviderType, String);

/// One struct backing every storage trait, so tests wire a single `Arc`.
#[derive(Default)]
pub struct MemStore {
    configs: Mutex<HashMap<FacilityId, FmsConfiguration>>,
    logs: Mutex<HashMap<SyncLogId, SyncLog>>,
    changes: Mutex<HashMap<ChangeId, Change>>,
    mappings: Mutex<HashMap<MappingKey, EntityMapping>>,
}

#[allow(dead_code)]
impl MemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_config(&self, config: FmsConfiguration) {
        self.configs
            .lock()
            .unwrap()
            .insert(config.facility_id, config);
    }

    pub fn log(&self, id: SyncLogId) -> Option<SyncLog> {
        self.logs.lock().unwrap().get(&id).cloned()
    }

    pub fn change(&self, id: ChangeId) -> Option<Change> {
        self.changes.lock().unwrap().get(&id).cloned()
    }

    pub fn changes_for_log(&self, sync_log_id: SyncLogId) -> Vec<Change> {
        self.changes
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.sync_log_id == sync_log_id)
            .cloned()
            .collect()
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.lock().unwrap().len()
    }

    pub fn insert_mapping(&self, mapping: EntityMapping) {
        let key = (
            mapping.facility_id,
            mapping.entity_type,
            mapping.provider_type,
            mapping.external_id.clone(),
        );
        self.mappings.lock().unwrap().insert(key, mapping);
    }
}

#[async_trait]
impl FmsConfigStore for MemStore {
    async fn get_for_facility(
        &self,
        facility_id: FacilityId,
    ) -> FmsResult<Option<FmsConfiguration>> {
        Ok(self.configs.lock().unwrap().get(&facility_id).cloned())
    }

    async fn get(&self, id: FmsConfigId) -> FmsResult<Option<FmsConfiguration>> {
        Ok(self
            .configs
            .lock()
            .unwrap()
            .values()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn save(&self, config: &FmsConfiguration) -> FmsResult<()> {
        self.insert_config(config.clone());
        Ok(())
    }
}

#[async_trait]
impl SyncLogStore for MemStore {
    async fn create_running(
        &self,
        facility_id: FacilityId,
        fms_config_id: FmsConfigId,
        triggered_by: TriggeredBy,
    ) -> FmsResult<SyncLog> {
        let mut logs = self.logs.lock().unwrap();
        if logs
            .values()
            .any(|l| l.facility_id == facility_id && l.status == SyncRunStatus::Running)
        {
            return Err(FmsError::conflict(format!(
                "A sync is already running for facility {facility_id}"
            )));
        }
        let log = SyncLog {
            id: SyncLogId::new(),
            facility_id,
            fms_config_id,
            status: SyncRunStatus::Running,
            triggered_by,
            requires_review: false,
            error_message: None,
            counts: SyncCounts::default(),
            started_at: Utc::now(),
            completed_at: None,
        };
        logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn mark_completed(
        &self,
        id: SyncLogId,
        counts: SyncCounts,
        requires_review: bool,
    ) -> FmsResult<SyncLog> {
        let mut logs = self.logs.lock().unwrap();
        let log = logs
            .get_mut(&id)
            .ok_or_else(|| FmsError::not_found("Sync log", id))?;
        if log.status != SyncRunStatus::Running {
            return Err(FmsError::conflict(format!("Sync log {id} is already finalized")));
        }
        log.status = SyncRunStatus::Completed;
        log.counts = counts;
        log.requires_review = requires_review;
        log.completed_at = Some(Utc::now());
        Ok(log.clone())
    }

    async fn mark_failed(&self, id: SyncLogId, reason: &str) -> FmsResult<SyncLog> {
        let mut logs = self.logs.lock().unwrap();
        let log = logs
            .get_mut(&id)
            .ok_or_else(|| FmsError::not_found("Sync log", id))?;
        if log.status != SyncRunStatus::Running {
            return Err(FmsError::conflict(format!("Sync log {id} is already finalized")));
        }
        log.status = SyncRunStatus::Failed;
        log.error_message = Some(reason.to_string());
        log.completed_at = Some(Utc::now());
        Ok(log.clone())
    }

    async fn update_counts(&self, id: SyncLogId, counts: SyncCounts) -> FmsResult<()> {
        let mut logs = self.logs.lock().unwrap();
        if let Some(log) = logs.get_mut(&id) {
            log.counts = counts;
        }
        Ok(())
    }

    async fn get(&self, id: SyncLogId) -> FmsResult<Option<SyncLog>> {
        Ok(self.logs.lock().unwrap().get(&id).cloned())
    }

    async fn list_for_facility(
        &self,
        facility_id: FacilityId,
        limit: u32,
        offset: u32,
    ) -> FmsResult<Vec<SyncLog>> {
        let mut logs: Vec<SyncLog> = self
            .logs
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.facility_id == facility_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(logs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[async_trait]
impl ChangeStore for MemStore {
    async fn insert_all(&self, changes: &[Change]) -> FmsResult<()> {
        let mut map = self.changes.lock().unwrap();
        for change in changes {
            map.insert(change.id, change.clone());
        }
        Ok(())
    }

    async fn get(&self, id: ChangeId) -> FmsResult<Option<Change>> {
        Ok(self.changes.lock().unwrap().get(&id).cloned())
    }

    async fn list_for_log(&self, sync_log_id: SyncLogId) -> FmsResult<Vec<Change>> {
        let mut changes: Vec<Change> = self
            .changes
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.sync_log_id == sync_log_id)
            .cloned()
            .collect();
        changes.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(changes)
    }

    async fn list_pending(&self, sync_log_id: SyncLogId) -> FmsResult<Vec<Change>> {
        Ok(self
            .list_for_log(sync_log_id)
            .await?
            .into_iter()
            .filter(Change::is_pending_review)
            .collect())
    }

    async fn review(
        &self,
        id: ChangeId,
        decision: ReviewDecision,
        reviewer: UserId,
    ) -> FmsResult<Option<ReviewCas>> {
        let mut map = self.changes.lock().unwrap();
        let Some(change) = map.get_mut(&id) else {
            return Ok(None);
        };
        if change.is_reviewed {
            return Ok(Some(ReviewCas {
                change: change.clone(),
                newly_reviewed: false,
            }));
        }
        change.is_reviewed = true;
        change.decision = Some(decision);
        change.reviewed_by = Some(reviewer);
        change.reviewed_at = Some(Utc::now());
        Ok(Some(ReviewCas {
            change: change.clone(),
            newly_reviewed: true,
        }))
    }

    async fn mark_applied(&self, id: ChangeId) -> FmsResult<Change> {
        let mut map = self.changes.lock().unwrap();
        let change = map
            .get_mut(&id)
            .ok_or_else(|| FmsError::not_found("Change", id))?;
        if change.applied_at.is_some() {
            return Err(FmsError::conflict(format!("Change {id} is already applied")));
        }
        change.applied_at = Some(Utc::now());
        Ok(change.clone())
    }
}

#[async_trait]
impl EntityMappingStore for MemStore {
    async fn resolve(
        &self,
        facility_id: FacilityId,
        entity_type: EntityType,
        provider_type: ProviderType,
        external_id: &str,
    ) -> FmsResult<Option<Uuid>> {
        let key = (facility_id, entity_type, provider_type, external_id.to_string());
        Ok(self
            .mappings
            .lock()
            .unwrap()
            .get(&key)
            .map(|m| m.internal_id))
    }

    async fn create(&self, mapping: &EntityMapping) -> FmsResult<()> {
        let key = (
            mapping.facility_id,
            mapping.entity_type,
            mapping.provider_type,
            mapping.external_id.clone(),
        );
        let mut map = self.mappings.lock().unwrap();
        if map.contains_key(&key) {
            return Err(FmsError::conflict(format!(
                "Mapping already exists for {} {}",
                mapping.entity_type, mapping.external_id
            )));
        }
        map.insert(key, mapping.clone());
        Ok(())
    }

    async fn list_for_facility(
        &self,
        facility_id: FacilityId,
        provider_type: ProviderType,
    ) -> FmsResult<Vec<EntityMapping>> {
        Ok(self
            .mappings
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.facility_id == facility_id && m.provider_type == provider_type)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: MappingId) -> FmsResult<()> {
        let mut map = self.mappings.lock().unwrap();
        map.retain(|_, m| m.id != id);
        Ok(())
    }

    async fn delete_for_facility(&self, facility_id: FacilityId) -> FmsResult<u64> {
        let mut map = self.mappings.lock().unwrap();
        let before = map.len();
        map.retain(|_, m| m.facility_id != facility_id);
        Ok((before - map.len()) as u64)
    }
}

// =============================================================================
// In-memory directory
// =============================================================================

#[derive(Debug, Clone)]
struct UserState {
    profile: UserProfile,
    is_active: bool,
}

#[derive(Debug, Clone)]
struct UnitState {
    facility_id: FacilityId,
    record: UnitRecord,
    retired: bool,
}

/// In-memory users/units/assignments with behavior switches for failure
/// injection.
#[derive(Default)]
pub struct MemDirectory {
    users: Mutex<HashMap<UserId, UserState>>,
    units: Mutex<HashMap<UnitId, UnitState>>,
    assignments: Mutex<HashSet<(FacilityId, UserId, UnitId)>>,
    fail_create_assignment: AtomicBool,
    deactivate_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MemDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every `create_assignment` call fail, to exercise rollback.
    pub fn fail_next_assignment(&self) {
        self.fail_create_assignment.store(true, Ordering::SeqCst);
    }

    pub fn add_user(&self, profile: UserProfile) -> UserId {
        let user_id = UserId::new();
        self.users.lock().unwrap().insert(
            user_id,
            UserState {
                profile,
                is_active: true,
            },
        );
        user_id
    }

    pub fn add_unit(&self, facility_id: FacilityId, unit_number: &str) -> UnitId {
        let unit_id = UnitId::new();
        self.units.lock().unwrap().insert(
            unit_id,
            UnitState {
                facility_id,
                record: UnitRecord {
                    unit_number: unit_number.to_string(),
                    status: Some("occupied".to_string()),
                    rent_amount: Some(10_000),
                },
                retired: false,
            },
        );
        unit_id
    }

    pub fn add_assignment(&self, facility_id: FacilityId, user_id: UserId, unit_id: UnitId) {
        self.assignments
            .lock()
            .unwrap()
            .insert((facility_id, user_id, unit_id));
    }

    pub fn user_exists(&self, user_id: UserId) -> bool {
        self.users.lock().unwrap().contains_key(&user_id)
    }

    pub fn user_is_active(&self, user_id: UserId) -> bool {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|u| u.is_active)
            .unwrap_or(false)
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn assignment_exists(
        &self,
        facility_id: FacilityId,
        user_id: UserId,
        unit_id: UnitId,
    ) -> bool {
        self.assignments
            .lock()
            .unwrap()
            .contains(&(facility_id, user_id, unit_id))
    }

    pub fn unit_is_retired(&self, unit_id: UnitId) -> bool {
        self.units
            .lock()
            .unwrap()
            .get(&unit_id)
            .map(|u| u.retired)
            .unwrap_or(false)
    }

    pub fn deactivate_calls(&self) -> usize {
        self.deactivate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryService for MemDirectory {
    async fn facility_roster(&self, facility_id: FacilityId) -> FmsResult<FacilityRoster> {
        let users = self.users.lock().unwrap();
        let units = self.units.lock().unwrap();
        let assignments = self.assignments.lock().unwrap();

        let tenants = users
            .iter()
            .filter(|(user_id, _)| {
                assignments
                    .iter()
                    .any(|(f, u, _)| *f == facility_id && u == *user_id)
            })
            .map(|(user_id, state)| {
                let unit_number = assignments
                    .iter()
                    .find(|(f, u, _)| *f == facility_id && u == user_id)
                    .and_then(|(_, _, unit_id)| units.get(unit_id))
                    .map(|u| u.record.unit_number.clone());
                InternalTenant {
                    user_id: *user_id,
                    name: state.profile.name.clone(),
                    email: state.profile.email.clone(),
                    phone: state.profile.phone.clone(),
                    unit_number,
                    is_active: state.is_active,
                }
            })
            .collect();

        let units = units
            .iter()
            .filter(|(_, state)| state.facility_id == facility_id && !state.retired)
            .map(|(unit_id, state)| InternalUnit {
                unit_id: *unit_id,
                unit_number: state.record.unit_number.clone(),
                status: state.record.status.clone(),
                rent_amount: state.record.rent_amount,
            })
            .collect();

        Ok(FacilityRoster { tenants, units })
    }

    async fn find_user_by_email(&self, email: &str) -> FmsResult<Option<UserId>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|(_, state)| state.profile.email.as_deref() == Some(email))
            .map(|(user_id, _)| *user_id))
    }

    async fn create_user(&self, profile: &UserProfile) -> FmsResult<UserId> {
        let user_id = UserId::new();
        self.users.lock().unwrap().insert(
            user_id,
            UserState {
                profile: profile.clone(),
                is_active: true,
            },
        );
        Ok(user_id)
    }

    async fn update_user(&self, user_id: UserId, profile: &UserProfile) -> FmsResult<()> {
        let mut users = self.users.lock().unwrap();
        let state = users
            .get_mut(&user_id)
            .ok_or_else(|| FmsError::not_found("User", user_id))?;
        if profile.name.is_some() {
            state.profile.name = profile.name.clone();
        }
        if profile.email.is_some() {
            state.profile.email = profile.email.clone();
        }
        if profile.phone.is_some() {
            state.profile.phone = profile.phone.clone();
        }
        Ok(())
    }

    async fn deactivate_user(&self, user_id: UserId) -> FmsResult<()> {
        self.deactivate_calls.fetch_add(1, Ordering::SeqCst);
        let mut users = self.users.lock().unwrap();
        let state = users
            .get_mut(&user_id)
            .ok_or_else(|| FmsError::not_found("User", user_id))?;
        state.is_active = false;
        Ok(())
    }

    async fn delete_user(&self, user_id: UserId) -> FmsResult<()> {
        self.users.lock().unwrap().remove(&user_id);
        Ok(())
    }

    async fn active_assignment_count(&self, user_id: UserId) -> FmsResult<u64> {
        Ok(self
            .assignments
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, u, _)| *u == user_id)
            .count() as u64)
    }

    async fn create_assignment(
        &self,
        facility_id: FacilityId,
        user_id: UserId,
        unit_id: UnitId,
    ) -> FmsResult<()> {
        if self.fail_create_assignment.load(Ordering::SeqCst) {
            return Err(FmsError::internal("Injected assignment failure"));
        }
        self.assignments
            .lock()
            .unwrap()
            .insert((facility_id, user_id, unit_id));
        Ok(())
    }

    async fn remove_assignment(
        &self,
        facility_id: FacilityId,
        user_id: UserId,
        unit_id: UnitId,
    ) -> FmsResult<bool> {
        Ok(self
            .assignments
            .lock()
            .unwrap()
            .remove(&(facility_id, user_id, unit_id)))
    }

    async fn remove_assignments(
        &self,
        facility_id: FacilityId,
        user_id: UserId,
    ) -> FmsResult<Vec<UnitId>> {
        let mut assignments = self.assignments.lock().unwrap();
        let removed: Vec<UnitId> = assignments
            .iter()
            .filter(|(f, u, _)| *f == facility_id && *u == user_id)
            .map(|(_, _, unit_id)| *unit_id)
            .collect();
        assignments.retain(|(f, u, _)| !(*f == facility_id && *u == user_id));
        Ok(removed)
    }

    async fn find_unit_by_number(
        &self,
        facility_id: FacilityId,
        unit_number: &str,
    ) -> FmsResult<Option<UnitId>> {
        Ok(self
            .units
            .lock()
            .unwrap()
            .iter()
            .find(|(_, state)| {
                state.facility_id == facility_id
                    && state.record.unit_number == unit_number
                    && !state.retired
            })
            .map(|(unit_id, _)| *unit_id))
    }

    async fn unit_facility(&self, unit_id: UnitId) -> FmsResult<Option<FacilityId>> {
        Ok(self
            .units
            .lock()
            .unwrap()
            .get(&unit_id)
            .map(|state| state.facility_id))
    }

    async fn create_unit(
        &self,
        facility_id: FacilityId,
        record: &UnitRecord,
    ) -> FmsResult<UnitId> {
        let unit_id = UnitId::new();
        self.units.lock().unwrap().insert(
            unit_id,
            UnitState {
                facility_id,
                record: record.clone(),
                retired: false,
            },
        );
        Ok(unit_id)
    }

    async fn update_unit(&self, unit_id: UnitId, patch: &UnitPatch) -> FmsResult<()> {
        let mut units = self.units.lock().unwrap();
        let state = units
            .get_mut(&unit_id)
            .ok_or_else(|| FmsError::not_found("Unit", unit_id))?;
        if let Some(unit_number) = &patch.unit_number {
            state.record.unit_number = unit_number.clone();
        }
        if let Some(status) = &patch.status {
            state.record.status = Some(status.clone());
        }
        if let Some(rent_amount) = patch.rent_amount {
            state.record.rent_amount = Some(rent_amount);
        }
        Ok(())
    }

    async fn retire_unit(&self, unit_id: UnitId) -> FmsResult<()> {
        let mut units = self.units.lock().unwrap();
        let state = units
            .get_mut(&unit_id)
            .ok_or_else(|| FmsError::not_found("Unit", unit_id))?;
        state.retired = true;
        Ok(())
    }
}

// =============================================================================
// Mock provider adapter
// =============================================================================

/// Adapter with a configurable snapshot and switchable failure behavior.
#[derive(Default)]
pub struct MockAdapter {
    tenants: Mutex<Vec<ExternalEntity>>,
    units: Mutex<Vec<ExternalEntity>>,
    fail_fetch: AtomicBool,
    fetch_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_tenants(&self, tenants: Vec<ExternalEntity>) {
        *self.tenants.lock().unwrap() = tenants;
    }

    pub fn set_units(&self, units: Vec<ExternalEntity>) {
        *self.units.lock().unwrap() = units;
    }

    pub fn with_fetch_error(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FmsAdapter for MockAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Sitelink
    }

    async fn fetch_tenants(&self, _config: &FmsConfiguration) -> FmsResult<Vec<ExternalEntity>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FmsError::provider(
                ProviderType::Sitelink,
                "Connection refused",
            ));
        }
        Ok(self.tenants.lock().unwrap().clone())
    }

    async fn fetch_units(&self, _config: &FmsConfiguration) -> FmsResult<Vec<ExternalEntity>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FmsError::provider(
                ProviderType::Sitelink,
                "Connection refused",
            ));
        }
        Ok(self.units.lock().unwrap().clone())
    }
}

// =============================================================================
// Harness wiring
// =============================================================================

/// Everything a test needs: the wired service plus handles to the fakes.
#[allow(dead_code)]
pub struct Harness {
    pub service: latchkey_fms::service::FmsService,
    pub store: Arc<MemStore>,
    pub directory: Arc<MemDirectory>,
    pub adapter: Arc<MockAdapter>,
    pub facility_id: FacilityId,
}

#[allow(dead_code)]
impl Harness {
    /// Wire the full engine over in-memory fakes, with one configured
    /// facility.
    pub fn new() -> Self {
        let store = MemStore::new();
        let directory = MemDirectory::new();
        let adapter = MockAdapter::new();
        let facility_id = FacilityId::new();

        store.insert_config(FmsConfiguration::new(
            facility_id,
            ProviderType::Sitelink,
            serde_json::json!({"site_code": "test"}),
        ));

        Self {
            service: build_service(&store, &directory, &adapter),
            store,
            directory,
            adapter,
            facility_id,
        }
    }

    /// Register a second facility sharing the same provider and adapter.
    pub fn add_facility(&self) -> FacilityId {
        let facility_id = FacilityId::new();
        self.store.insert_config(FmsConfiguration::new(
            facility_id,
            ProviderType::Sitelink,
            serde_json::json!({"site_code": "test-2"}),
        ));
        facility_id
    }
}

pub fn build_service(
    store: &Arc<MemStore>,
    directory: &Arc<MemDirectory>,
    adapter: &Arc<MockAdapter>,
) -> latchkey_fms::service::FmsService {
    use latchkey_fms::adapter::AdapterRegistry;
    use latchkey_fms::apply::ApplyEngine;
    use latchkey_fms::config::SyncSettings;
    use latchkey_fms::events::NullPublisher;
    use latchkey_fms::orchestrator::SyncOrchestrator;
    use latchkey_fms::review::ReviewService;
    use latchkey_fms::service::FmsService;

    let registry = Arc::new(AdapterRegistry::new().with(adapter.clone()));
    let settings = SyncSettings::default();

    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        directory.clone(),
        registry,
        settings.clone(),
    );
    let review = ReviewService::new(store.clone(), store.clone());
    let apply = ApplyEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        directory.clone(),
        Arc::new(NullPublisher),
    );

    FmsService::new(orchestrator, review, apply, store.clone(), settings)
}
