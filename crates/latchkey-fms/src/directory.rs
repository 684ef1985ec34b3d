//! Internal directory seam.
//!
//! The engine never reaches for persistence modules at call time; it is
//! constructed with a [`DirectoryService`] implementation covering users,
//! unit records, and unit assignments. Production wires this to the
//! access-control database; tests inject in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use latchkey_core::{FacilityId, UnitId, UserId};

use crate::error::FmsResult;

/// A renter as known to the internal access-control database, restricted to
/// the fields the diff engine compares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalTenant {
    /// Internal user account.
    pub user_id: UserId,
    /// Display name.
    pub name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Unit the tenant rents in this facility.
    pub unit_number: Option<String>,
    /// Whether the account is active.
    pub is_active: bool,
}

/// A storage unit as known internally, restricted to the compared fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalUnit {
    /// Internal unit record.
    pub unit_id: UnitId,
    /// Unit number (label within the facility).
    pub unit_number: String,
    /// Normalized status string.
    pub status: Option<String>,
    /// Monthly rent in cents.
    pub rent_amount: Option<i64>,
}

/// Point-in-time internal state of one facility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacilityRoster {
    /// Tenants with a presence in this facility.
    pub tenants: Vec<InternalTenant>,
    /// Units of this facility.
    pub units: Vec<InternalUnit>,
}

/// Identity fields for creating or updating a user account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    /// Display name.
    pub name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
}

/// Fields for creating a unit record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Unit number (label within the facility).
    pub unit_number: String,
    /// Normalized status string.
    pub status: Option<String>,
    /// Monthly rent in cents.
    pub rent_amount: Option<i64>,
}

/// Partial update for a unit record; `None` means unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitPatch {
    /// New unit number.
    pub unit_number: Option<String>,
    /// New status string.
    pub status: Option<String>,
    /// New monthly rent in cents.
    pub rent_amount: Option<i64>,
}

/// Abstraction over the internal users/units/assignments tables.
///
/// Every mutating method is facility-scoped by parameter; implementations
/// must not fan out beyond the given facility. The one deliberate exception
/// is [`active_assignment_count`](DirectoryService::active_assignment_count),
/// which counts across all facilities so the apply engine can decide whether
/// a removed tenant is orphaned.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Current internal tenant/unit state for a facility.
    async fn facility_roster(&self, facility_id: FacilityId) -> FmsResult<FacilityRoster>;

    /// Find an existing user account by email.
    async fn find_user_by_email(&self, email: &str) -> FmsResult<Option<UserId>>;

    /// Create a new active user account.
    async fn create_user(&self, profile: &UserProfile) -> FmsResult<UserId>;

    /// Update identity fields on an existing user; `None` fields are left
    /// unchanged.
    async fn update_user(&self, user_id: UserId, profile: &UserProfile) -> FmsResult<()>;

    /// Deactivate a user account.
    async fn deactivate_user(&self, user_id: UserId) -> FmsResult<()>;

    /// Hard-delete a user account. Only used to roll back an account created
    /// moments earlier by a failed apply step.
    async fn delete_user(&self, user_id: UserId) -> FmsResult<()>;

    /// Number of active unit assignments the user holds across all
    /// facilities.
    async fn active_assignment_count(&self, user_id: UserId) -> FmsResult<u64>;

    /// Grant the user access to a unit in this facility.
    async fn create_assignment(
        &self,
        facility_id: FacilityId,
        user_id: UserId,
        unit_id: UnitId,
    ) -> FmsResult<()>;

    /// Revoke one assignment in this facility. Returns whether it existed.
    async fn remove_assignment(
        &self,
        facility_id: FacilityId,
        user_id: UserId,
        unit_id: UnitId,
    ) -> FmsResult<bool>;

    /// Revoke every assignment the user holds in this facility only.
    /// Returns the units whose assignments were removed.
    async fn remove_assignments(
        &self,
        facility_id: FacilityId,
        user_id: UserId,
    ) -> FmsResult<Vec<UnitId>>;

    /// Resolve a unit by number within a facility.
    async fn find_unit_by_number(
        &self,
        facility_id: FacilityId,
        unit_number: &str,
    ) -> FmsResult<Option<UnitId>>;

    /// The facility a unit record belongs to, if the unit exists.
    async fn unit_facility(&self, unit_id: UnitId) -> FmsResult<Option<FacilityId>>;

    /// Create a unit record in this facility.
    async fn create_unit(&self, facility_id: FacilityId, record: &UnitRecord)
        -> FmsResult<UnitId>;

    /// Update a unit record; `None` fields are left unchanged.
    async fn update_unit(&self, unit_id: UnitId, patch: &UnitPatch) -> FmsResult<()>;

    /// Retire a unit record (kept for history, no longer rentable).
    async fn retire_unit(&self, unit_id: UnitId) -> FmsResult<()>;
}
