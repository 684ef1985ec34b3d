//! Common types for FMS synchronization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// External property-management provider.
///
/// Closed set: adding a provider means adding a variant and registering an
/// adapter for it, never dispatching on a free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// SiteLink by Storable.
    Sitelink,
    /// storEDGE.
    Storedge,
    /// Yardi Breeze.
    Yardi,
}

impl ProviderType {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Sitelink => "sitelink",
            ProviderType::Storedge => "storedge",
            ProviderType::Yardi => "yardi",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sitelink" => Ok(ProviderType::Sitelink),
            "storedge" => Ok(ProviderType::Storedge),
            "yardi" => Ok(ProviderType::Yardi),
            _ => Err(format!("Unknown provider type: {s}")),
        }
    }
}

/// Kind of entity a change or mapping refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A renter with (potential) unit access.
    Tenant,
    /// A rentable storage unit.
    Unit,
}

impl EntityType {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Tenant => "tenant",
            EntityType::Unit => "unit",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tenant" => Ok(EntityType::Tenant),
            "unit" => Ok(EntityType::Unit),
            _ => Err(format!("Unknown entity type: {s}")),
        }
    }
}

/// Kind of difference detected between external and internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// External tenant with no internal counterpart.
    TenantAdded,
    /// Internal tenant no longer present externally.
    TenantRemoved,
    /// Tenant present on both sides with field differences.
    TenantUpdated,
    /// External unit with no internal counterpart.
    UnitAdded,
    /// Internal unit no longer present externally.
    UnitRemoved,
    /// Unit present on both sides with field differences.
    UnitUpdated,
}

impl ChangeType {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::TenantAdded => "tenant_added",
            ChangeType::TenantRemoved => "tenant_removed",
            ChangeType::TenantUpdated => "tenant_updated",
            ChangeType::UnitAdded => "unit_added",
            ChangeType::UnitRemoved => "unit_removed",
            ChangeType::UnitUpdated => "unit_updated",
        }
    }

    /// The entity type this change operates on.
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        match self {
            ChangeType::TenantAdded | ChangeType::TenantRemoved | ChangeType::TenantUpdated => {
                EntityType::Tenant
            }
            ChangeType::UnitAdded | ChangeType::UnitRemoved | ChangeType::UnitUpdated => {
                EntityType::Unit
            }
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tenant_added" => Ok(ChangeType::TenantAdded),
            "tenant_removed" => Ok(ChangeType::TenantRemoved),
            "tenant_updated" => Ok(ChangeType::TenantUpdated),
            "unit_added" => Ok(ChangeType::UnitAdded),
            "unit_removed" => Ok(ChangeType::UnitRemoved),
            "unit_updated" => Ok(ChangeType::UnitUpdated),
            _ => Err(format!("Unknown change type: {s}")),
        }
    }
}

/// Status of a synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    /// Run is in progress.
    Running,
    /// Run finished and its changes were persisted.
    Completed,
    /// Run aborted; no changes were persisted.
    Failed,
}

impl SyncRunStatus {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncRunStatus::Completed | SyncRunStatus::Failed)
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(SyncRunStatus::Running),
            "completed" => Ok(SyncRunStatus::Completed),
            "failed" => Ok(SyncRunStatus::Failed),
            _ => Err(format!("Unknown sync run status: {s}")),
        }
    }
}

/// How a synchronization run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    /// Triggered by an administrator request.
    Manual,
    /// Triggered by an external scheduler.
    Scheduled,
}

impl TriggeredBy {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Manual => "manual",
            TriggeredBy::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(TriggeredBy::Manual),
            "scheduled" => Ok(TriggeredBy::Scheduled),
            _ => Err(format!("Unknown trigger: {s}")),
        }
    }
}

/// Terminal decision recorded by a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Change may be applied.
    Accepted,
    /// Change must never be applied.
    Rejected,
}

impl ReviewDecision {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Accepted => "accepted",
            ReviewDecision::Rejected => "rejected",
        }
    }

    /// Build a decision from the caller's boolean accept flag.
    #[must_use]
    pub fn from_accepted(accepted: bool) -> Self {
        if accepted {
            ReviewDecision::Accepted
        } else {
            ReviewDecision::Rejected
        }
    }
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReviewDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accepted" => Ok(ReviewDecision::Accepted),
            "rejected" => Ok(ReviewDecision::Rejected),
            _ => Err(format!("Unknown review decision: {s}")),
        }
    }
}

/// A mutation intent attached to a change by the diff engine.
///
/// The apply engine executes these in order; the review layer uses them to
/// decide whether a run requires human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAction {
    /// Record the external-to-internal identity link.
    CreateMapping,
    /// Create a user account or match an existing one by email.
    CreateOrMatchUser,
    /// Update identity fields on an existing user.
    UpdateUser,
    /// Grant the tenant access to a unit in this facility.
    GrantUnitAccess,
    /// Revoke the tenant's access to a unit in this facility.
    RevokeUnitAccess,
    /// Deactivate the user if no active assignments remain anywhere.
    DeactivateUserIfOrphaned,
    /// Create a unit record.
    CreateUnit,
    /// Update a unit record.
    UpdateUnit,
    /// Retire a unit record.
    RetireUnit,
}

impl RequiredAction {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RequiredAction::CreateMapping => "create_mapping",
            RequiredAction::CreateOrMatchUser => "create_or_match_user",
            RequiredAction::UpdateUser => "update_user",
            RequiredAction::GrantUnitAccess => "grant_unit_access",
            RequiredAction::RevokeUnitAccess => "revoke_unit_access",
            RequiredAction::DeactivateUserIfOrphaned => "deactivate_user_if_orphaned",
            RequiredAction::CreateUnit => "create_unit",
            RequiredAction::UpdateUnit => "update_unit",
            RequiredAction::RetireUnit => "retire_unit",
        }
    }

    /// Whether this action creates, disables, or revokes identity or access.
    ///
    /// Any change carrying one of these forces the run into review.
    #[must_use]
    pub fn is_security_sensitive(&self) -> bool {
        matches!(
            self,
            RequiredAction::CreateOrMatchUser
                | RequiredAction::DeactivateUserIfOrphaned
                | RequiredAction::RevokeUnitAccess
        )
    }
}

impl fmt::Display for RequiredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
