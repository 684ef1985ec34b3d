//! latchkey Core Library
//!
//! Shared types for latchkey services.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (FacilityId, UserId, UnitId, ...)
//! - [`scope`] - Facility-isolation trait (FacilityScoped)
//!
//! # Example
//!
//! ```
//! use latchkey_core::{FacilityId, UserId, FacilityScoped};
//!
//! let facility_id = FacilityId::new();
//! let user_id = UserId::new();
//! ```

pub mod ids;
pub mod scope;

// Re-export main types for convenient access
pub use ids::{
    ChangeId, FacilityId, FmsConfigId, MappingId, ParseIdError, SyncLogId, UnitId, UserId,
};
pub use scope::FacilityScoped;
