//! Facility-Isolation Trait
//!
//! This module provides the trait that marks an entity as belonging to a
//! specific facility.
//!
//! # Example
//!
//! ```
//! use latchkey_core::{FacilityId, FacilityScoped};
//!
//! struct UnitAssignment {
//!     facility_id: FacilityId,
//!     unit_number: String,
//! }
//!
//! impl FacilityScoped for UnitAssignment {
//!     fn facility_id(&self) -> FacilityId {
//!         self.facility_id
//!     }
//! }
//!
//! // Generic function that works with any facility-scoped entity
//! fn verify_facility<T: FacilityScoped>(entity: &T, expected: FacilityId) -> bool {
//!     entity.facility_id() == expected
//! }
//!
//! let facility = FacilityId::new();
//! let assignment = UnitAssignment {
//!     facility_id: facility,
//!     unit_number: "A-101".to_string(),
//! };
//!
//! assert!(verify_facility(&assignment, facility));
//! ```

use crate::ids::FacilityId;

/// Trait for entities that belong to a specific facility.
///
/// Implementing this trait marks an entity as facility-scoped, enabling
/// generic verification that facility isolation is properly enforced.
///
/// # Object Safety
///
/// This trait is object-safe, meaning it can be used with trait objects:
/// `Box<dyn FacilityScoped>` or `&dyn FacilityScoped`.
pub trait FacilityScoped {
    /// Returns the facility ID that owns this entity.
    ///
    /// This method returns an owned `FacilityId` (which is `Copy`) for
    /// convenience, allowing callers to use the value without lifetime
    /// concerns.
    fn facility_id(&self) -> FacilityId;
}
