//! # FMS Synchronization Engine
//!
//! Reconciles tenant and unit rosters held by an external property-management
//! system with the internal access-control database. Instead of applying
//! provider state blindly, a sync run produces a human-reviewable change set;
//! only reviewed-and-accepted changes mutate users, units, and assignments,
//! and every mutation is scoped to the facility that owns the run.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Provider Adapter │────►│   Diff Engine   │────►│  Change Store   │
//! │ (SiteLink/...)   │     │                 │     │  (pending)      │
//! └──────────────────┘     └────────┬────────┘     └────────┬────────┘
//!                                   │                       │ review
//!                          ┌────────▼────────┐     ┌────────▼────────┐
//!                          │  Mapping Store  │     │  Apply Engine   │
//!                          │ (ext ↔ internal)│     │                 │
//!                          └─────────────────┘     └────────┬────────┘
//!                                                           │ events
//!                                                  ┌────────▼────────┐
//!                                                  │ Event Publisher │
//!                                                  └─────────────────┘
//! ```
//!
//! ## Sync lifecycle
//!
//! 1. [`orchestrator::SyncOrchestrator::perform_sync`] admits one run per
//!    facility, fetches the provider snapshot, and persists the diff under a
//!    [`log::SyncLog`].
//! 2. [`review::ReviewService`] records terminal accept/reject decisions.
//! 3. [`apply::ApplyEngine`] turns accepted changes into facility-scoped
//!    mutations and publishes assignment-change events.
//!
//! ## Example
//!
//! ```ignore
//! use latchkey_fms::service::{AuthContext, FmsService};
//!
//! let summary = service.trigger_sync(&auth, facility_id).await?;
//! if summary.requires_review {
//!     let pending = service.pending_changes(&auth, summary.sync_log_id).await?;
//!     // surface `pending` to an administrator ...
//! }
//! ```

pub mod adapter;
pub mod apply;
pub mod change;
pub mod config;
pub mod diff;
pub mod directory;
pub mod error;
pub mod events;
pub mod log;
pub mod mapping;
pub mod orchestrator;
pub mod review;
pub mod service;
pub mod types;

// Re-exports for convenience
pub use adapter::{AdapterRegistry, ExternalEntity, FmsAdapter};
pub use apply::{AccessChangeTotals, ApplyEngine, ApplyOutcome, RemovalOutcome};
pub use change::{Change, ChangeStore, PgChangeStore};
pub use config::{FmsConfigStore, FmsConfiguration, PgFmsConfigStore, SyncSettings};
pub use diff::{DiffEngine, ExternalSnapshot};
pub use directory::{DirectoryService, FacilityRoster};
pub use error::{FmsError, FmsResult};
pub use events::{ChannelPublisher, EventEnvelope, EventPublisher, NullPublisher};
pub use log::{PgSyncLogStore, SyncCounts, SyncLog, SyncLogStore};
pub use mapping::{EntityMapping, EntityMappingStore, PgEntityMappingStore};
pub use orchestrator::{SyncOrchestrator, SyncSummary};
pub use review::{BulkReviewOutcome, ReviewService};
pub use service::{ActorRole, ApplyRequest, AuthContext, FmsService, ReviewRequest};
pub use types::{
    ChangeType, EntityType, ProviderType, RequiredAction, ReviewDecision, SyncRunStatus,
    TriggeredBy,
};
