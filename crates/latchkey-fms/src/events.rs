//! Assignment-change event contract.
//!
//! The apply engine's side effects are published through an explicit
//! [`EventPublisher`] handed in at construction, so downstream consumers
//! (gateway refresh, notifications) observe mutations without relying on
//! listener registration order. Events are typed structs wrapped in an
//! envelope carrying facility and actor metadata.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use latchkey_core::{FacilityId, UnitId, UserId};

use crate::error::{FmsError, FmsResult};

/// Trait for types that can be published as access events.
///
/// # Example
///
/// ```
/// use serde::{Serialize, Deserialize};
/// use latchkey_fms::events::AccessEvent;
/// use latchkey_core::UserId;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// pub struct PinRotated {
///     pub user_id: UserId,
/// }
///
/// impl AccessEvent for PinRotated {
///     const EVENT_TYPE: &'static str = "latchkey.access.pin.rotated";
/// }
/// ```
pub trait AccessEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The fully qualified event type name.
    ///
    /// Convention: `latchkey.<subsystem>.<entity>.<action>`.
    const EVENT_TYPE: &'static str;
}

/// A user account was created or matched during apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProvisioned {
    /// The affected user.
    pub user_id: UserId,
    /// True if the account was newly created rather than matched by email.
    pub created: bool,
}

impl AccessEvent for UserProvisioned {
    const EVENT_TYPE: &'static str = "latchkey.fms.user.provisioned";
}

/// A user account was deactivated because no active assignments remained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDeactivated {
    /// The affected user.
    pub user_id: UserId,
}

impl AccessEvent for UserDeactivated {
    const EVENT_TYPE: &'static str = "latchkey.fms.user.deactivated";
}

/// A unit assignment was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGranted {
    /// The affected user.
    pub user_id: UserId,
    /// The unit the user gained access to.
    pub unit_id: UnitId,
}

impl AccessEvent for AccessGranted {
    const EVENT_TYPE: &'static str = "latchkey.fms.access.granted";
}

/// A user's assignments in one facility were revoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRevoked {
    /// The affected user.
    pub user_id: UserId,
    /// Number of assignments removed.
    pub assignments_removed: u64,
}

impl AccessEvent for AccessRevoked {
    const EVENT_TYPE: &'static str = "latchkey.fms.access.revoked";
}

/// Envelope wrapping a serialized event with routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID.
    pub event_id: Uuid,
    /// Fully qualified event type name.
    pub event_type: String,
    /// Facility the mutation belongs to.
    pub facility_id: FacilityId,
    /// Actor that triggered the mutation, if any.
    pub actor_id: Option<UserId>,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// When the event was produced.
    pub occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Wrap a typed event with metadata.
    pub fn new<E: AccessEvent>(
        event: &E,
        facility_id: FacilityId,
        actor_id: Option<UserId>,
    ) -> FmsResult<Self> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: E::EVENT_TYPE.to_string(),
            facility_id,
            actor_id,
            payload: serde_json::to_value(event)?,
            occurred_at: Utc::now(),
        })
    }

    /// Deserialize the payload back into its typed event.
    pub fn decode<E: AccessEvent>(&self) -> FmsResult<E> {
        if self.event_type != E::EVENT_TYPE {
            return Err(FmsError::internal(format!(
                "Event type mismatch: envelope carries {}, requested {}",
                self.event_type,
                E::EVENT_TYPE
            )));
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Outbound contract for assignment-change events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one envelope.
    async fn publish(&self, envelope: EventEnvelope) -> FmsResult<()>;
}

/// Publisher backed by an in-process channel.
///
/// The consuming side decides what to do with the stream (forward to the
/// gateway control plane, fan out to websockets, drop).
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::UnboundedSender<EventEnvelope>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiving half of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, envelope: EventEnvelope) -> FmsResult<()> {
        debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            facility_id = %envelope.facility_id,
            "Publishing access event"
        );
        self.sender
            .send(envelope)
            .map_err(|_| FmsError::internal("Event channel closed"))
    }
}

/// Publisher that discards every event. Useful for callers with no
/// downstream consumers, and as a test default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, _envelope: EventEnvelope) -> FmsResult<()> {
        Ok(())
    }
}
