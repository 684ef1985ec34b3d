//! Provider adapter contract.
//!
//! Each external property-management provider is normalized behind the
//! [`FmsAdapter`] capability trait. The engine never talks to a provider's
//! transport client directly; it consumes the normalized entity shape only.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::FmsConfiguration;
use crate::error::{FmsError, FmsResult};
use crate::types::ProviderType;

/// A tenant or unit as reported by an external provider, normalized to the
/// canonical field set the diff engine compares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalEntity {
    /// Provider-defined identifier, unique within one facility and entity
    /// type for that provider.
    pub external_id: String,
    /// Display name (tenant full name or unit label).
    pub name: Option<String>,
    /// Tenant email address.
    pub email: Option<String>,
    /// Tenant phone number.
    pub phone: Option<String>,
    /// Unit number this entity refers to (the tenant's rented unit, or the
    /// unit's own number).
    pub unit_number: Option<String>,
    /// Normalized status string (`current`, `vacant`, `overlocked`, ...).
    pub status: Option<String>,
    /// Whether the provider considers this entity active.
    pub is_active: bool,
    /// Monthly rent in cents.
    pub rent_amount: Option<i64>,
    /// Lease start date.
    pub move_in: Option<NaiveDate>,
    /// Lease end date, if the tenancy has ended.
    pub move_out: Option<NaiveDate>,
}

impl ExternalEntity {
    /// Create an entity with only an external ID; remaining fields default
    /// to empty.
    #[must_use]
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            name: None,
            email: None,
            phone: None,
            unit_number: None,
            status: None,
            is_active: true,
            rent_amount: None,
            move_in: None,
            move_out: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the unit number.
    #[must_use]
    pub fn with_unit_number(mut self, unit_number: impl Into<String>) -> Self {
        self.unit_number = Some(unit_number.into());
        self
    }

    /// Set the status string.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Set the active flag.
    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Set the rent amount in cents.
    #[must_use]
    pub fn with_rent_amount(mut self, cents: i64) -> Self {
        self.rent_amount = Some(cents);
        self
    }
}

/// Capability trait implemented by every provider adapter.
///
/// Adapter failures (timeout, auth, malformed payload) surface as
/// [`FmsError::Provider`] and abort the run before any change is persisted.
#[async_trait]
pub trait FmsAdapter: Send + Sync {
    /// The provider this adapter speaks to.
    fn provider_type(&self) -> ProviderType;

    /// Fetch the full current tenant roster for the configured facility.
    async fn fetch_tenants(&self, config: &FmsConfiguration) -> FmsResult<Vec<ExternalEntity>>;

    /// Fetch the full current unit roster for the configured facility.
    async fn fetch_units(&self, config: &FmsConfiguration) -> FmsResult<Vec<ExternalEntity>>;
}

/// Registry resolving a [`ProviderType`] discriminant to its adapter.
///
/// The provider set is closed: an unregistered provider is a configuration
/// error, not a fallback path.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderType, Arc<dyn FmsAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter under its own provider type, replacing any
    /// previous registration.
    pub fn register(&mut self, adapter: Arc<dyn FmsAdapter>) {
        self.adapters.insert(adapter.provider_type(), adapter);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn FmsAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Resolve the adapter for a provider type.
    pub fn get(&self, provider_type: ProviderType) -> FmsResult<Arc<dyn FmsAdapter>> {
        self.adapters.get(&provider_type).cloned().ok_or_else(|| {
            FmsError::configuration(format!("No adapter registered for provider {provider_type}"))
        })
    }

    /// Registered provider types.
    #[must_use]
    pub fn provider_types(&self) -> Vec<ProviderType> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter;

    #[async_trait]
    impl FmsAdapter for StubAdapter {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Sitelink
        }

        async fn fetch_tenants(
            &self,
            _config: &FmsConfiguration,
        ) -> FmsResult<Vec<ExternalEntity>> {
            Ok(vec![ExternalEntity::new("t-1").with_name("Pat Doe")])
        }

        async fn fetch_units(&self, _config: &FmsConfiguration) -> FmsResult<Vec<ExternalEntity>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_registry_resolves_registered_adapter() {
        let registry = AdapterRegistry::new().with(Arc::new(StubAdapter));
        assert!(registry.get(ProviderType::Sitelink).is_ok());
    }

    #[test]
    fn test_registry_rejects_unregistered_provider() {
        let registry = AdapterRegistry::new().with(Arc::new(StubAdapter));
        let err = registry.get(ProviderType::Yardi).err().unwrap();
        assert!(err.to_string().contains("yardi"));
    }

    #[test]
    fn test_entity_builder() {
        let entity = ExternalEntity::new("t-9")
            .with_email("pat@example.com")
            .with_unit_number("A-101")
            .with_rent_amount(12_500)
            .with_active(false);
        assert_eq!(entity.external_id, "t-9");
        assert_eq!(entity.rent_amount, Some(12_500));
        assert!(!entity.is_active);
    }
}
