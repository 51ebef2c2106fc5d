use boxoffice_core::models::PaymentProvider;
use boxoffice_core::payment::PaymentGateway;
use boxoffice_core::{CoreError, CoreResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A payment method offered to clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentMethod {
    pub provider: PaymentProvider,
    pub name: String,
    pub description: String,
    pub is_primary: bool,
}

/// Provider-keyed set of payment gateways.
pub struct PaymentGatewayRegistry {
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
    primary: PaymentProvider,
}

impl PaymentGatewayRegistry {
    pub fn new(primary: PaymentProvider) -> Self {
        Self {
            gateways: HashMap::new(),
            primary,
        }
    }

    /// Register a gateway under the provider it reports. Replaces any previous one.
    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn primary(&self) -> PaymentProvider {
        self.primary
    }

    /// Fails with `ProviderUnavailable` when nothing is registered for the
    /// provider or the registered gateway reports disabled.
    pub fn get_gateway(&self, provider: PaymentProvider) -> CoreResult<Arc<dyn PaymentGateway>> {
        match self.gateways.get(&provider) {
            Some(gateway) if gateway.is_enabled() => Ok(gateway.clone()),
            Some(_) => Err(CoreError::ProviderUnavailable(format!("{} is disabled", provider))),
            None => Err(CoreError::ProviderUnavailable(format!("{} is not registered", provider))),
        }
    }

    /// Enabled gateways only, primary first.
    pub fn available_gateways(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<PaymentMethod> = self
            .gateways
            .values()
            .filter(|g| g.is_enabled())
            .map(|g| PaymentMethod {
                provider: g.provider(),
                name: g.display_name().to_string(),
                description: g.description().to_string(),
                is_primary: g.provider() == self.primary,
            })
            .collect();
        methods.sort_by(|a, b| b.is_primary.cmp(&a.is_primary).then_with(|| a.provider.as_str().cmp(b.provider.as_str())));
        methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::mock::MockGateway;

    #[test]
    fn test_get_gateway_rejects_missing_and_disabled() {
        let registry = PaymentGatewayRegistry::new(PaymentProvider::Amwal)
            .register(Arc::new(MockGateway::new(PaymentProvider::Amwal).disabled()));

        assert!(matches!(
            registry.get_gateway(PaymentProvider::Amwal),
            Err(CoreError::ProviderUnavailable(_))
        ));
        assert!(matches!(
            registry.get_gateway(PaymentProvider::Cash),
            Err(CoreError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn test_available_gateways_lists_enabled_primary_first() {
        let registry = PaymentGatewayRegistry::new(PaymentProvider::Amwal)
            .register(Arc::new(MockGateway::new(PaymentProvider::Cash)))
            .register(Arc::new(MockGateway::new(PaymentProvider::Amwal)));

        let methods = registry.available_gateways();
        assert_eq!(methods.len(), 2);
        assert_eq!(methods[0].provider, PaymentProvider::Amwal);
        assert!(methods[0].is_primary);
        assert!(registry.get_gateway(PaymentProvider::Cash).is_ok());

        let registry = PaymentGatewayRegistry::new(PaymentProvider::Amwal)
            .register(Arc::new(MockGateway::new(PaymentProvider::Cash).disabled()));
        assert!(registry.available_gateways().is_empty());
    }
}
