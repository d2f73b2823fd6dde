use std::collections::HashMap;
use std::sync::Arc;

use domain::PaymentMethod;

use crate::PaymentGateway;

/// Gateways keyed by the payment method they collect.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `gateway` under its own method, replacing any previous one.
    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&method).cloned()
    }

    /// Resolves a URL path segment such as `momo` or `vnpay`.
    pub fn by_segment(&self, segment: &str) -> Option<Arc<dyn PaymentGateway>> {
        let method: PaymentMethod = segment.parse().ok()?;
        if !method.is_gateway() {
            return None;
        }
        self.get(method)
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<_> = self.gateways.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}
