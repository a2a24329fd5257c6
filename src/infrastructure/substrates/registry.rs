//! Maps provider ids to their `CapabilityProvider` adapter instance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::ports::capability_provider::CapabilityProvider;

#[derive(Default)]
pub struct CapabilityProviderRegistry {
    providers: HashMap<String, Arc<dyn CapabilityProvider>>,
}

impl CapabilityProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider_id: impl Into<String>, provider: Arc<dyn CapabilityProvider>) {
        self.providers.insert(provider_id.into(), provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.providers.get(provider_id).cloned()
    }
}
