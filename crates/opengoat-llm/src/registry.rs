use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::Provider;

/// Maps provider ids to live provider instances.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.meta().id.clone(), provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn available(&self) -> HashMap<String, bool> {
        let mut out = HashMap::new();
        for (id, provider) in &self.providers {
            out.insert(id.clone(), provider.health_check().await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn register_and_get() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new("claude")));
        assert!(registry.get("claude").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.list(), vec!["claude".to_string()]);
    }
}
