//! Per-provider credential/config persistence, independent of the
//! provider implementations themselves (which live in `opengoat_llm`).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths::{FsPort, HomeLayout};

/// Secret-tagged env vars are stored but never echoed back in full.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub env: HashMap<String, String>,
}

impl ProviderConfig {
    /// A copy with every value masked, safe to hand back to a client.
    pub fn redacted(&self) -> Self {
        Self {
            provider_id: self.provider_id.clone(),
            env: self.env.keys().map(|k| (k.clone(), "***".to_string())).collect(),
        }
    }
}

/// Reads and writes `providers/<id>/config.json`.
pub struct ProviderConfigStore {
    fs: Arc<dyn FsPort>,
    layout: HomeLayout,
}

impl ProviderConfigStore {
    pub fn new(fs: Arc<dyn FsPort>, layout: HomeLayout) -> Self {
        Self { fs, layout }
    }

    pub async fn get(&self, provider_id: &str) -> Result<ProviderConfig> {
        match self.fs.read_to_string(&self.layout.provider_config(provider_id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(ProviderConfig { provider_id: provider_id.to_string(), env: HashMap::new() }),
        }
    }

    pub async fn set(&self, provider_id: &str, env: HashMap<String, String>) -> Result<ProviderConfig> {
        let config = ProviderConfig { provider_id: provider_id.to_string(), env };
        let json = serde_json::to_string_pretty(&config)?;
        self.fs.write_atomic(&self.layout.provider_config(provider_id), &json).await?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::MemFs;

    #[tokio::test]
    async fn round_trips_and_redacts() {
        let fs: Arc<dyn FsPort> = Arc::new(MemFs::new());
        let layout = HomeLayout::new("/home".into());
        let store = ProviderConfigStore::new(fs, layout);

        let mut env = HashMap::new();
        env.insert("API_KEY".to_string(), "sk-secret".to_string());
        store.set("acme", env).await.unwrap();

        let loaded = store.get("acme").await.unwrap();
        assert_eq!(loaded.env.get("API_KEY"), Some(&"sk-secret".to_string()));
        assert_eq!(loaded.redacted().env.get("API_KEY"), Some(&"***".to_string()));
    }

    #[tokio::test]
    async fn missing_config_returns_empty() {
        let fs: Arc<dyn FsPort> = Arc::new(MemFs::new());
        let layout = HomeLayout::new("/home".into());
        let store = ProviderConfigStore::new(fs, layout);
        let config = store.get("ghost").await.unwrap();
        assert!(config.env.is_empty());
    }
}
