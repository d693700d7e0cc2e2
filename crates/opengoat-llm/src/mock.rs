use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::provider::{Capabilities, Execution, InvokeOptions, Provider, ProviderKind, ProviderMeta};

/// A provider whose response is scripted, for orchestrator and scanner
/// tests that need deterministic invocations without spawning a process
/// or hitting the network.
pub struct MockProvider {
    meta: ProviderMeta,
    script: Mutex<Box<dyn FnMut(&InvokeOptions) -> Result<Execution> + Send>>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::scripted(id.clone(), move |options| {
            Ok(Execution::success(format!("mock reply from {id} to: {}", options.message)))
        })
    }

    pub fn scripted<F>(id: impl Into<String>, script: F) -> Self
    where
        F: FnMut(&InvokeOptions) -> Result<Execution> + Send + 'static,
    {
        let id = id.into();
        Self {
            meta: ProviderMeta {
                id,
                display_name: "mock".to_string(),
                kind: ProviderKind::Cli,
                capabilities: Capabilities::default(),
            },
            script: Mutex::new(Box::new(script)),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn meta(&self) -> &ProviderMeta {
        &self.meta
    }

    async fn invoke(&self, options: &InvokeOptions) -> Result<Execution> {
        let mut script = self.script.lock().expect("mock provider lock poisoned");
        script(options)
    }
}
