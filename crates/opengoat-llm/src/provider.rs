use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::Result;

/// What kind of transport a provider uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Cli,
    Http,
}

/// Which optional operations a provider actually implements.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub agent: bool,
    pub model: bool,
    pub auth: bool,
    pub passthrough: bool,
    pub agent_create: bool,
    pub agent_delete: bool,
}

/// Static metadata describing a provider instance.
#[derive(Debug, Clone)]
pub struct ProviderMeta {
    pub id: String,
    pub display_name: String,
    pub kind: ProviderKind,
    pub capabilities: Capabilities,
}

/// Options accepted by every provider operation.
///
/// Streaming sinks are push-side channels: a CLI provider feeds them
/// line-by-line as the subprocess writes, an HTTP provider that answers
/// in one shot sends the full body once.
#[derive(Clone, Default)]
pub struct InvokeOptions {
    pub message: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub provider_session_id: Option<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub passthrough_args: Vec<String>,
    pub idempotency_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub on_stdout: Option<Arc<UnboundedSender<String>>>,
    pub on_stderr: Option<Arc<UnboundedSender<String>>>,
}

impl std::fmt::Debug for InvokeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeOptions")
            .field("message", &self.message)
            .field("model", &self.model)
            .field("provider_session_id", &self.provider_session_id)
            .field("cwd", &self.cwd)
            .finish_non_exhaustive()
    }
}

/// The result of a single provider operation.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub provider_session_id: Option<String>,
}

impl Execution {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            provider_session_id: None,
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
            provider_session_id: None,
        }
    }

    pub fn ok(&self) -> bool {
        self.code == 0
    }
}

/// Uniform surface every provider (CLI or HTTP) must expose.
#[async_trait]
pub trait Provider: Send + Sync {
    fn meta(&self) -> &ProviderMeta;

    async fn invoke(&self, options: &InvokeOptions) -> Result<Execution>;

    async fn authenticate(&self, options: &InvokeOptions) -> Result<Execution> {
        let _ = options;
        Err(crate::error::Error::UnsupportedAction(
            self.meta().id.clone(),
            "authenticate",
        ))
    }

    async fn create_external_agent(&self, display_name: &str) -> Result<Execution> {
        let _ = display_name;
        Err(crate::error::Error::UnsupportedAction(
            self.meta().id.clone(),
            "createExternalAgent",
        ))
    }

    async fn delete_external_agent(&self, agent_id: &str) -> Result<Execution> {
        let _ = agent_id;
        Err(crate::error::Error::UnsupportedAction(
            self.meta().id.clone(),
            "deleteExternalAgent",
        ))
    }

    /// Optional cheap reachability probe; default assumes healthy.
    async fn health_check(&self) -> bool {
        true
    }
}
