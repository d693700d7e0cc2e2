use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::provider::{Capabilities, Execution, InvokeOptions, Provider, ProviderKind, ProviderMeta};

/// Configuration for spawning an external CLI tool as a provider.
#[derive(Debug, Clone)]
pub struct CliProviderConfig {
    pub id: String,
    pub display_name: String,
    pub command: String,
    pub command_env_var: Option<String>,
    pub default_args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout_secs: u64,
    pub session_flag: Option<String>,
    pub model_flag: Option<String>,
}

impl CliProviderConfig {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            command: command.into(),
            command_env_var: None,
            default_args: Vec::new(),
            env: HashMap::new(),
            timeout_secs: 120,
            session_flag: None,
            model_flag: None,
        }
    }

    fn resolve_command(&self) -> String {
        if let Some(var) = &self.command_env_var {
            if let Ok(v) = std::env::var(var) {
                if !v.is_empty() {
                    return v;
                }
            }
        }
        self.command.clone()
    }
}

/// A provider backed by an external process, spawned per invocation and
/// with stdio captured into the `Execution` result.
pub struct CliProvider {
    config: CliProviderConfig,
    meta: ProviderMeta,
}

impl CliProvider {
    pub fn new(config: CliProviderConfig) -> Self {
        let meta = ProviderMeta {
            id: config.id.clone(),
            display_name: if config.display_name.is_empty() {
                config.id.clone()
            } else {
                config.display_name.clone()
            },
            kind: ProviderKind::Cli,
            capabilities: Capabilities {
                agent: false,
                model: config.model_flag.is_some(),
                auth: false,
                passthrough: true,
                agent_create: false,
                agent_delete: false,
            },
        };
        Self { config, meta }
    }

    fn expand_env_value(raw: &str) -> String {
        if let Some(var) = raw.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            std::env::var(var).unwrap_or_default()
        } else {
            raw.to_string()
        }
    }
}

#[async_trait]
impl Provider for CliProvider {
    fn meta(&self) -> &ProviderMeta {
        &self.meta
    }

    async fn invoke(&self, options: &InvokeOptions) -> Result<Execution> {
        let command = self.config.resolve_command();
        let mut cmd = Command::new(&command);
        cmd.args(&self.config.default_args);

        if let (Some(flag), Some(model)) = (&self.config.model_flag, &options.model) {
            cmd.arg(flag).arg(model);
        }
        if let (Some(flag), Some(sid)) = (&self.config.session_flag, &options.provider_session_id) {
            cmd.arg(flag).arg(sid);
        }
        for arg in &options.passthrough_args {
            cmd.arg(arg);
        }

        let mut full_prompt = String::new();
        if let Some(system) = &options.system_prompt {
            if !system.is_empty() {
                full_prompt.push_str(system);
                full_prompt.push_str("\n\nTask: ");
            }
        }
        full_prompt.push_str(&options.message);
        cmd.arg(full_prompt);

        for (key, value) in &self.config.env {
            cmd.env(key, Self::expand_env_value(value));
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let timeout_secs = options.timeout_secs.unwrap_or(self.config.timeout_secs);
        debug!(provider = %self.meta.id, command = %command, "spawning cli provider");

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| Error::Timeout(timeout_secs))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::CommandNotFound(command.clone())
                } else {
                    Error::Io(e)
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let code = output.status.code().unwrap_or(-1);

        if let Some(sink) = &options.on_stdout {
            let _ = sink.send(stdout.clone());
        }
        if !stderr.is_empty() {
            if let Some(sink) = &options.on_stderr {
                let _ = sink.send(stderr.clone());
            }
        }

        Ok(Execution {
            code,
            stdout,
            stderr,
            provider_session_id: options.provider_session_id.clone(),
        })
    }

    async fn health_check(&self) -> bool {
        let command = self.config.resolve_command();
        match Command::new("which").arg(&command).output().await {
            Ok(output) => output.status.success(),
            Err(_) => {
                warn!(provider = %self.meta.id, "availability check failed: no `which`");
                false
            }
        }
    }
}
