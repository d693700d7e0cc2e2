use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::provider::{Capabilities, Execution, InvokeOptions, Provider, ProviderKind, ProviderMeta};

/// Wire protocol an HTTP provider speaks. Vendor-specific encoding beyond
/// these two reference shapes is a leaf detail left to a future provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpProtocol {
    /// `{"messages": [{"role": ..., "content": ...}], ...}`, response text
    /// at `choices[0].message.content` (OpenAI-style chat completion).
    Chat,
    /// `{"messages": [...], "system": ...}`, response text at
    /// `content[0].text` (Anthropic-style messages API).
    Messages,
}

/// How the provider's credential is attached to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthHeader {
    Bearer,
    XApiKey,
    ApiKey,
}

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub id: String,
    pub display_name: String,
    pub protocol: HttpProtocol,
    pub base_url_env: String,
    pub endpoint_env: Option<String>,
    pub base_url: String,
    pub endpoint_path: String,
    pub auth_header: AuthHeader,
    pub credential_envs: Vec<String>,
    pub default_model: String,
    pub extra_headers: Vec<(String, String)>,
    pub timeout_secs: u64,
}

/// A provider backed by a request/response HTTP call.
pub struct HttpProvider {
    config: HttpProviderConfig,
    meta: ProviderMeta,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Self {
        let meta = ProviderMeta {
            id: config.id.clone(),
            display_name: if config.display_name.is_empty() {
                config.id.clone()
            } else {
                config.display_name.clone()
            },
            kind: ProviderKind::Http,
            capabilities: Capabilities {
                agent: false,
                model: true,
                auth: false,
                passthrough: false,
                agent_create: false,
                agent_delete: false,
            },
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, meta, client }
    }

    fn resolve_endpoint(&self) -> String {
        if let Some(env) = &self.config.endpoint_env {
            if let Ok(v) = std::env::var(env) {
                if !v.is_empty() {
                    return v;
                }
            }
        }
        if let Ok(v) = std::env::var(&self.config.base_url_env) {
            if !v.is_empty() {
                return format!("{}{}", v.trim_end_matches('/'), self.config.endpoint_path);
            }
        }
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.endpoint_path
        )
    }

    fn resolve_credential(&self) -> Result<String> {
        for env in &self.config.credential_envs {
            if let Ok(v) = std::env::var(env) {
                if !v.is_empty() {
                    return Ok(v);
                }
            }
        }
        Err(Error::Authentication(
            self.meta.id.clone(),
            self.config.credential_envs.clone(),
        ))
    }

    fn build_body(&self, options: &InvokeOptions) -> Value {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        match self.config.protocol {
            HttpProtocol::Chat => {
                let mut messages = Vec::new();
                if let Some(system) = &options.system_prompt {
                    messages.push(json!({"role": "system", "content": system}));
                }
                messages.push(json!({"role": "user", "content": options.message}));
                json!({"model": model, "messages": messages})
            }
            HttpProtocol::Messages => {
                let mut body = json!({
                    "model": model,
                    "max_tokens": 4096,
                    "messages": [{"role": "user", "content": options.message}],
                });
                if let Some(system) = &options.system_prompt {
                    body["system"] = json!(system);
                }
                body
            }
        }
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        match self.config.protocol {
            HttpProtocol::Chat => body
                .get("choices")?
                .get(0)?
                .get("message")?
                .get("content")?
                .as_str()
                .map(str::to_string),
            HttpProtocol::Messages => body
                .get("content")?
                .get(0)?
                .get("text")?
                .as_str()
                .map(str::to_string),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn meta(&self) -> &ProviderMeta {
        &self.meta
    }

    #[instrument(skip(self, options), fields(provider = %self.meta.id))]
    async fn invoke(&self, options: &InvokeOptions) -> Result<Execution> {
        let credential = match self.resolve_credential() {
            Ok(c) => c,
            Err(e) => return Ok(Execution::failure(1, e.to_string())),
        };

        let endpoint = self.resolve_endpoint();
        let body = self.build_body(options);

        let mut request = self.client.post(&endpoint).json(&body);
        request = match self.config.auth_header {
            AuthHeader::Bearer => request.header("Authorization", format!("Bearer {credential}")),
            AuthHeader::XApiKey => request.header("x-api-key", credential),
            AuthHeader::ApiKey => request.header("api-key", credential),
        };
        for (key, value) in &self.config.extra_headers {
            request = request.header(key, value);
        }

        debug!(endpoint = %endpoint, "sending http provider request");

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Ok(Execution::failure(1, format!("transport error: {e}"))),
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read body: {e}>"));

        if !status.is_success() {
            return Ok(Execution::failure(
                1,
                format!("http {} from provider '{}': {}", status.as_u16(), self.meta.id, text),
            ));
        }

        let parsed: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => return Err(Error::Runtime(self.meta.id.clone())),
        };

        match self.extract_text(&parsed) {
            Some(content) => Ok(Execution::success(content)),
            None => Err(Error::Runtime(self.meta.id.clone())),
        }
    }
}
