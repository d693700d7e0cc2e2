//! ACP bridge: stdin/stdout JSON-lines server wrapping a single orchestrator.
//!
//! Maps an ACP `sessionId` to an internal session keyed by
//! `acp:<sessionId>:main` and to whichever agent `setSessionMode` last
//! pointed it at. One bridge process serves one client; there is no
//! gateway or auth store behind it, localhost trust only.

use std::sync::Arc;

use dashmap::DashMap;
use opengoat_core::agents::AgentRegistry;
use opengoat_core::orchestrator::{Orchestrator, RunOptions, StopReason};
use opengoat_core::sessions::{GetHistoryOptions, SessionEngine};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{AcpError, AcpErrorCode, AcpMessage};

struct AcpSessionState {
    agent_id: String,
}

/// Bridges the JSON-lines ACP wire to `opengoat_core`'s orchestrator.
pub struct AcpBridge {
    agents: Arc<AgentRegistry>,
    sessions: Arc<SessionEngine>,
    orchestrator: Arc<Orchestrator>,
    acp_sessions: DashMap<String, AcpSessionState>,
    default_agent: String,
}

impl AcpBridge {
    pub fn new(
        agents: Arc<AgentRegistry>,
        sessions: Arc<SessionEngine>,
        orchestrator: Arc<Orchestrator>,
        default_agent: impl Into<String>,
    ) -> Self {
        Self {
            agents,
            sessions,
            orchestrator,
            acp_sessions: DashMap::new(),
            default_agent: default_agent.into(),
        }
    }

    /// Reads JSON-line requests from stdin and writes responses to stdout
    /// until stdin closes.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("ACP bridge starting (stdin/stdout JSON-lines)");
        self.write_message(&AcpMessage::event("bridge.ready", json!({}))).await?;

        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response = self.handle_line(&line).await;
                    self.write_message(&response).await?;
                }
                Ok(None) => {
                    debug!("ACP bridge: stdin closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "ACP bridge: stdin read error");
                    break;
                }
            }
        }

        info!("ACP bridge stopped");
        Ok(())
    }

    async fn handle_line(&self, line: &str) -> AcpMessage {
        let msg: AcpMessage = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                return AcpMessage::err(
                    String::new(),
                    AcpError::new(AcpErrorCode::ParseError, format!("invalid JSON: {e}")),
                );
            }
        };

        match msg {
            AcpMessage::Request { id, method, params } => match self.dispatch(&method, params).await {
                Ok(result) => AcpMessage::ok(id, result),
                Err(e) => AcpMessage::err(id, e),
            },
            _ => AcpMessage::err(
                String::new(),
                AcpError::new(AcpErrorCode::InvalidParams, "only request messages are accepted"),
            ),
        }
    }

    async fn dispatch(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, AcpError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "agents": self.agents.list_agents().await.into_iter().map(|a| a.id).collect::<Vec<_>>(),
            })),
            "authenticate" => Ok(json!({ "authenticated": true })),
            "newSession" => self.new_session(params).await,
            "loadSession" => self.replay_session(params, false).await,
            "resumeSession" => self.replay_session(params, true).await,
            "listSessions" => self.list_sessions().await,
            "setSessionMode" => self.set_session_mode(params).await,
            "prompt" => self.prompt(params).await,
            "cancel" => self.cancel(params).await,
            other => Err(AcpError::new(AcpErrorCode::InvalidParams, format!("unknown method '{other}'"))),
        }
    }

    async fn new_session(&self, params: serde_json::Value) -> Result<serde_json::Value, AcpError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            #[serde(default)]
            agent_id: Option<String>,
        }
        let params: Params = parse_params(params)?;
        let agent_id = params.agent_id.unwrap_or_else(|| self.default_agent.clone());
        let session_id = Uuid::new_v4();
        self.acp_sessions.insert(session_id.to_string(), AcpSessionState { agent_id: agent_id.clone() });
        Ok(json!({ "sessionId": session_id, "agentId": agent_id }))
    }

    async fn replay_session(&self, params: serde_json::Value, register: bool) -> Result<serde_json::Value, AcpError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            session_id: String,
            #[serde(default)]
            agent_id: Option<String>,
        }
        let params: Params = parse_params(params)?;
        let agent_id = self.resolve_agent(&params.session_id, params.agent_id, register)?;
        let session_key = SessionEngine::acp_session_key(&params.session_id);
        let history = self
            .sessions
            .get_session_history(&agent_id, GetHistoryOptions { session_ref: Some(session_key), ..Default::default() })
            .await
            .map_err(core_error)?;

        Ok(json!({
            "sessionId": params.session_id,
            "agentId": agent_id,
            "messages": history.messages.iter().map(|m| json!({
                "kind": m.kind,
                "content": m.content,
                "ts": m.ts,
            })).collect::<Vec<_>>(),
        }))
    }

    async fn list_sessions(&self) -> Result<serde_json::Value, AcpError> {
        let sessions: Vec<_> = self
            .acp_sessions
            .iter()
            .map(|entry| json!({ "sessionId": entry.key(), "agentId": entry.value().agent_id }))
            .collect();
        Ok(json!({ "sessions": sessions }))
    }

    async fn set_session_mode(&self, params: serde_json::Value) -> Result<serde_json::Value, AcpError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            session_id: String,
            agent_id: String,
        }
        let params: Params = parse_params(params)?;
        if self.agents.get(&params.agent_id).await.is_none() {
            return Err(AcpError::new(AcpErrorCode::NotFound, format!("agent '{}' not found", params.agent_id)));
        }
        self.acp_sessions.insert(params.session_id.clone(), AcpSessionState { agent_id: params.agent_id.clone() });
        Ok(json!({ "sessionId": params.session_id, "agentId": params.agent_id }))
    }

    async fn prompt(&self, params: serde_json::Value) -> Result<serde_json::Value, AcpError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            session_id: String,
            message: String,
        }
        let params: Params = parse_params(params)?;
        let agent_id = self.resolve_agent(&params.session_id, None, true)?;
        let session_key = SessionEngine::acp_session_key(&params.session_id);

        let options = RunOptions { message: params.message, session_ref: Some(session_key), ..Default::default() };
        let result = self.orchestrator.run_agent(&agent_id, options, None).await.map_err(core_error)?;

        self.write_message(&AcpMessage::event(
            "agent_message_chunk",
            json!({ "sessionId": params.session_id, "text": result.stdout }),
        ))
        .await
        .map_err(|e| AcpError::new(AcpErrorCode::Internal, e.to_string()))?;

        let stop_reason = match result.stop_reason {
            Some(StopReason::Cancelled) => "cancelled",
            _ if result.code != 0 => "refusal",
            _ => "end_turn",
        };

        Ok(json!({ "sessionId": params.session_id, "stopReason": stop_reason, "code": result.code }))
    }

    async fn cancel(&self, params: serde_json::Value) -> Result<serde_json::Value, AcpError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            session_id: String,
        }
        let params: Params = parse_params(params)?;
        let session_key = SessionEngine::acp_session_key(&params.session_id);
        self.sessions.cancel(&session_key);
        Ok(json!({ "sessionId": params.session_id, "cancelled": true }))
    }

    fn resolve_agent(&self, acp_session_id: &str, agent_id: Option<String>, register: bool) -> Result<String, AcpError> {
        if let Some(entry) = self.acp_sessions.get(acp_session_id) {
            return Ok(entry.agent_id.clone());
        }
        let agent_id = agent_id.unwrap_or_else(|| self.default_agent.clone());
        if register {
            self.acp_sessions.insert(acp_session_id.to_string(), AcpSessionState { agent_id: agent_id.clone() });
            Ok(agent_id)
        } else {
            Err(AcpError::new(AcpErrorCode::NotFound, format!("unknown session '{acp_session_id}'")))
        }
    }

    async fn write_message(&self, msg: &AcpMessage) -> anyhow::Result<()> {
        let json = serde_json::to_string(msg)?;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(json.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: serde_json::Value) -> Result<T, AcpError> {
    serde_json::from_value(params).map_err(|e| AcpError::new(AcpErrorCode::InvalidParams, e.to_string()))
}

fn core_error(e: opengoat_core::Error) -> AcpError {
    use opengoat_core::Error::*;
    match e {
        NotFound(msg) => AcpError::new(AcpErrorCode::NotFound, msg),
        Validation(msg) | Conflict(msg) | SessionBusy(msg) => AcpError::new(AcpErrorCode::InvalidParams, msg),
        Cancelled => AcpError::new(AcpErrorCode::Internal, "cancelled"),
        other => AcpError::new(AcpErrorCode::Internal, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use opengoat_core::agents::{AgentType, CreateAgentOptions};
    use opengoat_core::clock::{Clock, FixedClock};
    use opengoat_core::orchestrator::OrchestratorConfig;
    use opengoat_core::paths::{FsPort, HomeLayout, MemFs};
    use opengoat_llm::{MockProvider, ProviderRegistry};

    use super::*;

    async fn fixture() -> AcpBridge {
        let fs: Arc<dyn FsPort> = Arc::new(MemFs::new());
        let layout = HomeLayout::new("/home".into());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let agents = Arc::new(AgentRegistry::new(fs.clone(), layout.clone()));
        agents
            .create_agent("ceo", CreateAgentOptions { agent_type: Some(AgentType::Manager), provider: "mock".into(), ..Default::default() })
            .await
            .unwrap();
        let sessions = Arc::new(SessionEngine::new(fs.clone(), layout.clone(), clock.clone()));
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new("mock")));
        let orchestrator = Arc::new(Orchestrator::new(
            fs,
            layout,
            clock,
            agents.clone(),
            sessions.clone(),
            Arc::new(registry),
            OrchestratorConfig::default(),
        ));
        AcpBridge::new(agents, sessions, orchestrator, "ceo")
    }

    #[tokio::test]
    async fn new_session_then_prompt_returns_end_turn() {
        let bridge = fixture().await;
        let session = bridge.new_session(json!({})).await.unwrap();
        let session_id = session["sessionId"].as_str().unwrap().to_string();

        let reply = bridge.prompt(json!({ "sessionId": session_id, "message": "hi" })).await.unwrap();
        assert_eq!(reply["stopReason"], "end_turn");
    }

    #[tokio::test]
    async fn cancel_unknown_session_is_not_an_error() {
        let bridge = fixture().await;
        let result = bridge.cancel(json!({ "sessionId": Uuid::new_v4().to_string() })).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn set_session_mode_rejects_unknown_agent() {
        let bridge = fixture().await;
        let session = bridge.new_session(json!({})).await.unwrap();
        let session_id = session["sessionId"].as_str().unwrap().to_string();
        let result = bridge.set_session_mode(json!({ "sessionId": session_id, "agentId": "ghost" })).await;
        assert!(result.is_err());
    }
}
