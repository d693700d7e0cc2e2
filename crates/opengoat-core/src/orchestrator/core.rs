use std::sync::Arc;

use opengoat_llm::{InvokeOptions, ProviderRegistry};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::agents::{AgentRegistry, WorkspaceAccessPolicy};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::paths::{FsPort, HomeLayout};
use crate::routing::RoutingService;
use crate::sessions::{PrepareOptions, SessionEngine};

use super::config::OrchestratorConfig;
use super::trace::{RunTrace, TraceExecution, TraceSession, TraceStore};
use super::types::{HooksHandle, OrchestrationEvent, RunOptions, RunResult, SessionRunInfo, Stage, StopReason};

/// Ties together the agent registry, router, session engine, and provider
/// registry to execute one `runAgent` call end to end.
pub struct Orchestrator {
    fs: Arc<dyn FsPort>,
    layout: HomeLayout,
    clock: Arc<dyn Clock>,
    agents: Arc<AgentRegistry>,
    sessions: Arc<SessionEngine>,
    routing: RoutingService,
    providers: Arc<ProviderRegistry>,
    traces: TraceStore,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        fs: Arc<dyn FsPort>,
        layout: HomeLayout,
        clock: Arc<dyn Clock>,
        agents: Arc<AgentRegistry>,
        sessions: Arc<SessionEngine>,
        providers: Arc<ProviderRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let traces = TraceStore::new(fs.clone(), layout.clone());
        Self {
            fs,
            layout,
            clock,
            agents,
            sessions,
            routing: RoutingService::new(),
            providers,
            traces,
            config,
        }
    }

    pub fn trace_store(&self) -> &TraceStore {
        &self.traces
    }

    #[instrument(skip(self, options, hooks), fields(entry = %entry_agent_id))]
    pub async fn run_agent(
        &self,
        entry_agent_id: &str,
        options: RunOptions,
        hooks: Option<HooksHandle>,
    ) -> Result<RunResult> {
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let mut events = Vec::new();

        let manifests = self.agents.list_agents().await;
        let resolved_entry = if manifests.iter().any(|m| m.id == entry_agent_id) {
            entry_agent_id.to_string()
        } else if let Some(head) = manifests.iter().find(|m| m.is_head()) {
            head.id.clone()
        } else if let Some(first) = manifests.first() {
            first.id.clone()
        } else {
            return Err(Error::NotFound("no agents registered".into()));
        };

        emit(&hooks, &mut events, Stage::RunStarted, run_id, started_at, Some(resolved_entry.clone()), None, None);

        let decision = self.routing.route(&resolved_entry, &options.message, &manifests);
        let target_agent_id = decision.target_agent_id.clone();
        let target = self
            .agents
            .get(&target_agent_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("agent '{target_agent_id}' not found")))?;

        let prepared = self
            .sessions
            .prepare_run_session(&target_agent_id, PrepareOptions {
                session_ref: options.session_ref.clone(),
                force_new: options.force_new_session,
                disable: options.disable_session,
                user_message: decision.rewritten_message.clone(),
            })
            .await?;

        if prepared.pre_cancelled {
            return Ok(self
                .finish_cancelled(run_id, started_at, &resolved_entry, &target_agent_id, &target.provider, None, &decision, events, &hooks)
                .await?);
        }

        let session_info = prepared.info.clone();

        if let Some(info) = &session_info {
            if self.sessions.is_cancelled(&info.session_key) {
                return Ok(self
                    .finish_cancelled(run_id, started_at, &resolved_entry, &target_agent_id, &target.provider, session_info.clone(), &decision, events, &hooks)
                    .await?);
            }
        }

        let cwd = match target.workspace_access {
            WorkspaceAccessPolicy::ProviderDefault => None,
            WorkspaceAccessPolicy::AgentWorkspace => Some(self.layout.workspace_dir(&target_agent_id)),
            WorkspaceAccessPolicy::External => options.cwd.clone(),
        };

        let system_prompt = cwd.as_ref().and_then(|cwd| {
            let workspace = self.layout.workspace_dir(&target_agent_id);
            if *cwd != workspace {
                Some(format!(
                    "Session project path: {}\nAgent workspace path: {}\nPrefer absolute paths. Do not pollute the agent workspace.",
                    cwd.display(),
                    workspace.display()
                ))
            } else {
                None
            }
        });

        let provider = self
            .providers
            .get(&target.provider)
            .ok_or_else(|| Error::NotFound(format!("provider '{}' not registered", target.provider)))?;

        let provider_session_id = session_info.as_ref().map(|i| i.session_id.to_string());
        let invoke_options = InvokeOptions {
            message: decision.rewritten_message.clone(),
            system_prompt,
            model: options.model.clone(),
            provider_session_id,
            cwd,
            env: options.env.clone(),
            passthrough_args: Vec::new(),
            idempotency_key: Some(run_id.to_string()),
            timeout_secs: None,
            on_stdout: None,
            on_stderr: None,
        };

        emit(
            &hooks,
            &mut events,
            Stage::InvocationStarted,
            run_id,
            self.clock.now(),
            Some(target_agent_id.clone()),
            Some(target.provider.clone()),
            None,
        );

        let execution = match self.invoke_with_retry(provider.as_ref(), &invoke_options, &target.display_name).await {
            Ok(exec) => exec,
            Err(opengoat_llm::Error::Authentication(provider_id, candidates)) => {
                warn!(provider = %provider_id, "missing credentials");
                opengoat_llm::Execution::failure(1, format!("missing credentials, tried: {}", candidates.join(", ")))
            }
            Err(opengoat_llm::Error::CommandNotFound(cmd)) => {
                if let Some(info) = &session_info {
                    self.sessions.clear_active(&info.session_key);
                }
                return Err(Error::Provider(opengoat_llm::Error::CommandNotFound(cmd)));
            }
            Err(opengoat_llm::Error::Transport(msg)) => opengoat_llm::Execution::failure(1, msg),
            Err(e) => opengoat_llm::Execution::failure(1, e.to_string()),
        };

        emit(
            &hooks,
            &mut events,
            Stage::InvocationCompleted,
            run_id,
            self.clock.now(),
            Some(target_agent_id.clone()),
            Some(target.provider.clone()),
            Some(execution.code),
        );

        if let Some(info) = &session_info {
            if self.sessions.is_cancelled(&info.session_key) {
                return Ok(self
                    .finish_cancelled(run_id, started_at, &resolved_entry, &target_agent_id, &target.provider, session_info.clone(), &decision, events, &hooks)
                    .await?);
            }
        }

        let reply_text = if execution.ok() && !execution.stdout.trim().is_empty() {
            execution.stdout.clone()
        } else {
            format!("[Runtime error code {}] {}", execution.code, execution.stderr)
        };

        let mut compaction_applied = prepared.compaction_applied;
        let mut stop_reason = Some(StopReason::EndTurn);
        if let Some(info) = &session_info {
            match self.sessions.record_assistant_reply(info, &reply_text).await {
                Ok(result) => compaction_applied = compaction_applied || result.applied,
                Err(Error::Cancelled) => stop_reason = Some(StopReason::Cancelled),
                Err(e) => return Err(e),
            }
        }

        let completed_at = self.clock.now();
        emit(&hooks, &mut events, Stage::RunCompleted, run_id, completed_at, Some(target_agent_id.clone()), Some(target.provider.clone()), Some(execution.code));

        let trace = RunTrace {
            schema_version: 1,
            run_id,
            started_at,
            completed_at,
            entry_agent_id: resolved_entry.clone(),
            user_message: options.message.clone(),
            routing: Some(decision),
            execution: TraceExecution {
                provider_id: target.provider.clone(),
                code: execution.code,
                stdout: execution.stdout.clone(),
                stderr: execution.stderr.clone(),
                duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
            },
            session: session_info.as_ref().map(|i| TraceSession {
                session_key: i.session_key.clone(),
                session_id: i.session_id,
                is_new_session: i.is_new_session,
                compaction_applied,
            }),
            orchestration: events,
        };
        let trace_path = self.traces.save(&trace).await?;
        info!(run = %run_id, code = execution.code, "run completed");

        Ok(RunResult {
            run_id,
            code: execution.code,
            stdout: execution.stdout,
            stderr: execution.stderr,
            provider_id: target.provider,
            entry_agent_id: resolved_entry,
            target_agent_id,
            trace_path: Some(trace_path),
            session: session_info.map(|i| SessionRunInfo {
                session_key: i.session_key,
                session_id: i.session_id,
                is_new_session: i.is_new_session,
            }),
            stop_reason,
        })
    }

    /// Invokes `provider`, and if it fails with an "agent not found"-shaped
    /// error, tries to create the external agent and retries once, then
    /// makes one final attempt after a best-effort health probe.
    async fn invoke_with_retry(
        &self,
        provider: &(dyn opengoat_llm::Provider),
        options: &InvokeOptions,
        display_name: &str,
    ) -> opengoat_llm::Result<opengoat_llm::Execution> {
        let first = provider.invoke(options).await?;
        if first.ok() || !self.looks_like_agent_not_found(&first) || !provider.meta().capabilities.agent_create {
            return Ok(first);
        }

        if provider.create_external_agent(display_name).await.is_ok() {
            let second = provider.invoke(options).await?;
            if second.ok() || !self.looks_like_agent_not_found(&second) {
                return Ok(second);
            }
        }

        provider.health_check().await;
        provider.invoke(options).await
    }

    fn looks_like_agent_not_found(&self, execution: &opengoat_llm::Execution) -> bool {
        let haystack = format!("{}{}", execution.stdout, execution.stderr).to_lowercase();
        self.config.agent_not_found_markers.iter().any(|m| haystack.contains(m))
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_cancelled(
        &self,
        run_id: Uuid,
        started_at: chrono::DateTime<chrono::Utc>,
        entry_agent_id: &str,
        target_agent_id: &str,
        provider_id: &str,
        session: Option<crate::sessions::SessionInfo>,
        decision: &crate::routing::RoutingDecision,
        events: Vec<OrchestrationEvent>,
        hooks: &Option<HooksHandle>,
    ) -> Result<RunResult> {
        if let Some(info) = &session {
            self.sessions.clear_active(&info.session_key);
        }
        let completed_at = self.clock.now();
        let _ = hooks;
        let trace = RunTrace {
            schema_version: 1,
            run_id,
            started_at,
            completed_at,
            entry_agent_id: entry_agent_id.to_string(),
            user_message: decision.rewritten_message.clone(),
            routing: Some(decision.clone()),
            execution: TraceExecution {
                provider_id: provider_id.to_string(),
                code: 1,
                stdout: String::new(),
                stderr: "cancelled".to_string(),
                duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
            },
            session: session.as_ref().map(|i| TraceSession {
                session_key: i.session_key.clone(),
                session_id: i.session_id,
                is_new_session: i.is_new_session,
                compaction_applied: false,
            }),
            orchestration: events,
        };
        let trace_path = self.traces.save(&trace).await?;
        Ok(RunResult {
            run_id,
            code: 1,
            stdout: String::new(),
            stderr: "cancelled".to_string(),
            provider_id: provider_id.to_string(),
            entry_agent_id: entry_agent_id.to_string(),
            target_agent_id: target_agent_id.to_string(),
            trace_path: Some(trace_path),
            session: session.map(|i| SessionRunInfo {
                session_key: i.session_key,
                session_id: i.session_id,
                is_new_session: i.is_new_session,
            }),
            stop_reason: Some(StopReason::Cancelled),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn emit(
    hooks: &Option<HooksHandle>,
    events: &mut Vec<OrchestrationEvent>,
    stage: Stage,
    run_id: Uuid,
    timestamp: chrono::DateTime<chrono::Utc>,
    agent_id: Option<String>,
    provider_id: Option<String>,
    code: Option<i32>,
) {
    let event = OrchestrationEvent { stage, run_id, timestamp, agent_id, provider_id, code };
    if let Some(hooks) = hooks {
        hooks.on_event(event.clone());
    }
    events.push(event);
}
