use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied knobs for a single `run_agent` call.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub message: String,
    pub session_ref: Option<String>,
    pub force_new_session: bool,
    pub disable_session: bool,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SessionRunInfo {
    pub session_key: String,
    pub session_id: Uuid,
    pub is_new_session: bool,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: Uuid,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub provider_id: String,
    pub entry_agent_id: String,
    pub target_agent_id: String,
    pub trace_path: Option<PathBuf>,
    pub session: Option<SessionRunInfo>,
    pub stop_reason: Option<StopReason>,
}

/// What stage of a run an `OrchestrationEvent` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RunStarted,
    InvocationStarted,
    InvocationCompleted,
    RunCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub stage: Stage,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub agent_id: Option<String>,
    pub provider_id: Option<String>,
    pub code: Option<i32>,
}

/// Optional sink for progressive run events; the CLI and ACP façade use
/// this to surface progress without polling the trace file.
pub trait OrchestrationHooks: Send + Sync {
    fn on_event(&self, event: OrchestrationEvent);
}

pub type HooksHandle = Arc<dyn OrchestrationHooks>;
