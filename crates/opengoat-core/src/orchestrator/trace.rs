use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::paths::{FsPort, HomeLayout};
use crate::routing::RoutingDecision;

use super::types::OrchestrationEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceExecution {
    pub provider_id: String,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSession {
    pub session_key: String,
    pub session_id: Uuid,
    pub is_new_session: bool,
    pub compaction_applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTrace {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub entry_agent_id: String,
    pub user_message: String,
    pub routing: Option<RoutingDecision>,
    pub execution: TraceExecution,
    pub session: Option<TraceSession>,
    pub orchestration: Vec<OrchestrationEvent>,
}

/// Write-tempfile-then-rename persistence for `RunTrace` under `runs/`,
/// one file per run, plus operational listing/pruning helpers.
pub struct TraceStore {
    fs: Arc<dyn FsPort>,
    layout: HomeLayout,
}

impl TraceStore {
    pub fn new(fs: Arc<dyn FsPort>, layout: HomeLayout) -> Self {
        Self { fs, layout }
    }

    pub async fn save(&self, trace: &RunTrace) -> Result<std::path::PathBuf> {
        let path = self.layout.run_trace(&trace.run_id.to_string());
        let json = serde_json::to_string_pretty(trace)?;
        self.fs.write_atomic(&path, &json).await?;
        Ok(path)
    }

    pub async fn list_traces(&self) -> Result<Vec<RunTrace>> {
        let mut out = Vec::new();
        for path in self.fs.list_dir(&self.layout.runs_dir()).await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(raw) = self.fs.read_to_string(&path).await? {
                out.push(serde_json::from_str(&raw)?);
            }
        }
        out.sort_by(|a: &RunTrace, b: &RunTrace| b.started_at.cmp(&a.started_at));
        Ok(out)
    }

    /// Keeps the `keep_newest` most recent traces, deletes the rest.
    /// Returns how many were pruned.
    pub async fn prune_traces(&self, keep_newest: usize) -> Result<usize> {
        let traces = self.list_traces().await?;
        let mut pruned = 0;
        for trace in traces.into_iter().skip(keep_newest) {
            let path = self.layout.run_trace(&trace.run_id.to_string());
            self.fs.remove_file(&path).await?;
            pruned += 1;
        }
        Ok(pruned)
    }
}
