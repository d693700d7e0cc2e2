//! Periodic loop that turns board state and agent inactivity into
//! dispatched prompts through the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::agents::AgentRegistry;
use crate::boards::{BoardStore, ListBoardsOptions, ListTasksOptions, TaskStatus};
use crate::clock::Clock;
use crate::error::Result;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::sessions::SessionEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivePolicy {
    AllManagers,
    CeoOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct ScannerConfig {
    pub inactive_minutes: i64,
    pub policy: InactivePolicy,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { inactive_minutes: 30, policy: InactivePolicy::AllManagers }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    Todo,
    Blocked,
    Inactive,
}

#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub kind: DispatchKind,
    pub target_agent_id: String,
    pub task_id: Option<Uuid>,
    pub session_ref: Option<String>,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub ran_at: DateTime<Utc>,
    pub scanned_tasks: usize,
    pub todo_tasks: usize,
    pub blocked_tasks: usize,
    pub inactive_agents: usize,
    pub sent: usize,
    pub failed: usize,
    pub dispatches: Vec<DispatchRecord>,
}

/// Reads board and session state and dispatches follow-up prompts through
/// the orchestrator, never holding any state of its own between cycles.
pub struct TaskScanner {
    agents: Arc<AgentRegistry>,
    sessions: Arc<SessionEngine>,
    boards: Arc<BoardStore>,
    orchestrator: Arc<Orchestrator>,
    clock: Arc<dyn Clock>,
}

impl TaskScanner {
    pub fn new(
        agents: Arc<AgentRegistry>,
        sessions: Arc<SessionEngine>,
        boards: Arc<BoardStore>,
        orchestrator: Arc<Orchestrator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { agents, sessions, boards, orchestrator, clock }
    }

    #[instrument(skip(self, config))]
    pub async fn run_cycle(&self, config: ScannerConfig) -> Result<CycleReport> {
        let ran_at = self.clock.now();
        let mut dispatches = Vec::new();
        let mut scanned_tasks = 0;
        let mut todo_tasks = 0;
        let mut blocked_tasks = 0;

        let boards = self.boards.list_boards(ListBoardsOptions::default()).await?;
        for board in &boards {
            let tasks = self.boards.list_tasks(Some(board.id), ListTasksOptions::default()).await?;
            for task in tasks {
                scanned_tasks += 1;
                match task.status {
                    TaskStatus::Todo => {
                        todo_tasks += 1;
                        let message = format!(
                            "Please begin task \"{}\": {} (project: {})",
                            task.title, task.description, task.project
                        );
                        let record = self
                            .dispatch(DispatchKind::Todo, &task.assigned_to, Some(task.id), message)
                            .await;
                        dispatches.push(record);
                    }
                    TaskStatus::Blocked => {
                        blocked_tasks += 1;
                        let reason = task.status_reason.clone().unwrap_or_default();
                        let message = format!(
                            "Task \"{}\" assigned to {} is blocked: {}. Please help unblock it.",
                            task.title, task.assigned_to, reason
                        );
                        let record = self
                            .dispatch(DispatchKind::Blocked, &board.owner, Some(task.id), message)
                            .await;
                        dispatches.push(record);
                    }
                    _ => {}
                }
            }
        }

        let head_id = self.agents.head_id().await;
        let mut inactive_agents = 0;
        for manifest in self.agents.list_agents().await {
            let sessions = self.sessions.list_sessions(&manifest.id).await?;
            let Some(latest) = sessions.iter().map(|s| s.last_activity_at).max() else {
                continue;
            };
            let idle_minutes = ran_at.signed_duration_since(latest).num_minutes();
            if idle_minutes < config.inactive_minutes {
                continue;
            }
            inactive_agents += 1;
            let target = match config.policy {
                InactivePolicy::CeoOnly => head_id.clone(),
                InactivePolicy::AllManagers => manifest.reports_to.clone().or_else(|| head_id.clone()),
            };
            let Some(target) = target else {
                warn!(agent = %manifest.id, "no manager available to receive inactivity nudge");
                continue;
            };
            let message = format!("{} has been inactive for {idle_minutes} minutes. Please check in.", manifest.id);
            let record = self.dispatch(DispatchKind::Inactive, &target, None, message).await;
            dispatches.push(record);
        }

        let sent = dispatches.iter().filter(|d| d.ok).count();
        let failed = dispatches.len() - sent;
        info!(scanned_tasks, todo_tasks, blocked_tasks, inactive_agents, sent, failed, "scanner cycle complete");

        Ok(CycleReport {
            ran_at,
            scanned_tasks,
            todo_tasks,
            blocked_tasks,
            inactive_agents,
            sent,
            failed,
            dispatches,
        })
    }

    async fn dispatch(
        &self,
        kind: DispatchKind,
        target_agent_id: &str,
        task_id: Option<Uuid>,
        message: String,
    ) -> DispatchRecord {
        let options = RunOptions { message, ..Default::default() };
        match self.orchestrator.run_agent(target_agent_id, options, None).await {
            Ok(result) => DispatchRecord {
                kind,
                target_agent_id: target_agent_id.to_string(),
                task_id,
                session_ref: result.session.map(|s| s.session_key),
                ok: true,
                error: None,
            },
            Err(e) => DispatchRecord {
                kind,
                target_agent_id: target_agent_id.to_string(),
                task_id,
                session_ref: None,
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Runs `run_cycle` on a fixed interval until `cancel` fires. One
    /// coroutine, no recursive scheduling; the interval is the only
    /// source of ticks.
    pub async fn run_loop(&self, interval: Duration, config: ScannerConfig, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scanner loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle(config).await {
                        warn!(error = %e, "scanner cycle failed");
                    }
                }
            }
        }
    }
}
