//! Resolves an entry agent, routes, prepares a session, invokes the
//! bound provider, records the reply, and writes a run trace.

mod config;
mod core;
mod trace;
mod types;

pub use config::OrchestratorConfig;
pub use core::Orchestrator;
pub use trace::{RunTrace, TraceExecution, TraceSession, TraceStore};
pub use types::{
    HooksHandle, OrchestrationEvent, OrchestrationHooks, RunOptions, RunResult, SessionRunInfo, Stage,
    StopReason,
};
