//! OpenGoat - multi-agent orchestration runtime
//!
//! Daemon entry point: runs the task scanner on a cadence and serves the
//! ACP façade over stdin/stdout.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opengoat_acp::AcpBridge;
use opengoat_core::agents::AgentRegistry;
use opengoat_core::boards::BoardStore;
use opengoat_core::clock::{Clock, SystemClock};
use opengoat_core::config::RuntimeConfig;
use opengoat_core::orchestrator::{Orchestrator, OrchestratorConfig};
use opengoat_core::paths::{FsPort, HomeLayout, RealFs};
use opengoat_core::scanner::{ScannerConfig, TaskScanner};
use opengoat_core::sessions::SessionEngine;
use opengoat_llm::{CliProvider, CliProviderConfig, MockProvider, ProviderRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "opengoatd", version, about = "OpenGoat multi-agent orchestration daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scanner loop and serve the ACP façade over stdio.
    Serve,
    /// Run one scanner pass and exit.
    Scan {
        #[arg(long)]
        once: bool,
    },
}

struct Runtime {
    config: RuntimeConfig,
    agents: Arc<AgentRegistry>,
    sessions: Arc<SessionEngine>,
    boards: Arc<BoardStore>,
    orchestrator: Arc<Orchestrator>,
}

async fn bootstrap() -> Result<Runtime> {
    let config = RuntimeConfig::load().context("loading runtime configuration")?;
    let home = config.home_dir.clone().unwrap_or_else(HomeLayout::default_home);
    let layout = HomeLayout::new(home);
    let fs: Arc<dyn FsPort> = Arc::new(RealFs);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let agents = Arc::new(AgentRegistry::new(fs.clone(), layout.clone()));
    agents.load().await.context("loading agent directory")?;

    let sessions = Arc::new(SessionEngine::new(fs.clone(), layout.clone(), clock.clone()));
    let boards = Arc::new(BoardStore::new(&layout.boards_db()).await.context("opening boards database")?);

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(MockProvider::new("mock")));
    let mut claude_cli = CliProviderConfig::new("claude-cli", "claude");
    claude_cli.command_env_var = Some("OPENGOAT_CLAUDE_CLI_PATH".to_string());
    claude_cli.session_flag = Some("--resume".to_string());
    claude_cli.model_flag = Some("--model".to_string());
    registry.register(Arc::new(CliProvider::new(claude_cli)));

    let orchestrator = Arc::new(Orchestrator::new(
        fs,
        layout,
        clock,
        agents.clone(),
        sessions.clone(),
        Arc::new(registry),
        OrchestratorConfig { max_parallel_flows: config.max_parallel_flows, ..Default::default() },
    ));

    Ok(Runtime { config, agents, sessions, boards, orchestrator })
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "opengoatd=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = bootstrap().await?;

    match cli.command {
        Commands::Serve => serve(runtime).await,
        Commands::Scan { once } => scan(runtime, once).await,
    }
}

async fn serve(runtime: Runtime) -> Result<()> {
    info!("opengoatd starting");
    let cancel = CancellationToken::new();

    let scanner = TaskScanner::new(
        runtime.agents.clone(),
        runtime.sessions.clone(),
        runtime.boards.clone(),
        runtime.orchestrator.clone(),
        Arc::new(SystemClock),
    );
    let scanner_config = ScannerConfig {
        inactive_minutes: runtime.config.scanner_inactive_minutes,
        policy: runtime.config.scanner_policy(),
    };
    let scanner_cancel = cancel.clone();
    let scanner_interval = Duration::from_secs(runtime.config.scanner_interval_minutes * 60);
    let scanner_handle =
        tokio::spawn(async move { scanner.run_loop(scanner_interval, scanner_config, scanner_cancel).await });

    let bridge = AcpBridge::new(runtime.agents, runtime.sessions, runtime.orchestrator, runtime.config.default_agent);
    let bridge_result = bridge.run().await;
    cancel.cancel();
    let _ = scanner_handle.await;
    bridge_result
}

async fn scan(runtime: Runtime, once: bool) -> Result<()> {
    let scanner = TaskScanner::new(
        runtime.agents.clone(),
        runtime.sessions.clone(),
        runtime.boards.clone(),
        runtime.orchestrator.clone(),
        Arc::new(SystemClock),
    );
    let scanner_config =
        ScannerConfig { inactive_minutes: runtime.config.scanner_inactive_minutes, policy: runtime.config.scanner_policy() };

    if once {
        let report = scanner.run_cycle(scanner_config).await?;
        info!(
            scanned = report.scanned_tasks,
            todo = report.todo_tasks,
            blocked = report.blocked_tasks,
            inactive = report.inactive_agents,
            sent = report.sent,
            failed = report.failed,
            "scan complete"
        );
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping scanner");
        }
        _ = scanner.run_loop(Duration::from_secs(runtime.config.scanner_interval_minutes * 60), scanner_config, cancel.clone()) => {}
    }
    Ok(())
}
