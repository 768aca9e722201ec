//! Paintress - autonomous expedition runner
//!
//! The `paintress` command drives a coding agent through pending issues of
//! a target repository, one isolated worktree per cycle.
//!
//! ## Commands
//!
//! - `run`: fetch pending issues and run an expedition against a continent
//! - `config`: print the effective configuration for a continent

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};

use paintress_core::{
    cancel_pair, CancelHandle, Expedition, ExpeditionConfig, ExpeditionDeps, Language,
    LinearClient, RunReport,
};

#[derive(Parser)]
#[command(name = "paintress")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Autonomous coding expeditions driven by an AI agent", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an expedition against a continent
    Run(RunArgs),

    /// Print the effective configuration for a continent as TOML
    Config {
        /// Target repository
        #[arg(default_value = ".")]
        continent: PathBuf,
    },
}

/// Flags overlaid on `<continent>/.expedition/config.toml`.
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Target repository
    #[arg(default_value = ".")]
    continent: PathBuf,

    /// Working-copy pool size (0 runs directly in the continent)
    #[arg(short, long, env = "PAINTRESS_WORKERS")]
    workers: Option<usize>,

    /// Per-cycle implementation timeout in seconds
    #[arg(short, long, env = "PAINTRESS_TIMEOUT")]
    timeout: Option<u64>,

    /// Maximum cycles dispatched in this run
    #[arg(short = 'n', long, env = "PAINTRESS_MAX_CYCLES")]
    max_cycles: Option<usize>,

    /// Base branch for worktrees and pull requests
    #[arg(long, env = "PAINTRESS_BASE_BRANCH")]
    base_branch: Option<String>,

    /// Model reserve in fallback order, comma separated (e.g. opus,sonnet)
    #[arg(short, long, env = "PAINTRESS_MODELS", value_delimiter = ',')]
    models: Option<Vec<String>>,

    /// Agent executable
    #[arg(long, env = "PAINTRESS_AGENT_CMD")]
    agent_cmd: Option<String>,

    /// Do not start the dev server
    #[arg(long)]
    no_dev: bool,

    /// Dev server command
    #[arg(long, env = "PAINTRESS_DEV_CMD")]
    dev_cmd: Option<String>,

    /// Command run once per working copy before its first cycle
    #[arg(long, env = "PAINTRESS_SETUP_CMD")]
    setup_cmd: Option<String>,

    /// Review command run after each pull request
    #[arg(long, env = "PAINTRESS_REVIEW_CMD")]
    review_cmd: Option<String>,

    /// Regex over review output that marks the review as failed
    #[arg(long)]
    review_fail_pattern: Option<String>,

    /// Print prompts instead of invoking the agent
    #[arg(long)]
    dry_run: bool,

    /// Prompt language (en, ja)
    #[arg(long, env = "PAINTRESS_LANG")]
    lang: Option<Language>,

    /// Linear team key
    #[arg(long, env = "LINEAR_TEAM")]
    team: Option<String>,

    /// Linear project name
    #[arg(long, env = "LINEAR_PROJECT")]
    project: Option<String>,

    /// Issue states to pick up, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    states: Option<Vec<String>>,

    /// Do not write the outcome journal
    #[arg(long)]
    no_journal: bool,

    /// Print the full run report as JSON on stdout
    #[arg(long)]
    report_json: bool,
}

impl RunArgs {
    /// Overlay explicit flags on a loaded config.
    fn apply(&self, config: &mut ExpeditionConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(max_cycles) = self.max_cycles {
            config.max_cycles = max_cycles;
        }
        if let Some(base) = &self.base_branch {
            config.base_branch = base.clone();
        }
        if let Some(models) = &self.models {
            config.models = models.clone();
        }
        if let Some(agent) = &self.agent_cmd {
            config.agent_cmd = agent.clone();
        }
        if self.no_dev {
            config.dev_server = false;
        }
        if let Some(cmd) = &self.dev_cmd {
            config.dev_cmd = Some(cmd.clone());
        }
        if let Some(cmd) = &self.setup_cmd {
            config.setup_cmd = Some(cmd.clone());
        }
        if let Some(cmd) = &self.review_cmd {
            config.review_cmd = Some(cmd.clone());
        }
        if let Some(pattern) = &self.review_fail_pattern {
            config.review_fail_pattern = Some(pattern.clone());
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(lang) = self.lang {
            config.lang = lang;
        }
        if let Some(team) = &self.team {
            config.tracker.team = team.clone();
        }
        if let Some(project) = &self.project {
            config.tracker.project = Some(project.clone());
        }
        if let Some(states) = &self.states {
            config.tracker.states = states.clone();
        }
        if self.no_journal {
            config.journal = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    paintress_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => {
            let code = cmd_run(&args).await?;
            std::process::exit(code);
        }
        Commands::Config { continent } => cmd_config(continent),
    }
}

/// Run an expedition and return the process exit code.
async fn cmd_run(args: &RunArgs) -> Result<i32> {
    let mut config = ExpeditionConfig::load(&args.continent)
        .with_context(|| format!("Failed to load config for {:?}", args.continent))?;
    args.apply(&mut config);

    let deps = ExpeditionDeps::from_config(&config).context("Invalid configuration")?;
    let expedition = Expedition::new(config, deps).context("Invalid configuration")?;

    let (handle, signal) = cancel_pair();
    spawn_signal_listener(handle);

    let tracker = LinearClient::from_env().context("Issue tracker unavailable")?;
    let queue = expedition
        .fetch_queue(&tracker, &signal)
        .await
        .context("Failed to fetch work items")?;
    info!(queued = queue.len(), run_id = %expedition.run_id(), "work queue ready");

    let report = expedition.run(queue, &signal).await?;
    if args.report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(report.status.exit_code())
}

/// Print the effective configuration.
fn cmd_config(continent: PathBuf) -> Result<()> {
    let config = ExpeditionConfig::load(&continent)
        .with_context(|| format!("Failed to load config for {:?}", continent))?;
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Fire the cancel handle on the first SIGINT or SIGTERM.
fn spawn_signal_listener(handle: CancelHandle) {
    tokio::spawn(async move {
        let reason = wait_for_signal().await;
        warn!(signal = %reason, "stopping dispatch, waiting for in-flight cycles");
        handle.cancel(reason);
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let Ok(mut term) = signal(SignalKind::terminate()) else {
        let _ = tokio::signal::ctrl_c().await;
        return "SIGINT";
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

fn print_summary(report: &RunReport) {
    println!("Run {} ({:.1}s)", report.run_id, report.duration.as_secs_f64());
    for outcome in &report.outcomes {
        let detail = match (&outcome.pull_request, &outcome.failure) {
            (_, Some(failure)) => format!("{}: {}", failure.kind, failure.message),
            (Some(pr), None) => pr.clone(),
            (None, None) => String::new(),
        };
        println!(
            "  [{:<11}] {:<12} {:<8} {:>7.1}s  {}",
            outcome.label(),
            outcome.item_id,
            outcome.model.as_deref().unwrap_or("-"),
            outcome.duration.as_secs_f64(),
            detail
        );
    }
    println!(
        "Attempted: {}  Done: {}  Failed: {}  Interrupted: {}",
        report.attempted,
        report.succeeded(),
        report.failed(),
        report.interrupted()
    );
}
