//! AWSIM-Script client CLI
//!
//! ## Commands
//!
//! - `launch`: run a scenario script, or every `*.script` file in a directory
//! - `check`: parse scripts and print their command plans without running them

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

use awscript_core::report::{render_plan, render_summary, write_json_report};
use awscript_core::telemetry::init_tracing;
use awscript_core::{
    discover_scripts, load_script, BatchSequencer, BridgeTransport, CancelSignal, ClientConfig,
    ScenarioRunner,
};

#[derive(Parser)]
#[command(name = "awscript")]
#[command(version = awscript_core::VERSION)]
#[command(about = "Run AWSIM-Script scenarios against the simulator and the autonomous stack", long_about = None)]
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
    /// Run a scenario script, or every script in a directory
    Launch(LaunchArgs),

    /// Parse scripts and print their plans
    Check {
        /// Script file or directory of scripts
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct LaunchArgs {
    /// Script file or directory of scripts
    path: PathBuf,

    /// TOML configuration file
    #[arg(short, long, env = "AWSCRIPT_CONFIG")]
    config: Option<PathBuf>,

    /// Bridge address (host:port)
    #[arg(long)]
    bridge: Option<String>,

    /// Seconds the ego may take to reach its goal
    #[arg(long, value_name = "SECS")]
    goal_timeout: Option<u64>,

    /// Seconds each gated command may wait for its condition
    #[arg(long, value_name = "SECS")]
    gate_timeout: Option<u64>,

    /// Wait for the recorder to write its trace before the next scenario
    #[arg(short = 'w', long, action = ArgAction::Set, value_name = "BOOL")]
    wait_writing_trace: Option<bool>,

    /// Write the batch report as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

impl LaunchArgs {
    /// Configuration layered as defaults, file, environment, then flags.
    fn resolve_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ClientConfig::default(),
        };
        config
            .apply_env_from(|key| std::env::var(key).ok())
            .context("invalid AWSCRIPT_* environment")?;

        if let Some(bridge) = &self.bridge {
            config.bridge_addr = bridge.clone();
        }
        if let Some(secs) = self.goal_timeout {
            config.goal_timeout_secs = secs;
        }
        if let Some(secs) = self.gate_timeout {
            config.gate_timeout_secs = secs;
        }
        if let Some(wait) = self.wait_writing_trace {
            config.wait_for_trace = wait;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Launch(args) => cmd_launch(args).await,
        Commands::Check { path } => cmd_check(&path),
    }
}

async fn cmd_launch(args: LaunchArgs) -> Result<ExitCode> {
    let config = args.resolve_config()?;
    if !args.path.exists() {
        bail!("scenario path not found: {}", args.path.display());
    }

    let transport = BridgeTransport::connect(&config.bridge_addr, config.ack_timeout())
        .await
        .with_context(|| format!("failed to connect to bridge at {}", config.bridge_addr))?;

    let cancel = CancelSignal::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    info!(path = %args.path.display(), bridge = %config.bridge_addr, "launching");
    let runner = ScenarioRunner::new(Arc::new(transport), config).with_cancel(cancel);
    let report = BatchSequencer::new(runner).launch(&args.path).await?;

    print!("{}", render_summary(&report));
    if let Some(path) = &args.report {
        write_json_report(path, &report)?;
        info!(path = %path.display(), "report written");
    }

    Ok(if report.aborted {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_check(path: &Path) -> Result<ExitCode> {
    Ok(if check_scripts(path)? == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print each script's plan or parse error; returns the number rejected.
fn check_scripts(path: &Path) -> Result<usize> {
    let scripts = if path.is_dir() {
        discover_scripts(path)?
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        bail!("scenario path not found: {}", path.display());
    };

    let mut rejected = 0;
    for script in &scripts {
        match load_script(script) {
            Ok(parsed) => print!("{}", render_plan(&parsed)),
            Err(err) => {
                rejected += 1;
                println!("{err}");
            }
        }
    }
    println!("{} script(s) checked, {rejected} rejected", scripts.len());
    Ok(rejected)
}
