//! CLI command definitions for fanout.
//!
//! The `run` and `dispatch` commands push a synthetic workload through the
//! engine, which is handy for sizing patch and worker counts on a given
//! machine. `config` prints the configuration the other commands would use.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{Engine, EngineConfig};
use crate::executor::{ExecutionMode, WorkUnit};
use crate::metrics::{export_metrics, init_metrics};

/// Hierarchical fan-out executor.
#[derive(Parser)]
#[command(name = "fanout")]
#[command(about = "Run work in bounded patches, locally or across cluster workers")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a synthetic workload through the local batch runner.
    Run(RunArgs),

    /// Distribute a synthetic workload across cluster workers.
    Dispatch(DispatchArgs),

    /// Print the effective configuration as YAML.
    Config(ConfigArgs),
}

/// Workload and engine options shared by `run` and `dispatch`.
#[derive(clap::Args, Debug, Clone)]
pub struct WorkloadArgs {
    /// Number of work units to generate.
    #[arg(short = 'n', long, default_value = "32")]
    pub count: usize,

    /// How long each unit sleeps, in milliseconds.
    #[arg(long, default_value = "10")]
    pub sleep_ms: u64,

    /// Scheduling mode of the generated units.
    #[arg(long, value_enum, default_value = "blocking")]
    pub mode: ExecutionMode,

    /// Make the unit at this index fail.
    #[arg(long)]
    pub fail_at: Option<usize>,

    /// Override the configured patch size.
    #[arg(short = 'p', long)]
    pub patch_size: Option<usize>,

    /// Override the configured per-unit timeout, in seconds (0 disables it).
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// YAML configuration file (environment variables still apply on top).
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `fanout run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub workload: WorkloadArgs,

    /// Report every unit's outcome instead of failing on the first error.
    #[arg(long)]
    pub settled: bool,
}

/// Arguments for `fanout dispatch`.
#[derive(Parser, Debug)]
pub struct DispatchArgs {
    #[command(flatten)]
    pub workload: WorkloadArgs,

    /// Override the configured worker count.
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Override the configured cluster address.
    #[arg(long, env = "FANOUT_CLUSTER_ADDRESS")]
    pub address: Option<String>,
}

/// Arguments for `fanout config`.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// YAML configuration file (environment variables still apply on top).
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// Outcome of one CLI run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub command: &'static str,
    pub mode: ExecutionMode,
    pub units: usize,
    pub patch_size: usize,
    pub worker_count: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub succeeded: usize,
    pub failed: usize,
    pub checksum: u64,
    pub error: Option<String>,
}

impl RunSummary {
    fn print(&self, json: bool) -> anyhow::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
            return Ok(());
        }

        println!("\n=== fanout {} ===", self.command);
        println!("Run id:       {}", self.run_id);
        println!("Mode:         {}", self.mode);
        println!("Units:        {}", self.units);
        println!("Patch size:   {}", self.patch_size);
        if let Some(workers) = self.worker_count {
            println!("Workers:      {}", workers);
        }
        println!("Duration:     {} ms", self.duration_ms);
        println!("Succeeded:    {}", self.succeeded);
        println!("Failed:       {}", self.failed);
        println!("Checksum:     {}", self.checksum);
        if let Some(err) = &self.error {
            println!("Error:        {}", err);
        }
        Ok(())
    }
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_local_command(args).await,
        Commands::Dispatch(args) => run_dispatch_command(args).await,
        Commands::Config(args) => run_config_command(args),
    }
}

/// Loads config from `path` (or defaults) and layers `FANOUT_*` env vars on top.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)?.merge_env()?,
        None => EngineConfig::from_env()?,
    };
    Ok(config)
}

fn apply_workload_overrides(mut config: EngineConfig, workload: &WorkloadArgs) -> EngineConfig {
    if let Some(patch_size) = workload.patch_size {
        config.patch_size = patch_size;
    }
    if let Some(secs) = workload.timeout_secs {
        config.task_timeout_secs = Some(secs);
    }
    config
}

/// Builds the synthetic work list: unit `i` sleeps, then returns `i`.
pub fn synthetic_workload(workload: &WorkloadArgs) -> Vec<WorkUnit<u64>> {
    let sleep = Duration::from_millis(workload.sleep_ms);

    (0..workload.count)
        .map(|i| {
            let fail = workload.fail_at == Some(i);
            let value = i as u64;
            match workload.mode {
                ExecutionMode::Blocking => WorkUnit::blocking(move || {
                    std::thread::sleep(sleep);
                    if fail {
                        Err(format!("synthetic failure at unit {}", i))
                    } else {
                        Ok(value)
                    }
                }),
                ExecutionMode::Cooperative => WorkUnit::cooperative(move || async move {
                    tokio::time::sleep(sleep).await;
                    if fail {
                        Err(format!("synthetic failure at unit {}", i))
                    } else {
                        Ok(value)
                    }
                }),
            }
        })
        .collect()
}

async fn run_local_command(args: RunArgs) -> anyhow::Result<()> {
    let workload = args.workload;
    let config = apply_workload_overrides(load_config(workload.config.as_deref())?, &workload);
    if workload.metrics {
        init_metrics()?;
    }

    let engine = Engine::new(config)?;
    let units = synthetic_workload(&workload);
    let started_at = Utc::now();
    let started = Instant::now();

    info!(
        units = workload.count,
        mode = %workload.mode,
        patch_size = engine.config().patch_size,
        settled = args.settled,
        "Starting local run"
    );

    let mut summary = RunSummary {
        run_id: Uuid::new_v4(),
        command: "run",
        mode: workload.mode,
        units: workload.count,
        patch_size: engine.config().patch_size,
        worker_count: None,
        started_at,
        duration_ms: 0,
        succeeded: 0,
        failed: 0,
        checksum: 0,
        error: None,
    };

    if args.settled {
        let outcomes = engine.run_settled(units).await?;
        for outcome in outcomes {
            match outcome {
                Ok(value) => {
                    summary.succeeded += 1;
                    summary.checksum += value;
                }
                Err(e) => {
                    warn!(error = %e, "Work unit failed");
                    summary.failed += 1;
                    summary.error.get_or_insert_with(|| e.to_string());
                }
            }
        }
    } else {
        match engine.run(units).await {
            Ok(values) => {
                summary.succeeded = values.len();
                summary.checksum = values.iter().sum();
            }
            Err(e) => {
                summary.failed = workload.count;
                summary.error = Some(e.to_string());
            }
        }
    }

    summary.duration_ms = started.elapsed().as_millis() as u64;
    finish(&engine, &summary, &workload).await
}

async fn run_dispatch_command(args: DispatchArgs) -> anyhow::Result<()> {
    let workload = args.workload;
    let mut config = apply_workload_overrides(load_config(workload.config.as_deref())?, &workload);
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(address) = args.address {
        config.cluster_address = address;
    }
    if workload.metrics {
        init_metrics()?;
    }

    let engine = Engine::new(config)?;
    let units = synthetic_workload(&workload);
    let started_at = Utc::now();
    let started = Instant::now();

    info!(
        units = workload.count,
        mode = %workload.mode,
        workers = engine.config().worker_count,
        cluster = %engine.config().cluster_address,
        "Starting dispatch"
    );

    let mut summary = RunSummary {
        run_id: Uuid::new_v4(),
        command: "dispatch",
        mode: workload.mode,
        units: workload.count,
        patch_size: engine.config().patch_size,
        worker_count: Some(engine.config().worker_count),
        started_at,
        duration_ms: 0,
        succeeded: 0,
        failed: 0,
        checksum: 0,
        error: None,
    };

    match engine.dispatch(units).await {
        Ok(values) => {
            summary.succeeded = values.len();
            summary.checksum = values.iter().sum();
        }
        Err(e) => {
            summary.failed = workload.count;
            summary.error = Some(e.to_string());
        }
    }

    summary.duration_ms = started.elapsed().as_millis() as u64;
    finish(&engine, &summary, &workload).await
}

async fn finish(engine: &Engine, summary: &RunSummary, workload: &WorkloadArgs) -> anyhow::Result<()> {
    summary.print(workload.json)?;
    if workload.metrics {
        print!("{}", export_metrics());
    }

    engine.shutdown().await?;

    // `run --settled` reports failures in the summary without failing the command.
    if let (Some(err), 0) = (&summary.error, summary.succeeded) {
        anyhow::bail!("{} failed: {}", summary.command, err);
    }
    Ok(())
}

fn run_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.validate()?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
