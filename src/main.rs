use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use broker_lifecycle::avs::HttpAvsClient;
use broker_lifecycle::clock::{Clock, SystemClock};
use broker_lifecycle::config::Config;
use broker_lifecycle::edp::HttpEdpClient;
use broker_lifecycle::logging;
use broker_lifecycle::operation::{Operation, OperationKind};
use broker_lifecycle::process::{
    Executor, OperationExecutor, OperationManager, ProcessError, Queue,
};
use broker_lifecycle::services::OperationScanner;
use broker_lifecycle::storage::{FileStorage, OperationStorage};
use broker_lifecycle::workflows::{self, Clients};

#[derive(Parser)]
#[command(name = "broker-lifecycle")]
#[command(about = "Provisioning and deprovisioning workflows for managed runtimes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Provision,
    Deprovision,
}

impl From<KindArg> for OperationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Provision => OperationKind::Provision,
            KindArg::Deprovision => OperationKind::Deprovision,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new in-progress operation
    Create {
        #[arg(short, long, value_enum)]
        kind: KindArg,

        /// Instance the operation belongs to
        #[arg(short, long)]
        instance: String,

        /// JSON file with the provisioning parameters
        #[arg(short, long)]
        parameters: PathBuf,

        /// Internal evaluation id to remove on deprovisioning
        #[arg(long)]
        internal_evaluation: Option<i64>,

        /// External evaluation id to remove on deprovisioning
        #[arg(long)]
        external_evaluation: Option<i64>,
    },

    /// Drive one operation until it finishes
    Run {
        /// Operation id
        operation: String,
    },

    /// Process all in-progress operations until Ctrl-C
    Serve {
        /// Concurrent workers (default: executor.workers)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Print a stored operation as JSON
    Show {
        /// Operation id
        operation: String,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;

    let long_running = matches!(cli.command, Commands::Serve { .. });
    let logging_handle = logging::init_logging(&config, long_running, cli.debug)?;

    match cli.command {
        Commands::Create {
            kind,
            instance,
            parameters,
            internal_evaluation,
            external_evaluation,
        } => {
            cmd_create(
                &config,
                kind.into(),
                instance,
                parameters,
                (internal_evaluation, external_evaluation),
            )?;
        }
        Commands::Run { operation } => {
            cmd_run(&config, &operation).await?;
        }
        Commands::Serve { workers } => {
            cmd_serve(&config, workers).await?;
        }
        Commands::Show { operation } => {
            cmd_show(&config, &operation)?;
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    if let Some(log_path) = logging_handle.log_file_path {
        eprintln!("Log: {}", log_path.display());
    }

    Ok(())
}

fn open_storage(config: &Config) -> Result<Arc<FileStorage>> {
    let dir = config.storage_path();
    let storage = FileStorage::open(&dir)
        .with_context(|| format!("Failed to open operation storage at {}", dir.display()))?;
    Ok(Arc::new(storage))
}

fn build_executor(config: &Config, storage: Arc<FileStorage>) -> Result<Executor> {
    let clients = Clients {
        edp: Arc::new(HttpEdpClient::new(&config.edp).context("Failed to build EDP client")?),
        avs: Arc::new(HttpAvsClient::new(&config.avs).context("Failed to build AVS client")?),
    };
    let manager = OperationManager::new(storage.clone());
    Ok(workflows::build_executor(
        storage,
        manager,
        clients,
        &config.edp,
        &config.avs,
    ))
}

fn cmd_create(
    config: &Config,
    kind: OperationKind,
    instance: String,
    parameters: PathBuf,
    evaluations: (Option<i64>, Option<i64>),
) -> Result<()> {
    let raw = std::fs::read_to_string(&parameters)
        .with_context(|| format!("Failed to read {}", parameters.display()))?;

    let mut operation = Operation::new(kind, instance, raw, SystemClock.now());
    operation
        .get_provisioning_parameters()
        .context("Invalid provisioning parameters")?;
    operation.avs.internal_evaluation_id = evaluations.0;
    operation.avs.external_evaluation_id = evaluations.1;

    let storage = open_storage(config)?;
    let operation = storage.insert_operation(operation)?;
    println!("{}", operation.id);
    Ok(())
}

async fn cmd_run(config: &Config, operation_id: &str) -> Result<()> {
    let storage = open_storage(config)?;
    let executor = build_executor(config, storage.clone())?;

    loop {
        match executor.execute(operation_id).await {
            Ok(delay) if delay.is_zero() => break,
            Ok(delay) => {
                tracing::info!(operation_id, "waiting {:?} before next attempt", delay);
                tokio::time::sleep(delay).await;
            }
            Err(ProcessError::OperationFailed(description)) => {
                bail!("Operation {} failed: {}", operation_id, description);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let operation = storage.get_operation(operation_id)?;
    println!(
        "Operation {} {}: {}",
        operation.id, operation.state, operation.description
    );
    Ok(())
}

async fn cmd_serve(config: &Config, workers: Option<usize>) -> Result<()> {
    let storage = open_storage(config)?;
    let executor = build_executor(config, storage.clone())?;
    let queue = Queue::new(Arc::new(executor));

    let (queue_shutdown_tx, queue_shutdown_rx) = mpsc::channel(1);
    let (scanner_shutdown_tx, scanner_shutdown_rx) = mpsc::channel(1);

    let mut scanner = OperationScanner::new(storage, queue.clone())
        .with_poll_interval(Duration::from_secs(config.executor.poll_interval_secs))
        .with_shutdown(scanner_shutdown_rx);
    let scanner_task = tokio::spawn(async move { scanner.run().await });

    let workers = workers.unwrap_or(config.executor.workers);
    let queue_task = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.run(workers, queue_shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested, {} operations pending", queue.pending());

    let _ = scanner_shutdown_tx.send(()).await;
    let _ = queue_shutdown_tx.send(()).await;
    scanner_task.await?;
    queue_task.await?;
    Ok(())
}

fn cmd_show(config: &Config, operation_id: &str) -> Result<()> {
    let storage = open_storage(config)?;
    let operation = storage.get_operation(operation_id)?;
    println!("{}", serde_json::to_string_pretty(&operation)?);
    Ok(())
}
