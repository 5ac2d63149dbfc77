/*
 * 5D Labs Agent Platform - Component Reconciler
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Component Reconciler - brings Kubernetes components to a target version
//!
//! - `start` serves reconciliation requests over HTTP
//! - `local` runs one task from a file in-process

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reconciler::callback::{CallbackHandler, LocalCallbackHandler};
use reconciler::chart::WorkspaceFactory;
use reconciler::kubernetes::KubeconfigClientFactory;
use reconciler::service::PoolConfig;
use reconciler::{server, ComponentRegistry, ReconcilerConfig, RuntimeContext, Task, WorkerPool};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "component-reconciler")]
#[command(about = "Reconciles Kubernetes components to a target version")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, env = "RECONCILER_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, env = "RECONCILER_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Override workspace.root
    #[arg(long, global = true, env = "RECONCILER_WORKSPACE")]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve reconciliation requests over HTTP
    Start {
        /// Override server.port
        #[arg(long, env = "RECONCILER_PORT")]
        port: Option<u16>,

        /// Override workers.size
        #[arg(long, env = "RECONCILER_WORKERS")]
        workers: Option<usize>,

        /// Override retry.maxRetries
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Run a single task (JSON or YAML file) in this process
    Local {
        #[arg(long)]
        task: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = match &cli.config {
        Some(path) => ReconcilerConfig::from_mounted_file(&path.to_string_lossy())?,
        None => ReconcilerConfig::default(),
    };
    if let Some(workspace) = &cli.workspace {
        config.workspace.root = workspace.to_string_lossy().into_owned();
    }

    match cli.command {
        Commands::Start {
            port,
            workers,
            max_retries,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(workers) = workers {
                config.workers.size = workers;
            }
            if let Some(max_retries) = max_retries {
                config.retry.max_retries = max_retries;
            }
            config.validate().context("Invalid configuration")?;
            start(config).await
        }
        Commands::Local { task } => {
            config.validate().context("Invalid configuration")?;
            local(config, &task).await
        }
    }
}

fn runtime(config: &ReconcilerConfig) -> Result<Arc<RuntimeContext>> {
    let registry =
        ComponentRegistry::from_config(config).context("Failed to register component reconcilers")?;
    Ok(Arc::new(RuntimeContext {
        registry,
        client_factory: Arc::new(KubeconfigClientFactory),
        workspace: Arc::new(WorkspaceFactory::new(&config.workspace.root)),
    }))
}

async fn start(config: ReconcilerConfig) -> Result<()> {
    info!(
        port = config.server.port,
        workers = config.workers.size,
        workspace = %config.workspace.root,
        "Starting component reconciler"
    );

    let cancel = CancellationToken::new();
    let pool = Arc::new(
        WorkerPool::start(runtime(&config)?, PoolConfig::from(&config), cancel.clone())
            .context("Failed to start worker pool")?,
    );
    info!(pool_id = pool.pool_id(), "Worker pool started");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    server::serve(Arc::clone(&pool), config.server.port, cancel.clone())
        .await
        .context("HTTP server failed")?;

    cancel.cancel();
    pool.stopped().await;
    info!("Component reconciler stopped");
    Ok(())
}

async fn local(config: ReconcilerConfig, path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read task file {}", path.display()))?;
    let task: Task = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse task file {}", path.display()))?;

    let runtime = runtime(&config)?;
    let reconciler = runtime
        .registry
        .resolve(&task.component)
        .context("No reconciler for task")?;

    let callback: Arc<dyn CallbackHandler> = Arc::new(LocalCallbackHandler::new(|msg| {
        if msg.error.is_empty() {
            info!(status = %msg.status, retry_id = %msg.retry_id, "Reconciliation status");
        } else {
            warn!(
                status = %msg.status,
                retry_id = %msg.retry_id,
                error = %msg.error,
                "Reconciliation status"
            );
        }
        Ok(())
    }));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        interrupt.cancel();
    });

    match reconciler.start_local(runtime, cancel, task, callback).await {
        Ok(()) => {
            info!("Local reconciliation finished");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "Local reconciliation failed");
            Err(err.into())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
