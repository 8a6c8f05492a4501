use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kubedump_controller::{Controller, ControllerOptions};
use kubedump_core::Cluster;
use kubedump_filter::{parse, Expression};
use kubedump_kubehub::KubeCluster;
use kubedump_persist::PROCESS_LOG;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "kubedump", version, about = "Dump cluster resources, events and logs to disk")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the cluster and write matching resources until interrupted
    Dump {
        /// Output directory
        #[arg(long = "dir", env = "KUBEDUMP_DIR", default_value = "kubedump")]
        dir: PathBuf,
        /// Filter expression, e.g. "and namespace prod (not pod */debug-*)"
        #[arg(long = "filter", env = "KUBEDUMP_FILTER", default_value = "")]
        filter: String,
        /// Worker count (overrides KUBEDUMP_WORKERS)
        #[arg(long = "workers")]
        workers: Option<usize>,
    },
    /// Copy the resources of an existing dump that match a filter into another directory
    Filter {
        /// Existing dump
        src: PathBuf,
        /// Destination directory
        dst: PathBuf,
        /// Filter expression
        filter: String,
    },
    /// Parse a filter and print its canonical form
    Check {
        filter: String,
    },
}

/// Console logging from `KUBEDUMP_LOG`, plus a plain-text copy into `log_file` when given.
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let env = std::env::var("KUBEDUMP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_target(true).with_writer(Mutex::new(file)))
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(file_layer)
        .init();
    Ok(())
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KUBEDUMP_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KUBEDUMP_METRICS_ADDR; expected host:port");
        }
    }
}

fn compile(filter: &str) -> Result<Expression> {
    parse(filter).with_context(|| format!("invalid filter {:?}", filter))
}

async fn dump(dir: PathBuf, filter: String, workers: Option<usize>) -> Result<()> {
    let expr = compile(&filter)?;
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    init_tracing(Some(&dir.join(PROCESS_LOG)))?;
    init_metrics();

    let mut opts = ControllerOptions::from_env(&dir);
    if let Some(n) = workers {
        opts.workers = n.max(1);
    }
    let workers = opts.workers;
    let cluster: Arc<dyn Cluster> = Arc::new(KubeCluster::connect().await?);
    let controller = Controller::new(cluster, opts);

    info!(dir = %dir.display(), filter = %expr, workers, "dump starting");
    controller.start(workers, expr).await?;
    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("interrupt received, stopping");
    controller.stop().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Dump { dir, filter, workers } => {
            if let Err(e) = dump(dir, filter, workers).await {
                error!(error = ?e, "dump failed");
                return Err(e);
            }
        }
        Commands::Filter { src, dst, filter } => {
            init_tracing(None)?;
            let expr = compile(&filter)?;
            let copied = kubedump_persist::filter_tree(&src, &dst, &expr)?;
            println!("copied {} resources into {}", copied, dst.display());
        }
        Commands::Check { filter } => {
            let expr = compile(&filter)?;
            println!("{}", expr);
        }
    }
    Ok(())
}
