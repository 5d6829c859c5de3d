use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sources_core::AddressLookup;
use sources_kubehub::{ControllerConfig, DynamicAddressLookup};
use sources_reconciler::{CronJobStrategy, JobStrategy, ServiceStrategy};
use tracing::{error, info};

mod simulate;

#[derive(Parser, Debug)]
#[command(name = "sources-controller", version, about = "Reconciles Job, CronJob and Service event sources")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Restrict to one namespace (default: all)
    #[arg(long = "ns", global = true, env = "SOURCES_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Kind { Job, Cronjob, Service }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run controllers against the current cluster context
    Run {
        /// Source kinds to reconcile
        #[arg(long = "kinds", value_enum, value_delimiter = ',', default_values_t = [Kind::Job, Kind::Cronjob, Kind::Service])]
        kinds: Vec<Kind>,
        /// Requeue interval after a successful reconcile
        #[arg(long = "resync-secs", env = "SOURCES_RESYNC_SECS", default_value_t = 300)]
        resync_secs: u64,
        /// Requeue interval after a failed reconcile
        #[arg(long = "error-requeue-secs", env = "SOURCES_ERROR_REQUEUE_SECS", default_value_t = 10)]
        error_requeue_secs: u64,
    },
    /// Print the CustomResourceDefinitions as YAML
    Crds,
    /// Reconcile manifests against an in-memory store and print the outcome
    Simulate {
        /// Multi-document YAML manifests
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        #[arg(long = "workers", default_value_t = 4)]
        workers: usize,
        #[arg(long = "rounds", default_value_t = 3)]
        rounds: usize,
    },
}

fn init_tracing() {
    let env = std::env::var("SOURCES_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SOURCES_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SOURCES_METRICS_ADDR; expected host:port");
        }
    }
}

fn print_crds() -> Result<()> {
    let docs = sources_api::crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()
        .context("rendering CRDs")?;
    print!("{}", docs.join("---\n"));
    Ok(())
}

async fn run_controllers(namespace: Option<String>, kinds: Vec<Kind>, resync: Duration, error_requeue: Duration) -> Result<()> {
    if kinds.is_empty() {
        bail!("--kinds must name at least one of job, cronjob, service");
    }
    let client = sources_kubehub::get_kube_client().await?;
    let lookup: Arc<dyn AddressLookup> = Arc::new(DynamicAddressLookup::new(client.clone()));
    let config = ControllerConfig { namespace, resync, error_requeue, reporter: "sources-controller".into() };

    let mut handles = Vec::new();
    for kind in kinds {
        let (client, config, lookup) = (client.clone(), config.clone(), lookup.clone());
        handles.push(tokio::spawn(async move {
            match kind {
                Kind::Job => sources_kubehub::run(client, JobStrategy, config, lookup).await,
                Kind::Cronjob => sources_kubehub::run(client, CronJobStrategy, config, lookup).await,
                Kind::Service => sources_kubehub::run(client, ServiceStrategy, config, lookup).await,
            }
        }));
    }
    for res in futures::future::join_all(handles).await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = ?e, "controller failed"),
            Err(e) => error!(error = %e, "controller task panicked"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { kinds, resync_secs, error_requeue_secs } => {
            info!(?kinds, ns = ?cli.namespace, resync_secs, error_requeue_secs, "run invoked");
            run_controllers(
                cli.namespace,
                kinds,
                Duration::from_secs(resync_secs),
                Duration::from_secs(error_requeue_secs),
            )
            .await?;
        }
        Commands::Crds => print_crds()?,
        Commands::Simulate { file, workers, rounds } => {
            info!(file = %file.display(), workers, rounds, "simulate invoked");
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let ns = cli.namespace.as_deref().unwrap_or("default");
            let report = simulate::simulate(&text, ns, workers.max(1), rounds).await?;
            match cli.output {
                Output::Human => simulate::print_human(&report),
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
    }
    Ok(())
}
