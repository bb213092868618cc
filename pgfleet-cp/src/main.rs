use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ipnet::Ipv4Net;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pgfleet_cp::{Config, ControlPlane, TaskReport};
use pgfleet_log::TaskStatus;
use pgfleet_swarm::resources::BackupType;
use pgfleet_swarm::{DatabaseSpec, SubnetRangeSpec};

#[derive(Parser)]
#[command(name = "pgfleet-cp")]
#[command(about = "pgfleet Control Plane - reconciles Postgres clusters across a host fleet")]
struct Args {
    /// Prefix of every key in the store
    #[arg(long, default_value = "pgfleet")]
    root: String,

    /// Data directory for instance files and the store
    #[arg(short, long, default_value = "/var/lib/pgfleet")]
    data_dir: PathBuf,

    /// Host this control plane runs on (defaults to hostname)
    #[arg(long)]
    host_id: Option<String>,

    /// Deadline of a single remote lifecycle call, in seconds
    #[arg(long, default_value = "300")]
    dispatch_timeout: u64,

    /// Pool database networks are allocated from
    #[arg(long, default_value = "10.128.0.0/16")]
    subnet_cidr: Ipv4Net,

    /// Prefix length of each database network
    #[arg(long, default_value = "26")]
    subnet_bits: u8,

    /// Run in development mode (ephemeral store, in-memory filesystem)
    #[arg(long)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show what apply would do
    Plan {
        /// Database spec (JSON)
        #[arg(long)]
        spec: PathBuf,
    },
    /// Create or update a database
    Apply {
        /// Database spec (JSON)
        #[arg(long)]
        spec: PathBuf,

        /// Update every resource, changed or not
        #[arg(long)]
        force_update: bool,
    },
    /// Tear down a database
    Delete {
        /// Database spec (JSON)
        #[arg(long)]
        spec: PathBuf,
    },
    /// Back up one node from its primary
    Backup {
        /// Database spec (JSON)
        #[arg(long)]
        spec: PathBuf,

        /// Node to back up
        #[arg(long)]
        node: String,

        /// Backup type (full, diff, incr)
        #[arg(long = "type", default_value = "full")]
        backup_type: BackupType,
    },
}

async fn read_spec(path: &PathBuf) -> Result<DatabaseSpec> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    DatabaseSpec::from_json(&bytes).with_context(|| format!("parsing {}", path.display()))
}

fn report(report: TaskReport) -> Result<()> {
    if let Some(summary) = &report.summary {
        println!("{}", serde_json::to_string_pretty(summary)?);
    }
    println!("{}", serde_json::to_string_pretty(&report.task)?);
    match report.task.status {
        TaskStatus::Completed => Ok(()),
        status => bail!(
            "task {} {}: {}",
            report.task.task_id,
            status,
            report.task.error.unwrap_or_default()
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pgfleet_cp=info,pgfleet_resource=info,pgfleet_swarm=info".into()),
        )
        .init();

    let args = Args::parse();

    let host_id = args.host_id.unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string())
    });

    let config = Config {
        root: args.root,
        data_dir: args.data_dir,
        host_id,
        dispatch_timeout: Duration::from_secs(args.dispatch_timeout),
        subnet: SubnetRangeSpec::new(args.subnet_cidr, args.subnet_bits),
        dev: args.dev,
    };
    info!(
        "Starting pgfleet-cp on {} (data dir {}, dev: {})",
        config.host_id,
        config.data_dir.display(),
        config.dev
    );

    let control_plane = Arc::new(ControlPlane::open(config).await?);

    let cancel = control_plane.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT, canceling");
            cancel.cancel();
        }
    });

    match args.command {
        Command::Plan { spec } => {
            let spec = read_spec(&spec).await?;
            let summary = control_plane.plan(&spec).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Apply { spec, force_update } => {
            let spec = read_spec(&spec).await?;
            report(control_plane.apply(&spec, force_update).await?)
        }
        Command::Delete { spec } => {
            let spec = read_spec(&spec).await?;
            report(control_plane.delete(&spec).await?)
        }
        Command::Backup {
            spec,
            node,
            backup_type,
        } => {
            let spec = read_spec(&spec).await?;
            report(control_plane.backup(&spec, &node, backup_type).await?)
        }
    }
}
