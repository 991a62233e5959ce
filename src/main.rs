use std::path::PathBuf;

use ::tracing::{error, info, info_span, Instrument};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::BeaconConfig;
use data_model::{ExecutionId, JobId};
use service::{Service, WatchOptions};

mod config;
mod service;
mod tracing;
use tracing::setup_tracing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a job until it is dismissed or disappears
    Watch {
        job_id: String,
        /// Submit a follow-up job for regions that did not complete
        #[arg(long)]
        retry: bool,
        /// Check transparency log inclusion of completed executions
        #[arg(long)]
        verify_proofs: bool,
    },
    /// Print the cross-region diff analysis of a job as JSON
    Diff { job_id: String },
    /// Check that an execution's content is in the transparency log
    Verify { execution_id: String, cid: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => BeaconConfig::from_path(path)?,
        None => BeaconConfig::from_env()?,
    };

    setup_tracing(&config)?;
    if let Err(err) = metrics::init_provider(&config.telemetry, &config.env) {
        error!("Error setting up metrics: {:?}", err);
    }

    let root_span = info_span!("beacon", env = config.env);
    let service = Service::new(config)?;
    run(service, cli.command).instrument(root_span).await
}

async fn run(service: Service, command: Commands) -> Result<()> {
    match command {
        Commands::Watch {
            job_id,
            retry,
            verify_proofs,
        } => {
            let shutdown = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!("Error listening for ctrl-c: {:?}", err);
                    std::future::pending::<()>().await;
                }
            };
            let snapshot = service
                .watch(
                    JobId::new(job_id),
                    WatchOptions {
                        retry,
                        verify_proofs,
                    },
                    shutdown,
                )
                .await?;
            info!(state = %snapshot.state, "watch finished");
        }
        Commands::Diff { job_id } => {
            let job_id = JobId::new(job_id);
            let analysis = service
                .diff(&job_id)
                .await?
                .with_context(|| format!("no analysis available for job {job_id}"))?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Commands::Verify { execution_id, cid } => {
            let check = service.verify(&ExecutionId::new(execution_id), &cid).await;
            println!("{}", serde_json::to_string_pretty(&check)?);
        }
    }
    Ok(())
}
