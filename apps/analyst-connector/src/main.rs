mod bootstrap;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "analyst-connector",
    version,
    about = "Fan analysis jobs out to the compute cluster and collect their results"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = "application.toml")]
    config: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-arm incomplete jobs and poll the broker until Ctrl-C (default).
    Run,
    /// Submit the job described by a TOML file.
    Submit {
        job: PathBuf,
        /// Keep polling until the job completes.
        #[arg(long)]
        wait: bool,
    },
    /// Print progress of one job, a project's jobs, or every job.
    Status {
        job_id: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// Ask the broker to drop a job's outstanding work.
    ///
    /// Run from a separate process this only notifies the broker; a running
    /// `run` daemon keeps polling the job until it restarts or the job completes.
    Cancel { job_id: String },
    /// Cancel a job and remove its record and results.
    Delete { job_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    analyst_otel::init();
    let cli = Cli::parse();
    let cfg = analyst_core::load_config(&cli.config)?;
    let rt = bootstrap::build(&cfg)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            rt.orchestrator.recover().await?;
            let cancel = CancellationToken::new();
            let poller = analyst_core::poller::spawn(rt.queue.clone(), rt.poll_interval, cancel.clone());
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            cancel.cancel();
            let _ = poller.await;
        }
        Commands::Submit { job, wait } => {
            let record = bootstrap::JobFile::load(&job)?.into_record();
            let saved = rt.orchestrator.submit(record).await?;
            println!("{}", saved.id);
            if wait {
                wait_for(&rt, &saved.id).await?;
            }
        }
        Commands::Status { job_id, project } => {
            let out = match (job_id, project) {
                (Some(id), _) => serde_json::to_value(rt.orchestrator.progress(&id).await?)?,
                (None, Some(p)) => serde_json::to_value(rt.orchestrator.jobs_for_project(&p).await?)?,
                (None, None) => serde_json::to_value(rt.orchestrator.all_jobs().await?)?,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Cancel { job_id } => {
            rt.orchestrator.cancel(&job_id).await;
            println!("cancelled {job_id}");
        }
        Commands::Delete { job_id } => {
            if rt.orchestrator.delete(&job_id).await? {
                println!("deleted {job_id}");
            } else {
                println!("no job {job_id}");
            }
        }
    }
    Ok(())
}

/// Poll until `job_id` completes or Ctrl-C.
async fn wait_for(rt: &bootstrap::Runtime, job_id: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let poller = analyst_core::poller::spawn(rt.queue.clone(), rt.poll_interval, cancel.clone());
    loop {
        let progress = rt.orchestrator.progress(job_id).await?;
        eprintln!("{job_id}: {}%", progress.percent);
        if progress.complete {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(rt.poll_interval) => {}
        }
    }
    cancel.cancel();
    let _ = poller.await;
    Ok(())
}
