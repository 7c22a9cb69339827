//! docingest CLI: queue documents for ingestion and inspect job records.
//!
//! Configuration comes from an optional JSON file plus `DOCINGEST_*`
//! environment overrides. `RUST_LOG` controls log verbosity.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;

use docingest::config::{load_with_env, Config};
use docingest::db::Database;
use docingest::jobs::JobStore;
use docingest::telemetry::{init_tracing, LogFormat};
use docingest::worker::{Dispatcher, PoolConfig, TaskReport, WorkerPool};
use docingest::{
    JobProgressBroadcaster, JsonlVectorStore, Pipeline, PipelineConfig, Submitter, Upload,
};

const RESULT_POLL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "docingest", version, about = "Asynchronous document ingestion jobs")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format: plain or json
    #[arg(long, global = true, default_value = "plain")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue files and process them until every job is finished
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Target collection (defaults to the file name, or "documents" for a batch)
        #[arg(long)]
        collection: Option<String>,
        /// Submit all files as one batch job
        #[arg(long)]
        batch: bool,
    },
    /// Print a job record as JSON
    Status {
        /// Job id returned by `ingest`
        job_id: String,
    },
    /// Remove expired job records from the database
    Purge,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("Failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let config = load_with_env(cli.config.as_deref())?;
    let store = open_store(&config)?;

    match cli.command {
        Commands::Ingest {
            files,
            collection,
            batch,
        } => ingest(&config, store, &files, collection.as_deref(), batch),
        Commands::Status { job_id } => match store.get(&job_id)? {
            Some(record) => {
                println!("{}", serde_json::to_string_pretty(&record)?);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("Job not found");
                Ok(ExitCode::FAILURE)
            }
        },
        Commands::Purge => {
            let purged = store.purge_expired()?;
            println!("Purged {} expired job(s)", purged);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_store(config: &Config) -> docingest::Result<JobStore> {
    let path = config.database.resolved_path();
    let db = Database::open(&path)?;
    info!("Using job database {:?}", path);
    Ok(JobStore::sqlite(
        db,
        Duration::from_secs(config.jobs.ttl_seconds),
    ))
}

fn ingest(
    config: &Config,
    store: JobStore,
    files: &[PathBuf],
    collection: Option<&str>,
    batch: bool,
) -> Result<ExitCode, Box<dyn Error>> {
    let uploads = files
        .iter()
        .map(|path| read_upload(path))
        .collect::<Result<Vec<_>, _>>()?;

    let broadcaster = JobProgressBroadcaster::new(256);
    spawn_progress_logger(&broadcaster);

    let vectors = Arc::new(JsonlVectorStore::new(config.vector_store.directory.clone()));
    let pipeline = Pipeline::new(store.clone(), vectors, PipelineConfig::from_config(config))?
        .with_broadcaster(broadcaster);
    let pool = Arc::new(WorkerPool::new(pipeline, PoolConfig::from_config(config))?);

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })?;
    }

    let submitter = Submitter::new(
        store.clone(),
        Arc::clone(&pool) as Arc<dyn Dispatcher>,
        config.uploads.clone(),
    );

    let mut job_ids = Vec::new();
    if batch {
        job_ids.push(submitter.submit_batch(uploads, collection)?);
    } else {
        for upload in uploads {
            let name = upload.file_name.clone();
            match submitter.submit_file(upload, collection) {
                Ok(job_id) => job_ids.push(job_id),
                Err(e) => warn!("Skipping {}: {}", name, e),
            }
        }
    }
    drop(submitter);

    for job_id in &job_ids {
        println!("queued {}", job_id);
    }

    let mut failures = 0usize;
    let mut finished = 0usize;
    while finished < job_ids.len() {
        if interrupted.load(Ordering::SeqCst) {
            warn!("Interrupted, cancelling running jobs");
            pool.shutdown();
            let cancelled = pool.cancel_all();
            info!("Cancelled {} running job(s)", cancelled);
            break;
        }
        if let Some(report) = pool.recv_result_timeout(RESULT_POLL) {
            finished += 1;
            if !print_report(&report) {
                failures += 1;
            }
        }
    }

    pool.shutdown();
    let pool = match Arc::try_unwrap(pool) {
        Ok(pool) => pool,
        Err(_) => return Err("worker pool is still shared".into()),
    };
    for report in pool.wait() {
        finished += 1;
        if !print_report(&report) {
            failures += 1;
        }
    }

    let unfinished = job_ids.len().saturating_sub(finished);
    if unfinished > 0 {
        warn!("{} job(s) left queued", unfinished);
    }

    if failures > 0 || unfinished > 0 || (!batch && job_ids.len() < files.len()) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn read_upload(path: &Path) -> Result<Upload, Box<dyn Error>> {
    Upload::from_path(path).map_err(|e| format!("Failed to read {:?}: {}", path, e).into())
}

/// Returns whether the job succeeded.
fn print_report(report: &TaskReport) -> bool {
    let status = report
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "abandoned".to_string());
    match &report.error {
        Some(error) => println!(
            "{} {} ({:.1}s): {}",
            report.task.job_id,
            status,
            report.elapsed.as_secs_f64(),
            error
        ),
        None => println!(
            "{} {} ({:.1}s)",
            report.task.job_id,
            status,
            report.elapsed.as_secs_f64()
        ),
    }
    report.succeeded()
}

fn spawn_progress_logger(broadcaster: &JobProgressBroadcaster) {
    let mut events = broadcaster.subscribe();
    let spawned = std::thread::Builder::new()
        .name("docingest-progress".to_string())
        .spawn(move || {
            loop {
                match events.blocking_recv() {
                    Ok(event) => info!(
                        "[{}] {} {}% {}",
                        event.job_id, event.file_name, event.percentage, event.message
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Progress output skipped {} event(s)", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Progress output disabled: {}", e);
    }
}
