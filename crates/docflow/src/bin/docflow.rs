use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use docflow::orchestrator::{validate_upload, Orchestrator};
use docflow::sanitize::redact_path;
use docflow::tasks::{fail_interrupted, ParseExecutor, UploadExecutor};
use docflow::{
    load_config, status, Config, Database, Dispatcher, DocumentStatus, ExtractorRegistry,
    LocalBlobStore, TokenCounter, WorkerQueue,
};

#[derive(Parser)]
#[command(name = "docflow", version, about = "Upload and parse documents into chunks")]
struct Cli {
    /// Path to a JSON config file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload and parse files, walking directories recursively.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show a job or a document.
    Status {
        #[command(subcommand)]
        target: StatusTarget,
    },
    /// List the chunks of a parsed document.
    Chunks { document_uuid: String },
}

#[derive(Subcommand)]
enum StatusTarget {
    Job { uuid: String },
    Document { uuid: String },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    let db = Database::open_with_timeout(
        &config.database.resolved_path(),
        config.database.busy_timeout(),
    )?;

    match cli.command {
        Command::Ingest { paths } => ingest(&config, db, &paths)?,
        Command::Status { target } => {
            let conn = db.connect()?;
            match target {
                StatusTarget::Job { uuid } => print_json(&status::job(&conn, &uuid)?)?,
                StatusTarget::Document { uuid } => {
                    print_json(&status::document(&conn, &uuid)?)?
                }
            }
        }
        Command::Chunks { document_uuid } => {
            let conn = db.connect()?;
            print_json(&status::chunks(&conn, &document_uuid)?)?;
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // RUST_LOG wins when set
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docflow=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ingest(
    config: &Config,
    db: Database,
    paths: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let recovered = fail_interrupted(&db.connect()?)?;
    if recovered > 0 {
        warn!("Marked {} interrupted jobs as failed", recovered);
    }

    let blob = Arc::new(LocalBlobStore::new(&config.storage.root));
    let registry = Arc::new(ExtractorRegistry::with_defaults());
    let tokens = Arc::new(TokenCounter::from_name(&config.extraction.tokenizer));

    let mut dispatcher = Dispatcher::new(config.queue.retry_policy());
    dispatcher.register(Arc::new(
        UploadExecutor::new(db.clone(), blob.clone())
            .with_temp_dir(config.storage.temp_dir.clone()),
    ));
    dispatcher.register(Arc::new(
        ParseExecutor::new(db.clone(), blob, registry, tokens)
            .with_temp_dir(config.storage.temp_dir.clone()),
    ));

    let queue = Arc::new(WorkerQueue::start(
        Arc::new(dispatcher),
        config.queue.worker_count,
        config.queue.capacity,
    )?);

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            info!("Interrupt received, stopping after the current tasks");
            interrupted.store(true, Ordering::SeqCst);
        })?;
    }

    let orchestrator = Orchestrator::new(queue.clone(), config.storage.bucket.clone());
    let conn = db.connect()?;

    let mut documents = Vec::new();
    for path in collect_files(paths) {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        let name = redact_path(&path);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %name, error = %e, "Skipping unreadable file");
                continue;
            }
        };
        if let Err(e) = validate_upload(&config.upload, &name, &bytes) {
            warn!(file = %name, error = %e, "Skipping file");
            continue;
        }
        match orchestrator.request_upload(&conn, &bytes, &name) {
            Ok(receipt) => documents.push(receipt.document.uuid),
            Err(e) => error!(file = %name, error = %e, "Upload request failed"),
        }
    }

    if wait_for_queue(&queue, &interrupted) {
        let mut parse_jobs = Vec::new();
        for document_uuid in &documents {
            let uploaded = status::document(&conn, document_uuid)
                .map(|d| d.status == DocumentStatus::Uploaded)
                .unwrap_or(false);
            if !uploaded {
                warn!(document_uuid = %document_uuid, "Upload did not complete, not parsing");
                continue;
            }
            match orchestrator.request_parse(&conn, document_uuid) {
                Ok(receipt) => parse_jobs.push(receipt.job.uuid),
                Err(e) => {
                    error!(document_uuid = %document_uuid, error = %e, "Parse request failed")
                }
            }
        }

        if wait_for_queue(&queue, &interrupted) {
            for job_uuid in &parse_jobs {
                print_json(&status::job(&conn, job_uuid)?)?;
            }
        }
    }

    drop(orchestrator);
    match Arc::try_unwrap(queue) {
        Ok(queue) => queue.wait(),
        Err(queue) => queue.shutdown(),
    }
    Ok(())
}

/// Regular files under `paths`, directories walked recursively, in a
/// stable order.
fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => warn!(path = %redact_path(path), error = %e, "Skipping entry"),
            }
        }
    }
    files
}

fn wait_for_queue(queue: &WorkerQueue, interrupted: &AtomicBool) -> bool {
    while !queue.wait_idle(Duration::from_millis(200)) {
        if interrupted.load(Ordering::SeqCst) {
            return false;
        }
    }
    !interrupted.load(Ordering::SeqCst)
}
