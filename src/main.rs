//! doc-migrator - Document migration between content repositories
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use doc_migrator::config::{CliArgs, MigrationConfig};
use doc_migrator::pipeline::{MigrationCoordinator, MigrationResult, RunStatus};
use doc_migrator::progress::{print_header, print_summary, ProgressReporter};
use doc_migrator::repository::{FsRepository, Repository};
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(RunStatus::Success) => ExitCode::SUCCESS,
        Ok(RunStatus::Error) => ExitCode::from(2),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<RunStatus> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = MigrationConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(&config);
    }

    let source: Arc<dyn Repository> = Arc::new(FsRepository::open("source", &config.source_dir));
    let target: Arc<dyn Repository> = Arc::new(FsRepository::open("target", &config.target_dir));

    let show_progress = config.show_progress;
    let failed_out = config.failed_out.clone();

    let coordinator = MigrationCoordinator::new(config, source, target)
        .context("Failed to initialize migration")?;

    // Setup signal handler for graceful shutdown
    let shutdown_flag = coordinator.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing in-flight chunks...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let progress = show_progress.then(ProgressReporter::new);
    if let Some(ref p) = progress {
        p.set_status("Reading source repository...");
    }

    let result = coordinator
        .run_with_progress(|update| {
            if let Some(ref p) = progress {
                p.update(update);
            }
        })
        .context("Migration failed")?;

    if let Some(ref p) = progress {
        if result.completed {
            p.finish("Migration finished");
        } else {
            p.finish("Migration interrupted");
        }
    }

    print_summary(&result);

    if let Some(path) = failed_out {
        write_failed_list(&path, &result)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if !result.completed {
        info!("Migration was interrupted before completion");
    }

    Ok(result.status)
}

/// Write the source ids of failed documents, one per line
fn write_failed_list(path: &Path, result: &MigrationResult) -> Result<()> {
    let mut contents = String::new();
    for failed in &result.failed_documents {
        contents.push_str(&failed.source_id);
        contents.push('\n');
    }
    fs::write(path, contents)?;

    if result.failed_documents.is_empty() {
        info!(path = %path.display(), "No failed documents");
    } else {
        warn!(
            path = %path.display(),
            count = result.failed_documents.len(),
            "Failed document ids written"
        );
    }
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("doc_migrator=debug,warn")
    } else {
        EnvFilter::new("doc_migrator=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
