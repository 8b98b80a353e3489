//! Progress reporting for migration runs
//!
//! Provides a live spinner using indicatif plus the start header and final
//! summary printed with console styling.

use crate::config::MigrationConfig;
use crate::pipeline::{MigrationProgress, MigrationResult, RunStatus};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter that displays run status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &MigrationProgress) {
        let counters = &progress.counters;

        let msg = format!(
            "Read: {} | Processed: {} | Migrated: {} | Skipped: {} | Failed: {} | Uploaded: {} | Rate: {:.1}/s | Queue: {}",
            format_number(counters.extracted_docs),
            format_number(counters.processed),
            format_number(counters.migrated),
            format_number(counters.skipped),
            format_number(counters.failed),
            format_size(progress.bytes_uploaded, BINARY),
            progress.documents_per_second(),
            progress.queued_documents,
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the run
pub fn print_summary(result: &MigrationResult) {
    let counters = &result.counters;
    let duration_secs = result.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        counters.processed as f64 / duration_secs
    } else {
        0.0
    };

    let title = match (result.status, result.completed) {
        (_, false) => style("Migration Interrupted").yellow().bold(),
        (RunStatus::Success, true) => style("Migration Complete").green().bold(),
        (RunStatus::Error, true) => style("Migration Completed With Errors").red().bold(),
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Status:").bold(), result.status);
    println!("  {} {}", style("Extracted:").bold(), format_number(counters.extracted_docs));
    println!("  {} {}", style("Processed:").bold(), format_number(counters.processed));
    println!(
        "  {} {} ({} new, {} replaced)",
        style("Migrated:").bold(),
        format_number(counters.migrated),
        format_number(counters.new),
        format_number(counters.replaced)
    );
    println!("  {} {}", style("Skipped:").bold(), format_number(counters.skipped));
    println!("  {} {}", style("Uploaded:").bold(), format_size(result.bytes_uploaded, BINARY));
    println!(
        "  {} {:.1}s ({:.1} documents/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if result.associations.total() > 0 {
        let a = &result.associations;
        println!(
            "  {} {} created, {} skipped, {} excluded, {} failed",
            style("Associations:").bold(),
            a.created,
            a.skipped,
            a.excluded,
            a.failed
        );
    }
    if result.warnings > 0 {
        println!(
            "  {} {}",
            style("Warnings:").yellow().bold(),
            format_number(result.warnings)
        );
    }
    if counters.failed > 0 {
        println!(
            "  {} {}",
            style("Failed:").red().bold(),
            format_number(counters.failed)
        );
        for failed in result.failed_documents.iter().take(10) {
            println!(
                "    {} {}: {}",
                style("-").dim(),
                failed.file_name.as_deref().unwrap_or(failed.source_id.as_str()),
                failed.message
            );
        }
        if result.failed_documents.len() > 10 {
            println!(
                "    {} and {} more",
                style("-").dim(),
                result.failed_documents.len() - 10
            );
        }
    }
    println!();
}

/// Print a header at the start of the run
pub fn print_header(config: &MigrationConfig) {
    let target_root = if config.target_root.is_empty() {
        "/"
    } else {
        config.target_root.as_str()
    };

    println!();
    println!(
        "{} {}",
        style("doc-migrator").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), config.source_dir.display());
    println!("  {} {}", style("Target:").bold(), config.target_dir.display());
    println!("  {} {}", style("Profile:").bold(), config.profile);
    println!("  {} {}", style("Target root:").bold(), target_root);
    println!(
        "  {} {} threads, {} documents per chunk",
        style("Workers:").bold(),
        config.thread_count,
        config.chunk_size
    );
    println!();
}
