// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ragpipe ingest`

use anyhow::{bail, Context, Result};
use colored::Colorize;
use ragpipe::output::{failure_mark, success_mark};
use ragpipe::{CancelFlag, DirectorySource, IngestReport};
use std::path::PathBuf;

use super::{build_pipeline, Session};

pub fn run(
    session: &Session,
    source: Option<PathBuf>,
    force: bool,
    prune: bool,
    workers: Option<usize>,
) -> Result<()> {
    let config = &session.config;
    let root = source.unwrap_or_else(|| config.sources.dir());
    let directory = DirectorySource::new(&root).with_extensions(config.sources.extensions());

    let mut options = config.ingest_options()?;
    options.force = force;
    options.prune_missing |= prune;
    options.show_progress = !session.is_json();
    if let Some(workers) = workers {
        anyhow::ensure!(workers > 0, "--workers must be greater than 0");
        options.workers = workers;
    }

    let pipeline = build_pipeline(session, config, options)?;
    let report = pipeline
        .ingest_source(&directory, &CancelFlag::new())
        .with_context(|| format!("Failed to ingest {}", root.display()))?;

    if session.is_json() {
        session.print_json(&report)?;
    } else {
        print_report(&report, session.use_color);
    }

    if !report.failures.is_empty() {
        bail!(
            "{} of {} source(s) failed to ingest",
            report.failures.len(),
            report.documents
        );
    }
    Ok(())
}

fn print_report(report: &IngestReport, use_color: bool) {
    let count = |n: usize| {
        if use_color {
            n.to_string().cyan().to_string()
        } else {
            n.to_string()
        }
    };

    println!(
        "{} Ingested {} sources ({} refreshed, {} unchanged, {} skipped)",
        success_mark(use_color),
        count(report.documents),
        count(report.refreshed),
        report.unchanged,
        report.skipped
    );
    println!(
        "  chunks: {} written, {} deleted; {} embedded, {} reused",
        report.chunks_written, report.chunks_deleted, report.embedded, report.reused
    );
    if !report.pruned_sources.is_empty() {
        println!("  pruned: {}", report.pruned_sources.join(", "));
    }
    for failure in &report.failures {
        eprintln!(
            "{} {}: {}",
            failure_mark(use_color),
            failure.source_id,
            failure.error
        );
    }
}
