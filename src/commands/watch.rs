// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ragpipe watch`

use anyhow::{Context, Result};
use colored::Colorize;
use ragpipe::output::{failure_mark, success_mark};
use ragpipe::pipeline::{SourceWatcher, WatchEvent};
use ragpipe::{CancelFlag, DirectorySource};
use std::path::PathBuf;

use super::{build_pipeline, Session};

pub fn run(session: &Session, source: Option<PathBuf>, debounce: u64) -> Result<()> {
    let config = &session.config;
    let root = source.unwrap_or_else(|| config.sources.dir());
    let directory = || DirectorySource::new(&root).with_extensions(config.sources.extensions());

    let pipeline = build_pipeline(session, config, config.ingest_options()?)?;
    let cancel = CancelFlag::new();

    // Initial ingest
    let report = pipeline
        .ingest_source(&directory(), &cancel)
        .with_context(|| format!("Failed to ingest {}", root.display()))?;
    println!(
        "{} Ingested {} sources ({} refreshed, {} unchanged)",
        success_mark(session.use_color),
        report.documents,
        report.refreshed,
        report.unchanged
    );

    let use_color = session.use_color;
    let watcher = SourceWatcher::with_debounce(directory(), debounce);
    watcher.watch(&pipeline, &cancel, |event| match event {
        WatchEvent::Started { root } => {
            let eye = if use_color { "👁".cyan().to_string() } else { "👁".to_string() };
            println!("{} Watching {} for changes...", eye, root.display());
            println!("Press Ctrl+C to stop\n");
        }
        WatchEvent::Changed { paths } => {
            println!("{} file(s) changed, re-ingesting...", paths);
        }
        WatchEvent::Ingested { report, elapsed } => {
            println!(
                "{} Re-ingest complete in {:.1}s ({} refreshed, {} unchanged, {} failed)",
                success_mark(use_color),
                elapsed.as_secs_f64(),
                report.refreshed,
                report.unchanged,
                report.failures.len()
            );
        }
        WatchEvent::Failed { error } => {
            eprintln!("{} Re-ingest failed: {}", failure_mark(use_color), error);
        }
    })?;
    Ok(())
}
