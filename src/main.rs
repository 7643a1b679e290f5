// SPDX-License-Identifier: MIT OR Apache-2.0

//! ragpipe - Local retrieval pipeline
//!
//! Ingests a directory of text documents into a SQLite vector store and
//! retrieves grounding passages for questions.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use ragpipe::config::Config;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, warn};
use tracing_subscriber::filter::{filter_fn, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Target for events meant only for the error log file.
const ERROR_LOG_TARGET: &str = "ragpipe::errorlog";

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    config.apply_env().context("Invalid environment override")?;
    if let Some(store) = &cli.store {
        config.store.path = Some(store.clone());
    }

    init_logging(&config);

    let session = commands::Session::new(config, cli.format, cli.compact);

    let result = dispatch(&session, cli.command);
    if let Err(err) = &result {
        error!(target: ERROR_LOG_TARGET, error = %format!("{:#}", err), "command failed");
    }
    result
}

fn dispatch(session: &commands::Session, command: Commands) -> Result<()> {
    match command {
        Commands::Ingest {
            source,
            force,
            prune,
            workers,
        } => commands::ingest::run(session, source, force, prune, workers)?,
        Commands::Query {
            text,
            top_k,
            min_similarity,
            context,
        } => commands::query::run(session, &text, top_k, min_similarity, context)?,
        Commands::Chunk {
            file,
            root,
            chunk_size,
            overlap,
        } => commands::chunk::run(session, &file, root, chunk_size, overlap)?,
        Commands::Status => commands::status::run(session)?,
        Commands::Reset { yes } => commands::reset::run(session, yes)?,
        Commands::Watch { source, debounce } => commands::watch::run(session, source, debounce)?,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "ragpipe", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Stderr logging filtered by RAGPIPE_LOG (e.g., RAGPIPE_LOG=debug ragpipe ingest),
/// plus ERROR-level events appended to the configured error log.
fn init_logging(config: &Config) {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_env("RAGPIPE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        // anyhow already prints the command error
        .with_filter(filter_fn(|meta| meta.target() != ERROR_LOG_TARGET));

    let mut open_failure = None;
    let file_layer = config.logging.error_log().and_then(|path| {
        match open_error_log(&path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::ERROR),
            ),
            Err(err) => {
                open_failure = Some((path, err));
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some((path, err)) = open_failure {
        warn!(path = %path.display(), error = %err, "error log disabled");
    }
}

fn open_error_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
