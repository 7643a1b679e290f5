// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// ragpipe - Local retrieval pipeline
///
/// Chunks text documents, stores their embeddings in SQLite and retrieves the
/// passages most similar to a question.
#[derive(Parser, Debug)]
#[command(name = "ragpipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Compact JSON output (no pretty formatting)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Configuration file (defaults to .ragpiperc.toml, then ~/.config/ragpipe/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Vector store database path
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk, embed and store every document of the source directory
    #[command(alias = "i")]
    Ingest {
        /// Source directory (defaults to scraped_pages)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Re-embed and rewrite every source, even unchanged ones
        #[arg(long)]
        force: bool,

        /// Delete stored sources that no longer exist in the source directory
        #[arg(long)]
        prune: bool,

        /// Number of embedding workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Retrieve the chunks most similar to a question
    #[command(alias = "q")]
    Query {
        /// Question text
        text: String,

        /// Maximum number of matches
        #[arg(short = 'k', long)]
        top_k: Option<i64>,

        /// Similarity floor in [-1, 1]
        #[arg(long, allow_negative_numbers = true)]
        min_similarity: Option<f32>,

        /// Print the packed grounding context instead of the match list
        #[arg(long)]
        context: bool,
    },

    /// Print the chunks of a file as JSON lines, without embedding
    Chunk {
        /// File to chunk
        file: PathBuf,

        /// Directory the chunk ids are relative to (defaults to the configured sources dir)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Characters per chunk
        #[arg(long, allow_negative_numbers = true)]
        chunk_size: Option<i64>,

        /// Characters shared by consecutive chunks
        #[arg(long, allow_negative_numbers = true)]
        overlap: Option<i64>,
    },

    /// Show store statistics
    Status,

    /// Delete every stored chunk
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Watch the source directory and re-ingest on changes
    #[command(alias = "w")]
    Watch {
        /// Source directory (defaults to scraped_pages)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Debounce interval in seconds
        #[arg(short, long, default_value = "2")]
        debounce: u64,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
