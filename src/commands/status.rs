// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ragpipe status`

use anyhow::Result;
use ragpipe::config::ProviderKind;
use ragpipe::embedding::StoreStats;
use ragpipe::output::{colorize_dim, colorize_source};
use serde::Serialize;
use std::path::PathBuf;

use super::Session;

#[derive(Serialize)]
struct StatusOutput {
    store: StoreStats,
    provider: ProviderKind,
    source_dir: PathBuf,
}

pub fn run(session: &Session) -> Result<()> {
    let stats = session.open_store()?.stats()?;
    let status = StatusOutput {
        store: stats,
        provider: session.config.embeddings.provider(),
        source_dir: session.config.sources.dir(),
    };

    if session.is_json() {
        return session.print_json(&status);
    }

    let c = session.use_color;
    let none = || colorize_dim("-", c);
    println!("store:      {}", colorize_source(&status.store.path.display().to_string(), c));
    println!("records:    {}", status.store.records);
    println!("sources:    {}", status.store.sources);
    println!(
        "model:      {}",
        status.store.model_id.clone().unwrap_or_else(none)
    );
    println!(
        "dimension:  {}",
        status
            .store
            .dimension
            .map(|d| d.to_string())
            .unwrap_or_else(none)
    );
    println!("provider:   {:?}", status.provider);
    println!("source dir: {}", status.source_dir.display());
    Ok(())
}
