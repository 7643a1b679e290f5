// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ragpipe query`

use anyhow::{Context, Result};
use ragpipe::context::pack_context;
use ragpipe::output::format_match;
use ragpipe::Match;
use serde::Serialize;

use super::{build_pipeline, Session};

#[derive(Serialize)]
struct QueryOutput<'a> {
    query: &'a str,
    matches: &'a [Match],
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

pub fn run(
    session: &Session,
    text: &str,
    top_k: Option<i64>,
    min_similarity: Option<f32>,
    context: bool,
) -> Result<()> {
    let mut config = session.config.clone();
    if top_k.is_some() {
        config.retrieval.top_k = top_k;
    }
    if min_similarity.is_some() {
        config.retrieval.min_similarity = min_similarity;
    }

    let pipeline = build_pipeline(session, &config, config.ingest_options()?)?;
    let matches = pipeline.query(text).context("Query failed")?;
    let packed = context.then(|| pack_context(&matches, config.retrieval.max_context_chars()));

    if session.is_json() {
        return session.print_json(&QueryOutput {
            query: text,
            matches: &matches,
            context: packed,
        });
    }

    if matches.is_empty() {
        println!("No matches above the similarity floor.");
        return Ok(());
    }
    match packed {
        Some(packed) => println!("{}", packed),
        None => {
            for (idx, m) in matches.iter().enumerate() {
                println!("{}", format_match(idx + 1, m, session.use_color));
            }
        }
    }
    Ok(())
}
