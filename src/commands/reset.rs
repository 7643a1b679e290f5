// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ragpipe reset`

use anyhow::{bail, Result};
use ragpipe::output::success_mark;
use serde_json::json;

use super::Session;

pub fn run(session: &Session, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to clear the vector store without --yes");
    }

    let store = session.open_store()?;
    let removed = store.count()?;
    store.clear()?;

    if session.is_json() {
        return session.print_json(&json!({ "cleared": removed }));
    }
    println!(
        "{} Cleared {} chunks from {}",
        success_mark(session.use_color),
        removed,
        store.path().display()
    );
    Ok(())
}
