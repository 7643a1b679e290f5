// SPDX-License-Identifier: MIT OR Apache-2.0

//! Directory watcher that re-ingests sources with debouncing

use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{IngestReport, Pipeline};
use crate::cancel::CancelFlag;
use crate::errors::{RagError, Result};
use crate::source::{DirectorySource, DocumentSource};

/// Default debounce interval in seconds
pub const DEFAULT_DEBOUNCE_SECS: u64 = 2;

/// Minimum time between ingestion runs
const MIN_REINGEST_INTERVAL_SECS: u64 = 5;

/// How often the loop wakes up to check the cancel flag when idle
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Progress notifications emitted by [`SourceWatcher::watch`].
#[derive(Debug)]
pub enum WatchEvent {
    Started { root: PathBuf },
    Changed { paths: usize },
    Ingested { report: IngestReport, elapsed: Duration },
    Failed { error: RagError },
}

/// Debounce bookkeeping, separated from the event loop.
#[derive(Debug)]
struct Debounce {
    debounce: Duration,
    min_interval: Duration,
    last_event: Option<Instant>,
    last_run: Option<Instant>,
}

impl Debounce {
    fn record_event(&mut self, now: Instant) {
        self.last_event = Some(now);
    }

    /// Quiet for `debounce` since the last event, and `min_interval` since the last run.
    fn ready(&self, now: Instant) -> bool {
        let quiet = self
            .last_event
            .is_some_and(|t| now.duration_since(t) >= self.debounce);
        let rested = self
            .last_run
            .map_or(true, |t| now.duration_since(t) >= self.min_interval);
        quiet && rested
    }

    fn record_run(&mut self, now: Instant) {
        self.last_event = None;
        self.last_run = Some(now);
    }
}

/// Source watcher with debouncing
pub struct SourceWatcher {
    source: DirectorySource,
    debounce: Duration,
    min_interval: Duration,
}

impl SourceWatcher {
    pub fn new(source: DirectorySource) -> Self {
        Self::with_debounce(source, DEFAULT_DEBOUNCE_SECS)
    }

    /// Create watcher with custom debounce interval
    pub fn with_debounce(source: DirectorySource, debounce_secs: u64) -> Self {
        Self {
            source,
            debounce: Duration::from_secs(debounce_secs),
            min_interval: Duration::from_secs(MIN_REINGEST_INTERVAL_SECS.max(debounce_secs)),
        }
    }

    /// Watches the source root until `cancel` is raised, re-ingesting after changes.
    pub fn watch<F>(&self, pipeline: &Pipeline, cancel: &CancelFlag, mut on_event: F) -> Result<()>
    where
        F: FnMut(WatchEvent),
    {
        let root = self.source.root().to_path_buf();
        let watch_error =
            |e: notify::Error| RagError::io(&root, std::io::Error::other(e.to_string()));

        let (tx, rx) = channel();
        let config = NotifyConfig::default().with_poll_interval(Duration::from_secs(2));
        let mut watcher = RecommendedWatcher::new(tx, config).map_err(watch_error)?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(watch_error)?;

        on_event(WatchEvent::Started { root: root.clone() });

        let mut pending: HashSet<PathBuf> = HashSet::new();
        let mut state = Debounce {
            debounce: self.debounce,
            min_interval: self.min_interval,
            last_event: None,
            last_run: None,
        };

        while !cancel.is_cancelled() {
            let timeout = if pending.is_empty() {
                IDLE_POLL
            } else {
                self.debounce.min(IDLE_POLL)
            };

            match rx.recv_timeout(timeout) {
                Ok(Ok(event)) => {
                    let relevant = relevant_paths(&event, self.source.extensions());
                    if !relevant.is_empty() {
                        pending.extend(relevant);
                        state.record_event(Instant::now());
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "watch error"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if !pending.is_empty() && state.ready(Instant::now()) {
                on_event(WatchEvent::Changed {
                    paths: pending.len(),
                });
                // Cleared first so events during the run are picked up next time.
                pending.clear();

                let start = Instant::now();
                let result = self
                    .source
                    .list_documents()
                    .and_then(|docs| pipeline.ingest(&docs, cancel));
                match result {
                    Ok(report) => on_event(WatchEvent::Ingested {
                        report,
                        elapsed: start.elapsed(),
                    }),
                    Err(error) => on_event(WatchEvent::Failed { error }),
                }
                state.record_run(Instant::now());
            }
        }

        debug!(root = %root.display(), "watch stopped");
        Ok(())
    }
}

/// Changed paths with a watched extension.
fn relevant_paths(event: &Event, extensions: &[String]) -> Vec<PathBuf> {
    use notify::EventKind::*;
    if !matches!(event.kind, Create(_) | Modify(_) | Remove(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.contains(&ext.to_lowercase()))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, EventKind};

    fn state(debounce_ms: u64, interval_ms: u64) -> Debounce {
        Debounce {
            debounce: Duration::from_millis(debounce_ms),
            min_interval: Duration::from_millis(interval_ms),
            last_event: None,
            last_run: None,
        }
    }

    #[test]
    fn waits_for_quiet_period() {
        let t0 = Instant::now();
        let mut s = state(100, 0);
        assert!(!s.ready(t0));

        s.record_event(t0);
        assert!(!s.ready(t0 + Duration::from_millis(50)));
        assert!(s.ready(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn enforces_minimum_interval_between_runs() {
        let t0 = Instant::now();
        let mut s = state(10, 1_000);
        s.record_event(t0);
        s.record_run(t0 + Duration::from_millis(10));

        s.record_event(t0 + Duration::from_millis(20));
        assert!(!s.ready(t0 + Duration::from_millis(500)));
        assert!(s.ready(t0 + Duration::from_millis(1_010)));
    }

    #[test]
    fn filters_events_by_kind_and_extension() {
        let exts = vec!["txt".to_string()];
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("pages/a.TXT"))
            .add_path(PathBuf::from("artifacts/rag.sqlite3"));
        assert_eq!(relevant_paths(&create, &exts), vec![PathBuf::from("pages/a.TXT")]);

        let access =
            Event::new(EventKind::Access(AccessKind::Any)).add_path(PathBuf::from("a.txt"));
        assert!(relevant_paths(&access, &exts).is_empty());
    }
}
