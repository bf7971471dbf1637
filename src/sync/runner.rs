//! Periodic synchronization passes.
//!
//! A pass connects the provider, pulls every issue from the source and runs
//! the engine on each one in source order. A failing issue is logged and the
//! pass moves on; a failure of the session itself ends the pass. The loop
//! never stops on a failed pass: the next pass after the sleep is the retry.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use super::engine::{ReconciliationEngine, SyncOutcome};
use crate::config::TrackerConfig;
use crate::sources::IssueSource;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PassSummary {
    fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Skipped => self.skipped += 1,
        }
    }
}

pub struct SyncLoop {
    source: Box<dyn IssueSource>,
    engine: ReconciliationEngine,
    tracker: TrackerConfig,
    interval: Duration,
}

impl SyncLoop {
    pub fn new(
        source: Box<dyn IssueSource>,
        engine: ReconciliationEngine,
        tracker: TrackerConfig,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            engine,
            tracker,
            interval,
        }
    }

    pub async fn run_pass(&mut self) -> Result<PassSummary> {
        self.engine
            .connect(&self.tracker)
            .await
            .with_context(|| format!("Failed to connect to {}", self.engine.provider_name()))?;

        let issues = self
            .source
            .list_issues()
            .await
            .with_context(|| format!("Failed to list issues from {}", self.source.name()))?;

        let mut seen = HashSet::new();
        let mut summary = PassSummary::default();
        for issue in &issues {
            if !seen.insert(issue.id.as_str()) {
                warn!(issue_id = %issue.id, "duplicate issue id in this pass, skipping");
                continue;
            }
            match self.engine.sync(issue).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) if e.aborts_pass() => {
                    return Err(e).with_context(|| format!("Pass aborted at issue {}", issue.id));
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(issue_id = %issue.id, error = %e, "failed to synchronize issue");
                }
            }
        }

        info!(
            issues = issues.len(),
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "sync pass complete"
        );
        Ok(summary)
    }

    pub async fn run_forever(&mut self) {
        loop {
            if let Err(e) = self.run_pass().await {
                error!(error = format!("{e:#}"), "sync pass failed");
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
