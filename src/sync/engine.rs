use tracing::{debug, info, instrument};

use super::field_map::FieldMap;
use crate::config::TrackerConfig;
use crate::error::ProviderError;
use crate::model::issue::Issue;
use crate::providers::WorkItemProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The stored signature already matches the issue; nothing was written.
    Skipped,
    Created,
    Updated,
}

/// Brings the work item of one issue up to date.
pub struct ReconciliationEngine {
    provider: Box<dyn WorkItemProvider>,
    field_map: FieldMap,
    dry_run: bool,
}

impl ReconciliationEngine {
    pub fn new(provider: Box<dyn WorkItemProvider>, field_map: FieldMap) -> Self {
        Self {
            provider,
            field_map,
            dry_run: false,
        }
    }

    /// In dry-run mode changes are resolved and logged but never persisted.
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn connect(&mut self, config: &TrackerConfig) -> Result<(), ProviderError> {
        self.provider.connect(config).await
    }

    #[instrument(skip_all, fields(issue_id = %issue.id, activity = issue.activity_count))]
    pub async fn sync(&mut self, issue: &Issue) -> Result<SyncOutcome, ProviderError> {
        let mut work_item = self
            .provider
            .find_or_create_for_issue(&issue.id, issue.activity_count)
            .await?;

        if !work_item.has_change {
            debug!(work_item = ?work_item.id(), "work item is up to date");
            return Ok(SyncOutcome::Skipped);
        }

        for (field, value) in self.field_map.resolve(issue, work_item.is_new) {
            work_item.set_field(&field, &value)?;
        }

        let outcome = if work_item.is_new {
            SyncOutcome::Created
        } else {
            SyncOutcome::Updated
        };

        if self.dry_run {
            info!(
                ?outcome,
                work_item = ?work_item.id(),
                signature = %work_item.issue_signature,
                fields = ?work_item.changes(),
                "what-if: would write work item"
            );
            return Ok(outcome);
        }

        let id = self.provider.persist(&work_item).await?;
        info!(?outcome, work_item = id, signature = %work_item.issue_signature, "work item written");
        Ok(outcome)
    }
}
