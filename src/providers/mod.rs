pub mod azure_devops;
pub mod schema;
pub mod simulator;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{TrackerConfig, TrackerKind};
use crate::error::ProviderError;
use crate::model::parent::ParentWorkItem;
use crate::model::work_item::WorkItem;

/// A remote work-tracking backend holding one parent record whose links point
/// at the work items created for each issue.
#[async_trait]
pub trait WorkItemProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Authenticates and loads the configured parent work item. Any previous
    /// session is dropped first.
    async fn connect(&mut self, config: &TrackerConfig) -> Result<(), ProviderError>;

    /// Drops the session. Lookups fail with `NotConfigured` until the next
    /// successful `connect`.
    fn close(&mut self);

    /// Resolves the work item linked to `issue_id`, or a new unsaved one.
    async fn find_or_create_for_issue(
        &self,
        issue_id: &str,
        activity_count: u32,
    ) -> Result<WorkItem, ProviderError>;

    /// Validates and saves the item, then writes its signature onto the
    /// parent link. Returns the backend id of the saved item.
    async fn persist(&mut self, work_item: &WorkItem) -> Result<u64, ProviderError>;
}


pub fn create_provider(config: &TrackerConfig) -> Box<dyn WorkItemProvider> {
    match config.kind {
        TrackerKind::AzureDevops => Box::new(azure_devops::AzureDevOpsProvider::new()),
        TrackerKind::Simulator => Box::new(simulator::TrackerSimulator::seeded(config)),
    }
}

/// The parent link already carrying an issue, and whether it is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExistingLink {
    pub related_id: u64,
    pub relation_index: usize,
    pub has_change: bool,
}

pub(crate) fn existing_link(
    parent: &ParentWorkItem,
    issue_id: &str,
    activity_count: u32,
) -> Option<ExistingLink> {
    let found = parent.find_issue_link(issue_id)?;
    debug!(
        issue_id,
        work_item = found.link.related_id,
        stored_activity = ?found.stored_activity,
        activity_count,
        "found existing work item"
    );
    Some(ExistingLink {
        related_id: found.link.related_id,
        relation_index: found.link.relation_index,
        has_change: found.stored_activity != Some(activity_count),
    })
}

pub(crate) fn require_issue_id(issue_id: &str) -> Result<(), ProviderError> {
    if issue_id.trim().is_empty() {
        return Err(ProviderError::Argument("issue id must not be empty"));
    }
    Ok(())
}
