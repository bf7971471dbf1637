use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One synchronizable unit of external work, e.g. a mail conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub topic: String,
    pub description: String,
    /// Number of sub-events (replies) seen so far. Never decreases.
    pub activity_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_date: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn new(id: impl Into<String>, topic: impl Into<String>, activity_count: u32) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            description: String::new(),
            activity_count,
            created_by: None,
            created_date: None,
            last_updated_date: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
