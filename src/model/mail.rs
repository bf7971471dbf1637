use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mail {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub recipients: String,
    #[serde(default)]
    pub body: String,
    pub received: DateTime<Utc>,
}

/// A mail conversation; mails are kept in the order they were received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailThread {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub mails: Vec<Mail>,
}
