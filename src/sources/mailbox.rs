use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::MailService;
use crate::model::mail::{Mail, MailThread};

type Folders = BTreeMap<String, Vec<MailThread>>;

/// Mailbox held in memory, keyed by folder name. Clones share contents.
///
/// Loaded from a JSON file shaped `{ "<folder>": [ <MailThread>, ... ] }`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMailbox {
    folders: Arc<Mutex<Folders>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mail fixture {}", path.display()))?;
        let folders: Folders = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse mail fixture {}", path.display()))?;
        Ok(Self {
            folders: Arc::new(Mutex::new(folders)),
        })
    }

    fn folders(&self) -> MutexGuard<'_, Folders> {
        self.folders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a conversation with one mail, creating the folder if needed.
    pub fn add_conversation(&self, folder: &str, id: &str, topic: &str, sender: &str, body: &str) {
        let mail = Mail {
            id: format!("{id}-1"),
            subject: topic.into(),
            from: sender.into(),
            recipients: String::new(),
            body: body.into(),
            received: Utc::now(),
        };
        self.folders()
            .entry(folder.to_string())
            .or_default()
            .push(MailThread {
                id: id.into(),
                topic: topic.into(),
                mails: vec![mail],
            });
    }

    /// Appends a reply; returns false when the conversation does not exist.
    pub fn add_mail_to_conversation(&self, folder: &str, id: &str, body: &str) -> bool {
        let mut folders = self.folders();
        let Some(thread) = folders
            .get_mut(folder)
            .and_then(|threads| threads.iter_mut().find(|t| t.id == id))
        else {
            return false;
        };
        let mail = Mail {
            id: format!("{id}-{}", thread.mails.len() + 1),
            subject: format!("RE: {}", thread.topic),
            from: String::new(),
            recipients: String::new(),
            body: body.into(),
            received: Utc::now(),
        };
        thread.mails.push(mail);
        true
    }

    pub fn remove_conversation(&self, folder: &str, id: &str) {
        if let Some(threads) = self.folders().get_mut(folder) {
            threads.retain(|t| t.id != id);
        }
    }
}

#[async_trait]
impl MailService for InMemoryMailbox {
    fn name(&self) -> &str {
        "Mailbox"
    }

    async fn email_threads(&self, folder: &str) -> Result<Vec<MailThread>> {
        self.folders()
            .get(folder)
            .cloned()
            .with_context(|| format!("Mail folder '{folder}' does not exist"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_fixture_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"Support": [{{"id": "c1", "topic": "VPN down", "mails": [
                {{"id": "m1", "subject": "VPN down", "from": "eve@contoso.com", "body": "since 9am", "received": "2024-03-01T09:00:00Z"}}
            ]}}]}}"#
        )
        .unwrap();

        let mailbox = InMemoryMailbox::from_file(file.path()).unwrap();
        let threads = mailbox.folders().get("Support").cloned().unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].mails[0].from, "eve@contoso.com");
    }

    #[test]
    fn reply_to_unknown_conversation_is_rejected() {
        let mailbox = InMemoryMailbox::new();
        mailbox.add_conversation("Support", "c1", "Topic", "a@b.c", "body");
        assert!(mailbox.add_mail_to_conversation("Support", "c1", "reply"));
        assert!(!mailbox.add_mail_to_conversation("Support", "c2", "reply"));
        assert!(!mailbox.add_mail_to_conversation("Other", "c1", "reply"));
    }

    #[tokio::test]
    async fn clones_share_contents() {
        let mailbox = InMemoryMailbox::new();
        let view = mailbox.clone();
        mailbox.add_conversation("Support", "c1", "Topic", "a@b.c", "body");
        mailbox.add_mail_to_conversation("Support", "c1", "again");
        mailbox.remove_conversation("Support", "missing");

        let threads = view.email_threads("Support").await.unwrap();
        assert_eq!(threads[0].mails.len(), 2);
        assert_eq!(threads[0].mails[1].subject, "RE: Topic");
    }
}
