pub mod graph;
pub mod mailbox;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::model::issue::Issue;
use crate::model::mail::MailThread;

/// Produces the full set of issues to synchronize. Each call starts over.
#[async_trait]
pub trait IssueSource: Send + Sync {
    fn name(&self) -> &str;
    async fn list_issues(&self) -> Result<Vec<Issue>>;
}

/// Read access to conversations in a mailbox folder.
#[async_trait]
pub trait MailService: Send + Sync {
    fn name(&self) -> &str;
    async fn email_threads(&self, folder: &str) -> Result<Vec<MailThread>>;
}

/// Turns each conversation of one mail folder into an issue.
pub struct MailFolderSource<S> {
    service: S,
    folder: String,
}

impl<S: MailService> MailFolderSource<S> {
    pub fn new(service: S, folder: impl Into<String>) -> Self {
        Self {
            service,
            folder: folder.into(),
        }
    }
}

/// Maps a thread to an issue; the first mail describes it and every mail
/// counts as one activity. Empty threads yield nothing.
pub fn issue_from_thread(thread: MailThread) -> Option<Issue> {
    let first = thread.mails.first()?;
    let last = thread.mails.last()?;
    Some(Issue {
        description: first.body.clone(),
        activity_count: u32::try_from(thread.mails.len()).unwrap_or(u32::MAX),
        created_by: Some(first.from.clone()).filter(|f| !f.is_empty()),
        created_date: Some(first.received),
        last_updated_date: Some(last.received),
        id: thread.id,
        topic: thread.topic,
    })
}

#[async_trait]
impl<S: MailService> IssueSource for MailFolderSource<S> {
    fn name(&self) -> &str {
        self.service.name()
    }

    async fn list_issues(&self) -> Result<Vec<Issue>> {
        let threads = self
            .service
            .email_threads(&self.folder)
            .await
            .with_context(|| format!("Failed to read mail folder '{}'", self.folder))?;

        let issues = threads
            .into_iter()
            .filter_map(|thread| {
                let thread_id = thread.id.clone();
                let issue = issue_from_thread(thread);
                match &issue {
                    Some(issue) => debug!(id = %issue.id, topic = %issue.topic, activity = issue.activity_count, "mail thread"),
                    None => warn!(id = %thread_id, "skipping mail thread without messages"),
                }
                issue
            })
            .collect();
        Ok(issues)
    }
}

pub fn create_source(config: &SourceConfig) -> Result<Box<dyn IssueSource>> {
    let source: Box<dyn IssueSource> = match config {
        SourceConfig::Graph {
            folder,
            access_token,
            base_url,
        } => Box::new(MailFolderSource::new(
            graph::GraphMailService::new(base_url.clone(), access_token.clone()),
            folder.clone(),
        )),
        SourceConfig::Fixture { folder, path } => Box::new(MailFolderSource::new(
            mailbox::InMemoryMailbox::from_file(path)?,
            folder.clone(),
        )),
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::model::mail::Mail;

    fn mail(from: &str, body: &str, minute: u32) -> Mail {
        Mail {
            id: format!("m{minute}"),
            subject: "Printer on fire".into(),
            from: from.into(),
            recipients: "support@contoso.com".into(),
            body: body.into(),
            received: Utc.with_ymd_and_hms(2024, 3, 1, 9, minute, 0).unwrap(),
        }
    }

    #[test]
    fn thread_maps_to_issue() {
        let thread = MailThread {
            id: "conv-1".into(),
            topic: "Printer on fire".into(),
            mails: vec![mail("alice@contoso.com", "It is burning", 0), mail("bob@contoso.com", "Still burning", 5)],
        };
        let issue = issue_from_thread(thread).unwrap();
        assert_eq!(issue.id, "conv-1");
        assert_eq!(issue.topic, "Printer on fire");
        assert_eq!(issue.description, "It is burning");
        assert_eq!(issue.activity_count, 2);
        assert_eq!(issue.created_by.as_deref(), Some("alice@contoso.com"));
        assert_eq!(issue.created_date.unwrap().format("%H:%M").to_string(), "09:00");
        assert_eq!(issue.last_updated_date.unwrap().format("%H:%M").to_string(), "09:05");
    }

    #[test]
    fn empty_thread_yields_no_issue() {
        let thread = MailThread {
            id: "conv-2".into(),
            topic: "Empty".into(),
            mails: vec![],
        };
        assert!(issue_from_thread(thread).is_none());
    }

    #[tokio::test]
    async fn folder_source_lists_issues_in_thread_order() {
        let mailbox = mailbox::InMemoryMailbox::new();
        mailbox.add_conversation("Support", "b", "Second", "carol@contoso.com", "hi");
        mailbox.add_conversation("Support", "a", "First", "dave@contoso.com", "hello");
        mailbox.add_mail_to_conversation("Support", "a", "reply");

        let source = MailFolderSource::new(mailbox, "Support");
        let issues = source.list_issues().await.unwrap();
        let summary: Vec<(&str, u32)> = issues
            .iter()
            .map(|i| (i.id.as_str(), i.activity_count))
            .collect();
        assert_eq!(summary, vec![("b", 1), ("a", 2)]);
    }

    #[tokio::test]
    async fn missing_folder_is_an_error() {
        let source = MailFolderSource::new(mailbox::InMemoryMailbox::new(), "Nope");
        let err = source.list_issues().await.unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }
}
