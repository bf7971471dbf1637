use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::MailService;
use crate::model::mail::{Mail, MailThread};

const PAGE_SIZE: &str = "50";
const MESSAGE_FIELDS: &str = "id,subject,from,toRecipients,body,receivedDateTime,conversationId";

/// Exchange Online mailbox through Microsoft Graph.
pub struct GraphMailService {
    base_url: String,
    auth_header: String,
    client: reqwest::Client,
}

impl GraphMailService {
    pub fn new(base_url: String, access_token: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Bearer {access_token}"),
            client: reqwest::Client::new(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .header("Prefer", "outlook.body-content-type=\"text\"")
            .send()
            .await
            .context("Graph API request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Graph API returned {status}: {body}");
        }
        resp.json().await.context("Failed to parse Graph response")
    }

    /// Finds a child folder of the Inbox by display name.
    async fn folder_id(&self, folder: &str) -> Result<String> {
        let filter = format!("displayName eq '{}'", folder.replace('\'', "''"));
        let url = format!(
            "{}/me/mailFolders/inbox/childFolders?$filter={}",
            self.base_url,
            urlencoding::encode(&filter)
        );
        let page: Page<GraphFolder> = self.get(&url).await?;
        page.value
            .into_iter()
            .next()
            .map(|f| f.id)
            .with_context(|| format!("Inbox has no folder named '{folder}'"))
    }
}

#[derive(Deserialize)]
struct Page<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct GraphFolder {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    subject: Option<String>,
    conversation_id: String,
    received_date_time: DateTime<Utc>,
    from: Option<Recipient>,
    #[serde(default)]
    to_recipients: Vec<Recipient>,
    body: Option<ItemBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Deserialize)]
struct EmailAddress {
    address: Option<String>,
}

#[derive(Deserialize)]
struct ItemBody {
    content: Option<String>,
}

impl Recipient {
    fn address(&self) -> String {
        self.email_address.address.clone().unwrap_or_default()
    }
}

/// Groups messages into threads by conversation, in first-seen order. The
/// thread topic is the subject of its first message.
fn group_into_threads(messages: Vec<GraphMessage>) -> Vec<MailThread> {
    let mut threads: Vec<MailThread> = Vec::new();
    for message in messages {
        let subject = message.subject.unwrap_or_default();
        let mail = Mail {
            id: message.id,
            subject: subject.clone(),
            from: message.from.as_ref().map(Recipient::address).unwrap_or_default(),
            recipients: message
                .to_recipients
                .iter()
                .map(Recipient::address)
                .collect::<Vec<_>>()
                .join("; "),
            body: message.body.and_then(|b| b.content).unwrap_or_default(),
            received: message.received_date_time,
        };
        match threads
            .iter_mut()
            .find(|t| t.id == message.conversation_id)
        {
            Some(thread) => thread.mails.push(mail),
            None => threads.push(MailThread {
                id: message.conversation_id,
                topic: subject,
                mails: vec![mail],
            }),
        }
    }
    threads
}

#[async_trait]
impl MailService for GraphMailService {
    fn name(&self) -> &str {
        "Microsoft Graph"
    }

    async fn email_threads(&self, folder: &str) -> Result<Vec<MailThread>> {
        let folder_id = self.folder_id(folder).await?;
        let mut next = Some(format!(
            "{}/me/mailFolders/{}/messages?$select={MESSAGE_FIELDS}&$orderby=receivedDateTime%20asc&$top={PAGE_SIZE}",
            self.base_url,
            urlencoding::encode(&folder_id)
        ));

        let mut messages = Vec::new();
        while let Some(url) = next {
            let page: Page<GraphMessage> = self.get(&url).await?;
            debug!(count = page.value.len(), "fetched mail page");
            messages.extend(page.value);
            next = page.next_link;
        }

        Ok(group_into_threads(messages))
    }
}
