use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ProviderError;
use crate::sync::field_map::FieldMap;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 15 * 60;
const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    pub source: SourceConfig,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Exchange Online mailbox through Microsoft Graph.
    Graph {
        folder: String,
        access_token: String,
        #[serde(default = "default_graph_url")]
        base_url: String,
    },
    /// Mail threads read from a JSON file.
    Fixture { folder: String, path: PathBuf },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    #[default]
    AzureDevops,
    Simulator,
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub kind: TrackerKind,
    pub service_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Tried when the primary credential is rejected.
    pub alternate: Option<Credential>,
    pub parent_work_item: Option<u64>,
    #[serde(default = "default_work_item_type")]
    pub work_item_type: String,
    #[serde(default)]
    pub field_map: FieldMap,
}

impl TrackerConfig {
    pub fn new(kind: TrackerKind, parent_work_item: u64, credential: Credential) -> Self {
        Self {
            kind,
            service_url: None,
            username: Some(credential.username),
            password: Some(credential.password),
            alternate: None,
            parent_work_item: Some(parent_work_item),
            work_item_type: default_work_item_type(),
            field_map: FieldMap::new(),
        }
    }

    /// Credentials in the order they should be attempted.
    pub fn credentials(&self) -> Result<Vec<Credential>, ProviderError> {
        let password = self
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProviderError::InvalidConfiguration("tracker.password is required".into()))?;
        let primary = Credential::new(self.username.clone().unwrap_or_default(), password);

        let mut credentials = vec![primary];
        if let Some(alternate) = &self.alternate {
            if alternate.password.is_empty() {
                return Err(ProviderError::InvalidConfiguration(
                    "tracker.alternate.password must not be empty".into(),
                ));
            }
            credentials.push(alternate.clone());
        }
        Ok(credentials)
    }

    pub fn parent_id(&self) -> Result<u64, ProviderError> {
        self.parent_work_item.ok_or_else(|| {
            ProviderError::InvalidConfiguration("tracker.parent_work_item is required".into())
        })
    }

    pub fn service_url(&self) -> Result<&str, ProviderError> {
        self.service_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ProviderError::InvalidConfiguration("tracker.service_url is required".into()))
    }

    /// Checks everything a provider of this kind needs before connecting.
    pub fn validate(&self) -> Result<(), ProviderError> {
        self.credentials()?;
        self.parent_id()?;
        if self.kind == TrackerKind::AzureDevops {
            self.service_url()?;
            if self.work_item_type.trim().is_empty() {
                return Err(ProviderError::InvalidConfiguration(
                    "tracker.work_item_type must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_graph_url() -> String {
    DEFAULT_GRAPH_URL.to_string()
}

fn default_work_item_type() -> String {
    "Task".to_string()
}

pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".worksync")
        .join("config.toml")
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    if !path.exists() {
        bail!("No configuration found at {}", path.display());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}
