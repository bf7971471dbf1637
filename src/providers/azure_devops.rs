use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::schema::{FieldDefinition, FieldSchema};
use super::{existing_link, require_issue_id, WorkItemProvider};
use crate::config::{Credential, TrackerConfig};
use crate::error::ProviderError;
use crate::model::parent::{ParentLink, ParentWorkItem};
use crate::model::work_item::{Origin, Record, WorkItem};
use crate::sync::signature::IssueSignature;

pub const BACKEND: &str = "Azure DevOps";

const API_VERSION: &str = "7.0";
const PARENT_TO_CHILD: &str = "System.LinkTypes.Hierarchy-Forward";
const CHILD_TO_PARENT: &str = "System.LinkTypes.Hierarchy-Reverse";
const TEAM_PROJECT_FIELD: &str = "System.TeamProject";

#[derive(Debug, Deserialize)]
struct WorkItemResponse {
    id: u64,
    rev: u64,
    url: String,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
    #[serde(default)]
    relations: Vec<Relation>,
}

#[derive(Debug, Deserialize)]
struct Relation {
    rel: String,
    url: String,
    #[serde(default)]
    attributes: RelationAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct RelationAttributes {
    comment: Option<String>,
}

#[derive(Deserialize)]
struct FieldList {
    value: Vec<FieldDefinition>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// One JSON patch operation.
#[derive(Debug, Serialize, PartialEq)]
struct PatchOp {
    op: &'static str,
    path: String,
    value: Value,
}

impl PatchOp {
    fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "add",
            path: path.into(),
            value,
        }
    }

    fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "replace",
            path: path.into(),
            value,
        }
    }

    fn test_revision(rev: u64) -> Self {
        Self {
            op: "test",
            path: "/rev".into(),
            value: json!(rev),
        }
    }
}

fn field_ops(changes: &BTreeMap<String, String>) -> Vec<PatchOp> {
    changes
        .iter()
        .map(|(field, value)| PatchOp::add(format!("/fields/{field}"), json!(value)))
        .collect()
}

/// Ops creating a child: its fields plus the reverse hierarchy link to the
/// parent, which carries the issue signature.
fn create_ops(changes: &BTreeMap<String, String>, parent_url: &str, signature: &str) -> Vec<PatchOp> {
    let mut ops = field_ops(changes);
    ops.push(PatchOp::add(
        "/relations/-",
        json!({
            "rel": CHILD_TO_PARENT,
            "url": parent_url,
            "attributes": { "comment": signature },
        }),
    ));
    ops
}

/// Ops updating an existing child, or `None` when no field changed.
fn child_update_ops(revision: Option<u64>, changes: &BTreeMap<String, String>) -> Option<Vec<PatchOp>> {
    if changes.is_empty() {
        return None;
    }
    let mut ops: Vec<PatchOp> = revision.map(PatchOp::test_revision).into_iter().collect();
    ops.extend(field_ops(changes));
    Some(ops)
}

/// Ops rewriting the signature on the parent's link, guarded by its revision.
fn link_comment_ops(parent_revision: u64, relation_index: usize, signature: &str) -> Vec<PatchOp> {
    vec![
        PatchOp::test_revision(parent_revision),
        PatchOp::replace(
            format!("/relations/{relation_index}/attributes/comment"),
            json!(signature),
        ),
    ]
}

fn related_id(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

/// Hierarchy links of a parent record that carry a comment. Relation indexes
/// refer to the full relation list so a link can be addressed in a patch.
fn parent_from_response(response: &WorkItemResponse) -> ParentWorkItem {
    let links = response
        .relations
        .iter()
        .enumerate()
        .filter(|(_, relation)| relation.rel == PARENT_TO_CHILD)
        .filter_map(|(relation_index, relation)| {
            Some(ParentLink {
                related_id: related_id(&relation.url)?,
                comment: relation.attributes.comment.clone()?,
                relation_index,
            })
        })
        .collect();
    ParentWorkItem {
        id: response.id,
        links,
    }
}

fn status_error(status: StatusCode, message: String, work_item_id: u64) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::NON_AUTHORITATIVE_INFORMATION => {
            ProviderError::Authentication(format!("server returned {status}"))
        }
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            ProviderError::NotFoundOrDenied(work_item_id)
        }
        _ => ProviderError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

/// An authenticated HTTP connection to one project collection.
struct Connection {
    base_url: String,
    auth_header: String,
    client: reqwest::Client,
}

impl Connection {
    fn new(base_url: &str, credential: &Credential) -> Self {
        let creds = format!("{}:{}", credential.username, credential.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
        Self {
            base_url: base_url.to_string(),
            auth_header: format!("Basic {encoded}"),
            client: reqwest::Client::new(),
        }
    }

    fn work_item_url(&self, id: u64) -> String {
        format!("{}/_apis/wit/workitems/{id}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        work_item_id: u64,
    ) -> Result<T, ProviderError> {
        let resp = request
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .query(&[("api-version", API_VERSION)])
            .send()
            .await?;

        let status = resp.status();
        // A rejected PAT is answered with 203 and a sign-in page.
        if status.is_success() && status != StatusCode::NON_AUTHORITATIVE_INFORMATION {
            return Ok(resp.json().await?);
        }
        let message = resp
            .json::<ErrorBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_default();
        Err(status_error(status, message, work_item_id))
    }

    async fn get_work_item(
        &self,
        id: u64,
        with_relations: bool,
    ) -> Result<WorkItemResponse, ProviderError> {
        let mut request = self.client.get(self.work_item_url(id));
        if with_relations {
            request = request.query(&[("$expand", "relations")]);
        }
        self.send(request, id).await
    }

    async fn patch(
        &self,
        method: Method,
        url: &str,
        ops: &[PatchOp],
        work_item_id: u64,
    ) -> Result<WorkItemResponse, ProviderError> {
        let request = self
            .client
            .request(method, url)
            .header("Content-Type", "application/json-patch+json")
            .json(ops);
        self.send(request, work_item_id).await
    }

    async fn field_schema(
        &self,
        project: &str,
        work_item_type: &str,
        parent_id: u64,
    ) -> Result<FieldSchema, ProviderError> {
        let url = format!(
            "{}/{}/_apis/wit/workitemtypes/{}/fields",
            self.base_url,
            urlencoding::encode(project),
            urlencoding::encode(work_item_type)
        );
        let request = self.client.get(url).query(&[("$expand", "allowedValues")]);
        let fields: FieldList = self.send(request, parent_id).await.map_err(|e| match e {
            ProviderError::NotFoundOrDenied(_) => ProviderError::InvalidConfiguration(format!(
                "work item type '{work_item_type}' does not exist in project '{project}'"
            )),
            other => other,
        })?;
        Ok(FieldSchema::new(fields.value))
    }
}

struct Session {
    connection: Connection,
    parent: ParentWorkItem,
    parent_revision: u64,
    parent_url: String,
    project: String,
    work_item_type: String,
    schema: Arc<FieldSchema>,
    /// Set when the parent could not be re-read after a write; the cached
    /// links and revision must be refreshed before the next write.
    parent_stale: bool,
}

impl Session {
    async fn open(
        connection: Connection,
        parent: WorkItemResponse,
        work_item_type: &str,
    ) -> Result<Self, ProviderError> {
        let project = parent
            .fields
            .get(TEAM_PROJECT_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::InvalidConfiguration(format!(
                    "parent work item {} has no team project",
                    parent.id
                ))
            })?
            .to_string();
        let schema = connection
            .field_schema(&project, work_item_type, parent.id)
            .await?;

        Ok(Self {
            parent: parent_from_response(&parent),
            parent_revision: parent.rev,
            parent_url: parent.url,
            project,
            work_item_type: work_item_type.to_string(),
            schema: Arc::new(schema),
            parent_stale: false,
            connection,
        })
    }

    fn origin(&self) -> Origin {
        Origin {
            backend: BACKEND,
            parent_id: self.parent.id,
        }
    }

    fn apply_parent(&mut self, parent: &WorkItemResponse) {
        self.parent = parent_from_response(parent);
        self.parent_revision = parent.rev;
        self.parent_stale = false;
    }

    async fn reload_parent(&mut self) -> Result<(), ProviderError> {
        let parent = self.connection.get_work_item(self.parent.id, true).await?;
        self.apply_parent(&parent);
        Ok(())
    }

    /// Refreshes the cached parent after a write went through. A failure only
    /// marks the cache stale; the write itself is not undone.
    fn after_write(&mut self, reloaded: Result<WorkItemResponse, ProviderError>) {
        match reloaded {
            Ok(parent) => self.apply_parent(&parent),
            Err(e) => {
                warn!(parent = self.parent.id, error = %e, "failed to reload parent work item");
                self.parent_stale = true;
            }
        }
    }

    /// Relation index of the link to `id`. The index stored on the handle is
    /// used while it still points at `id`.
    fn link_index(&self, id: u64, hint: Option<usize>) -> Option<usize> {
        let links = &self.parent.links;
        hint.filter(|&i| links.iter().any(|l| l.relation_index == i && l.related_id == id))
            .or_else(|| links.iter().find(|l| l.related_id == id).map(|l| l.relation_index))
    }

    async fn create(&self, work_item: &WorkItem) -> Result<u64, ProviderError> {
        let ops = create_ops(
            work_item.changes(),
            &self.parent_url,
            &work_item.issue_signature.encode(),
        );
        let url = format!(
            "{}/{}/_apis/wit/workitems/${}",
            self.connection.base_url,
            urlencoding::encode(&self.project),
            urlencoding::encode(&self.work_item_type)
        );
        let created = self
            .connection
            .patch(Method::POST, &url, &ops, self.parent.id)
            .await?;
        Ok(created.id)
    }

    async fn update(&self, work_item: &WorkItem) -> Result<u64, ProviderError> {
        let id = work_item
            .id()
            .ok_or(ProviderError::Argument("existing work item has no id"))?;
        let index = self
            .link_index(id, work_item.record.relation_index)
            .ok_or(ProviderError::Argument("existing work item has no parent link"))?;

        if let Some(ops) = child_update_ops(work_item.record.revision, work_item.changes()) {
            self.connection
                .patch(Method::PATCH, &self.connection.work_item_url(id), &ops, id)
                .await?;
        }

        let ops = link_comment_ops(
            self.parent_revision,
            index,
            &work_item.issue_signature.encode(),
        );
        self.connection
            .patch(
                Method::PATCH,
                &self.connection.work_item_url(self.parent.id),
                &ops,
                self.parent.id,
            )
            .await?;
        Ok(id)
    }
}

/// Azure DevOps Services / Team Foundation Server over the REST API.
#[derive(Default)]
pub struct AzureDevOpsProvider {
    session: Option<Session>,
}

impl AzureDevOpsProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkItemProvider for AzureDevOpsProvider {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn connect(&mut self, config: &TrackerConfig) -> Result<(), ProviderError> {
        self.close();
        config.validate()?;
        let base_url = config.service_url()?;
        let parent_id = config.parent_id()?;

        let mut rejection = String::from("no credentials configured");
        for (attempt, credential) in config.credentials()?.iter().enumerate() {
            let connection = Connection::new(base_url, credential);
            match connection.get_work_item(parent_id, true).await {
                Ok(parent) => {
                    if attempt > 0 {
                        info!("connected with alternate credential");
                    }
                    let session =
                        Session::open(connection, parent, &config.work_item_type).await?;
                    debug!(
                        parent = parent_id,
                        project = %session.project,
                        links = session.parent.links.len(),
                        "loaded parent work item"
                    );
                    self.session = Some(session);
                    return Ok(());
                }
                Err(ProviderError::Authentication(reason)) => {
                    warn!(attempt, username = %credential.username, %reason, "credential rejected");
                    rejection = reason;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ProviderError::Authentication(rejection))
    }

    fn close(&mut self) {
        self.session = None;
    }

    async fn find_or_create_for_issue(
        &self,
        issue_id: &str,
        activity_count: u32,
    ) -> Result<WorkItem, ProviderError> {
        require_issue_id(issue_id)?;
        let session = self.session.as_ref().ok_or(ProviderError::NotConfigured)?;
        let issue_signature = IssueSignature::new(issue_id, activity_count);

        let work_item = match existing_link(&session.parent, issue_id, activity_count) {
            Some(link) => {
                let related = session
                    .connection
                    .get_work_item(link.related_id, false)
                    .await?;
                WorkItem {
                    is_new: false,
                    has_change: link.has_change,
                    issue_signature,
                    record: Record::existing(
                        session.origin(),
                        session.schema.clone(),
                        related.id,
                        Some(related.rev),
                        link.relation_index,
                    ),
                }
            }
            None => WorkItem {
                is_new: true,
                has_change: true,
                issue_signature,
                record: Record::new(session.origin(), session.schema.clone()),
            },
        };
        Ok(work_item)
    }

    async fn persist(&mut self, work_item: &WorkItem) -> Result<u64, ProviderError> {
        let session = self.session.as_mut().ok_or(ProviderError::NotConfigured)?;
        let expected = session.origin();
        if work_item.origin() != &expected {
            return Err(ProviderError::TypeMismatch {
                expected: expected.to_string(),
                found: work_item.origin().to_string(),
            });
        }
        session
            .schema
            .validate(work_item.changes(), work_item.is_new)?;

        if session.parent_stale {
            session.reload_parent().await?;
        }
        let id = if work_item.is_new {
            session.create(work_item).await?
        } else {
            session.update(work_item).await?
        };
        let reloaded = session.connection.get_work_item(session.parent.id, true).await;
        session.after_write(reloaded);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerKind;

    const PARENT_JSON: &str = r#"{
        "id": 42,
        "rev": 7,
        "url": "https://dev.azure.com/contoso/_apis/wit/workItems/42",
        "fields": { "System.TeamProject": "Support", "System.Title": "Mail" },
        "relations": [
            { "rel": "System.LinkTypes.Related", "url": "https://dev.azure.com/contoso/_apis/wit/workItems/5", "attributes": { "comment": "x:1" } },
            { "rel": "System.LinkTypes.Hierarchy-Forward", "url": "https://dev.azure.com/contoso/_apis/wit/workItems/100", "attributes": { "comment": "issue1:3" } },
            { "rel": "System.LinkTypes.Hierarchy-Forward", "url": "https://dev.azure.com/contoso/_apis/wit/workItems/101", "attributes": { "isLocked": false } },
            { "rel": "System.LinkTypes.Hierarchy-Forward", "url": "https://dev.azure.com/contoso/_apis/wit/workItems/102", "attributes": { "comment": "garbageNoColon" } }
        ]
    }"#;

    #[test]
    fn parent_links_keep_relation_indexes() {
        let response: WorkItemResponse = serde_json::from_str(PARENT_JSON).unwrap();
        let parent = parent_from_response(&response);

        assert_eq!(parent.id, 42);
        assert_eq!(
            parent.links,
            vec![
                ParentLink {
                    related_id: 100,
                    comment: "issue1:3".into(),
                    relation_index: 1,
                },
                ParentLink {
                    related_id: 102,
                    comment: "garbageNoColon".into(),
                    relation_index: 3,
                },
            ]
        );
        let link = existing_link(&parent, "issue1", 3).unwrap();
        assert!(!link.has_change);
        assert!(existing_link(&parent, "garbageNoColon", 0).is_none());
    }

    #[test]
    fn parses_related_id_from_url() {
        assert_eq!(related_id("https://x/_apis/wit/workItems/123"), Some(123));
        assert_eq!(related_id("https://x/_apis/wit/workItems/123/"), Some(123));
        assert_eq!(related_id("https://x/_apis/wit/workItems/abc"), None);
    }

    #[test]
    fn field_changes_become_add_ops() {
        let changes: BTreeMap<String, String> = [
            ("System.Title".to_string(), "T".to_string()),
            ("Custom.ActivityCount".to_string(), "1".to_string()),
        ]
        .into_iter()
        .collect();
        let ops = field_ops(&changes);
        assert_eq!(
            serde_json::to_value(&ops).unwrap(),
            json!([
                { "op": "add", "path": "/fields/Custom.ActivityCount", "value": "1" },
                { "op": "add", "path": "/fields/System.Title", "value": "T" },
            ])
        );
    }

    fn signature_changes() -> BTreeMap<String, String> {
        [("System.Title".to_string(), "VPN down".to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn create_links_child_back_to_parent_with_signature() {
        let ops = create_ops(
            &signature_changes(),
            "https://dev.azure.com/contoso/_apis/wit/workItems/42",
            "issue1:2",
        );
        assert_eq!(
            serde_json::to_value(&ops).unwrap(),
            json!([
                { "op": "add", "path": "/fields/System.Title", "value": "VPN down" },
                {
                    "op": "add",
                    "path": "/relations/-",
                    "value": {
                        "rel": "System.LinkTypes.Hierarchy-Reverse",
                        "url": "https://dev.azure.com/contoso/_apis/wit/workItems/42",
                        "attributes": { "comment": "issue1:2" },
                    },
                },
            ])
        );
    }

    #[test]
    fn child_update_is_guarded_by_its_revision() {
        let ops = child_update_ops(Some(3), &signature_changes()).unwrap();
        assert_eq!(
            serde_json::to_value(&ops).unwrap(),
            json!([
                { "op": "test", "path": "/rev", "value": 3 },
                { "op": "add", "path": "/fields/System.Title", "value": "VPN down" },
            ])
        );
    }

    #[test]
    fn child_update_is_skipped_without_field_changes() {
        assert!(child_update_ops(Some(3), &BTreeMap::new()).is_none());
    }

    #[test]
    fn link_comment_rewrite_tests_parent_revision() {
        let ops = link_comment_ops(7, 3, "issue1:4");
        assert_eq!(
            serde_json::to_value(&ops).unwrap(),
            json!([
                { "op": "test", "path": "/rev", "value": 7 },
                { "op": "replace", "path": "/relations/3/attributes/comment", "value": "issue1:4" },
            ])
        );
    }

    fn session() -> Session {
        let response: WorkItemResponse = serde_json::from_str(PARENT_JSON).unwrap();
        Session {
            connection: Connection::new("https://dev.azure.com/contoso", &Credential::new("", "pat")),
            parent: parent_from_response(&response),
            parent_revision: response.rev,
            parent_url: response.url,
            project: "Support".into(),
            work_item_type: "Task".into(),
            schema: Arc::new(FieldSchema::default()),
            parent_stale: false,
        }
    }

    #[test]
    fn failed_reload_after_write_marks_parent_stale() {
        let mut session = session();
        session.after_write(Err(ProviderError::Remote {
            status: 500,
            message: "unavailable".into(),
        }));
        assert!(session.parent_stale);
        assert_eq!(session.parent_revision, 7);

        let mut reloaded: WorkItemResponse = serde_json::from_str(PARENT_JSON).unwrap();
        reloaded.rev = 8;
        reloaded.relations.push(Relation {
            rel: PARENT_TO_CHILD.into(),
            url: "https://dev.azure.com/contoso/_apis/wit/workItems/103".into(),
            attributes: RelationAttributes {
                comment: Some("issue2:1".into()),
            },
        });
        session.after_write(Ok(reloaded));
        assert!(!session.parent_stale);
        assert_eq!(session.parent_revision, 8);
        assert_eq!(session.link_index(103, None), Some(4));
    }

    #[test]
    fn link_index_follows_the_related_id() {
        let session = session();
        assert_eq!(session.link_index(100, Some(1)), Some(1));
        // stored index now points elsewhere
        assert_eq!(session.link_index(100, Some(3)), Some(1));
        assert_eq!(session.link_index(100, None), Some(1));
        assert_eq!(session.link_index(555, Some(1)), None);
    }

    #[test]
    fn maps_status_codes() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new(), 1),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NON_AUTHORITATIVE_INFORMATION, String::new(), 1),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, String::new(), 9),
            ProviderError::NotFoundOrDenied(9)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, String::new(), 9),
            ProviderError::NotFoundOrDenied(9)
        ));
        match status_error(StatusCode::BAD_REQUEST, "TF401320: rule error".into(), 1) {
            ProviderError::Remote { status, message } => {
                assert_eq!(status, 400);
                assert!(message.starts_with("TF401320"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn basic_auth_header_encodes_pat() {
        let connection = Connection::new("https://dev.azure.com/contoso", &Credential::new("", "pat"));
        assert_eq!(connection.auth_header, "Basic OnBhdA==");
        assert_eq!(
            connection.work_item_url(5),
            "https://dev.azure.com/contoso/_apis/wit/workitems/5"
        );
    }

    #[tokio::test]
    async fn lookup_before_connect_is_not_configured() {
        let provider = AzureDevOpsProvider::new();
        let err = provider.find_or_create_for_issue("issue1", 1).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured));
    }

    #[tokio::test]
    async fn empty_issue_id_is_an_argument_error() {
        let provider = AzureDevOpsProvider::new();
        let err = provider.find_or_create_for_issue("", 1).await.unwrap_err();
        assert!(matches!(err, ProviderError::Argument(_)));
    }

    #[tokio::test]
    async fn connect_rejects_missing_service_url() {
        let mut provider = AzureDevOpsProvider::new();
        let config = TrackerConfig::new(TrackerKind::AzureDevops, 42, Credential::new("", "pat"));
        let err = provider.connect(&config).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfiguration(_)));
    }
}
