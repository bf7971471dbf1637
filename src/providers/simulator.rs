//! In-memory work-tracking backend.
//!
//! Clones share one store, so a test can keep a handle while the engine owns
//! the provider and inspect links, fields and the number of writes afterwards.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::schema::{FieldDefinition, FieldSchema};
use super::{existing_link, require_issue_id, WorkItemProvider};
use crate::config::{Credential, TrackerConfig};
use crate::error::ProviderError;
use crate::model::parent::{ParentLink, ParentWorkItem};
use crate::model::work_item::{Origin, Record, WorkItem};
use crate::sync::signature::IssueSignature;

pub const BACKEND: &str = "Simulator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedWorkItem {
    pub work_item_type: String,
    pub fields: BTreeMap<String, String>,
    /// Outgoing hierarchy links, in insertion order.
    pub links: Vec<ParentLink>,
}

#[derive(Debug)]
struct TrackerState {
    accepted: Vec<Credential>,
    schema: Arc<FieldSchema>,
    work_items: BTreeMap<u64, SimulatedWorkItem>,
    next_id: u64,
    writes: usize,
}

impl TrackerState {
    /// Stores `work_item` under the next free id.
    fn insert(&mut self, work_item: SimulatedWorkItem) -> u64 {
        while self.work_items.contains_key(&self.next_id) {
            self.next_id = self.next_id.wrapping_add(1);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.work_items.insert(id, work_item);
        id
    }
}

#[derive(Debug, Clone)]
struct Session {
    parent_id: u64,
    work_item_type: String,
}

#[derive(Debug, Clone)]
pub struct TrackerSimulator {
    state: Arc<Mutex<TrackerState>>,
    session: Option<Session>,
}

impl TrackerSimulator {
    pub fn new(schema: FieldSchema) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                accepted: Vec::new(),
                schema: Arc::new(schema),
                work_items: BTreeMap::new(),
                next_id: 1,
                writes: 0,
            })),
            session: None,
        }
    }

    /// Adds a credential the simulated server accepts.
    pub fn accept(self, credential: Credential) -> Self {
        self.state().accepted.push(credential);
        self
    }

    /// A simulator ready for `config`: it accepts the configured credentials,
    /// knows every mapped field and already holds the parent work item.
    pub fn seeded(config: &TrackerConfig) -> Self {
        let schema = FieldSchema::new(
            config
                .field_map
                .fields()
                .map(|field| FieldDefinition::new(field, field))
                .collect(),
        );
        let simulator = Self::new(schema);
        {
            let mut state = simulator.state();
            state.accepted = config.credentials().unwrap_or_default();
            if let Some(parent_id) = config.parent_work_item {
                state.work_items.insert(
                    parent_id,
                    SimulatedWorkItem {
                        work_item_type: "Feature".into(),
                        fields: BTreeMap::new(),
                        links: Vec::new(),
                    },
                );
            }
        }
        simulator
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a work item directly, bypassing validation and the write count.
    pub fn add_work_item(&self, work_item_type: &str, fields: &[(&str, &str)]) -> u64 {
        self.state().insert(SimulatedWorkItem {
            work_item_type: work_item_type.into(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            links: Vec::new(),
        })
    }

    /// Appends a link with an arbitrary comment to `parent_id`.
    pub fn add_link(&self, parent_id: u64, related_id: u64, comment: &str) {
        let mut state = self.state();
        if let Some(parent) = state.work_items.get_mut(&parent_id) {
            let relation_index = parent.links.len();
            parent.links.push(ParentLink {
                related_id,
                comment: comment.into(),
                relation_index,
            });
        }
    }

    /// Edits a field directly, the way a person working the item would.
    pub fn update_field(&self, id: u64, field: &str, value: &str) {
        if let Some(item) = self.state().work_items.get_mut(&id) {
            item.fields.insert(field.into(), value.into());
        }
    }

    pub fn links(&self, parent_id: u64) -> Vec<ParentLink> {
        self.state()
            .work_items
            .get(&parent_id)
            .map(|w| w.links.clone())
            .unwrap_or_default()
    }

    pub fn work_item(&self, id: u64) -> Option<SimulatedWorkItem> {
        self.state().work_items.get(&id).cloned()
    }

    pub fn work_item_count(&self) -> usize {
        self.state().work_items.len()
    }

    /// Number of saves performed through `persist`.
    pub fn writes(&self) -> usize {
        self.state().writes
    }

    fn session(&self) -> Result<&Session, ProviderError> {
        self.session.as_ref().ok_or(ProviderError::NotConfigured)
    }

    fn origin(session: &Session) -> Origin {
        Origin {
            backend: BACKEND,
            parent_id: session.parent_id,
        }
    }
}

#[async_trait]
impl WorkItemProvider for TrackerSimulator {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn connect(&mut self, config: &TrackerConfig) -> Result<(), ProviderError> {
        self.close();
        let credentials = config.credentials()?;
        let parent_id = config.parent_id()?;

        let state = self.state();
        let mut accepted = None;
        for (attempt, credential) in credentials.iter().enumerate() {
            if state.accepted.contains(credential) {
                accepted = Some(attempt);
                break;
            }
            warn!(attempt, username = %credential.username, "credential rejected");
        }
        let Some(attempt) = accepted else {
            return Err(ProviderError::Authentication(
                "no configured credential was accepted".into(),
            ));
        };
        if attempt > 0 {
            info!("connected with alternate credential");
        }

        if !state.work_items.contains_key(&parent_id) {
            return Err(ProviderError::NotFoundOrDenied(parent_id));
        }
        drop(state);

        self.session = Some(Session {
            parent_id,
            work_item_type: config.work_item_type.clone(),
        });
        Ok(())
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
        let session = self.session()?;
        let state = self.state();

        let parent = ParentWorkItem {
            id: session.parent_id,
            links: state
                .work_items
                .get(&session.parent_id)
                .map(|p| p.links.clone())
                .ok_or(ProviderError::NotFoundOrDenied(session.parent_id))?,
        };

        let origin = Self::origin(session);
        let issue_signature = IssueSignature::new(issue_id, activity_count);
        let work_item = match existing_link(&parent, issue_id, activity_count) {
            Some(link) => {
                if !state.work_items.contains_key(&link.related_id) {
                    return Err(ProviderError::NotFoundOrDenied(link.related_id));
                }
                WorkItem {
                    is_new: false,
                    has_change: link.has_change,
                    issue_signature,
                    record: Record::existing(
                        origin,
                        state.schema.clone(),
                        link.related_id,
                        None,
                        link.relation_index,
                    ),
                }
            }
            None => WorkItem {
                is_new: true,
                has_change: true,
                issue_signature,
                record: Record::new(origin, state.schema.clone()),
            },
        };
        Ok(work_item)
    }

    async fn persist(&mut self, work_item: &WorkItem) -> Result<u64, ProviderError> {
        let session = self.session()?.clone();
        let expected = Self::origin(&session);
        if work_item.origin() != &expected {
            return Err(ProviderError::TypeMismatch {
                expected: expected.to_string(),
                found: work_item.origin().to_string(),
            });
        }

        let mut state = self.state();
        state
            .schema
            .validate(work_item.changes(), work_item.is_new)?;

        let comment = work_item.issue_signature.encode();
        let id = if work_item.is_new {
            if !state.work_items.contains_key(&session.parent_id) {
                return Err(ProviderError::NotFoundOrDenied(session.parent_id));
            }
            let id = state.insert(SimulatedWorkItem {
                work_item_type: session.work_item_type.clone(),
                fields: work_item.changes().clone(),
                links: Vec::new(),
            });
            let parent = state
                .work_items
                .get_mut(&session.parent_id)
                .ok_or(ProviderError::NotFoundOrDenied(session.parent_id))?;
            let relation_index = parent.links.len();
            parent.links.push(ParentLink {
                related_id: id,
                comment,
                relation_index,
            });
            id
        } else {
            let id = work_item
                .id()
                .ok_or(ProviderError::Argument("existing work item has no id"))?;
            let index = work_item
                .record
                .relation_index
                .ok_or(ProviderError::Argument("existing work item has no parent link"))?;

            if !state.work_items.contains_key(&id) {
                return Err(ProviderError::NotFoundOrDenied(id));
            }
            let link = state
                .work_items
                .get_mut(&session.parent_id)
                .and_then(|p| p.links.get_mut(index))
                .filter(|l| l.related_id == id)
                .ok_or(ProviderError::NotFoundOrDenied(session.parent_id))?;
            link.comment = comment;
            if let Some(item) = state.work_items.get_mut(&id) {
                item.fields.extend(work_item.changes().clone());
            }
            id
        };

        state.writes += 1;
        if let Some(saved) = state.work_items.get(&id) {
            debug!(
                id,
                work_item_type = %saved.work_item_type,
                fields = ?saved.fields,
                "simulated save"
            );
        }
        Ok(id)
    }
}
