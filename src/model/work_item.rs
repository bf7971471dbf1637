use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::FieldError;
use crate::providers::schema::FieldSchema;
use crate::sync::signature::IssueSignature;

/// Identifies which provider produced a work item handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub backend: &'static str,
    pub parent_id: u64,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (parent {})", self.backend, self.parent_id)
    }
}

/// Backend record behind a [`WorkItem`]. Only the provider that built it reads
/// it back; the engine writes to it through [`WorkItem::set_field`].
#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) origin: Origin,
    /// Backend id; `None` until a new item is persisted.
    pub(crate) id: Option<u64>,
    pub(crate) revision: Option<u64>,
    /// Index of the parent relation that links to this item, for updates.
    pub(crate) relation_index: Option<usize>,
    pub(crate) schema: Arc<FieldSchema>,
    /// Pending values keyed by field reference name.
    pub(crate) changes: BTreeMap<String, String>,
    /// Name each pending value was set under.
    set_as: BTreeMap<String, String>,
}

impl Record {
    pub(crate) fn new(origin: Origin, schema: Arc<FieldSchema>) -> Self {
        Self {
            origin,
            id: None,
            revision: None,
            relation_index: None,
            schema,
            changes: BTreeMap::new(),
            set_as: BTreeMap::new(),
        }
    }

    pub(crate) fn existing(
        origin: Origin,
        schema: Arc<FieldSchema>,
        id: u64,
        revision: Option<u64>,
        relation_index: usize,
    ) -> Self {
        Self {
            id: Some(id),
            revision,
            relation_index: Some(relation_index),
            ..Self::new(origin, schema)
        }
    }
}

/// Handle to a work item resolved for one issue, not yet persisted.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub is_new: bool,
    pub has_change: bool,
    pub issue_signature: IssueSignature,
    pub(crate) record: Record,
}

impl WorkItem {
    pub fn id(&self) -> Option<u64> {
        self.record.id
    }

    pub fn origin(&self) -> &Origin {
        &self.record.origin
    }

    /// Sets a field by reference name or display name. Two different names
    /// for the same field cannot both be set on one item.
    pub fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldError> {
        let record = &mut self.record;
        let definition = record
            .schema
            .lookup(name)
            .ok_or_else(|| FieldError::Unknown(name.to_string()))?;
        let reference_name = definition.reference_name.clone();

        if let Some(first) = record.set_as.get(&reference_name) {
            if first != name {
                warn!(%reference_name, %first, second = %name, "field set under two names");
                return Err(FieldError::Conflict {
                    reference_name,
                    first: first.clone(),
                    second: name.to_string(),
                });
            }
        }
        record.set_as.insert(reference_name.clone(), name.to_string());
        record.changes.insert(reference_name, value.to_string());
        Ok(())
    }

    /// Values set since the item was resolved, keyed by reference name.
    pub fn changes(&self) -> &BTreeMap<String, String> {
        &self.record.changes
    }
}
