use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProviderError;

/// One field of a work item type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub reference_name: String,
    pub name: String,
    #[serde(default)]
    pub always_required: bool,
    #[serde(default)]
    pub allowed_values: Vec<String>,
    /// Value the server fills in when a new item leaves the field unset.
    #[serde(default)]
    pub default_value: Option<Value>,
}

impl FieldDefinition {
    pub fn new(reference_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            reference_name: reference_name.into(),
            name: name.into(),
            always_required: false,
            allowed_values: Vec::new(),
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.always_required = true;
        self
    }

    pub fn allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    fn has_default(&self) -> bool {
        match &self.default_value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    fn accepts(&self, value: &str) -> bool {
        if self.always_required && value.trim().is_empty() {
            return false;
        }
        self.allowed_values.is_empty()
            || value.is_empty()
            || self.allowed_values.iter().any(|v| v == value)
    }
}

/// Field definitions of the configured work item type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<FieldDefinition>,
}

impl FieldSchema {
    pub fn new(fields: Vec<FieldDefinition>) -> Self {
        Self { fields }
    }

    /// Looks a field up by reference name or display name, ignoring case.
    pub fn lookup(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| {
            f.reference_name.eq_ignore_ascii_case(name) || f.name.eq_ignore_ascii_case(name)
        })
    }

    /// Validates pending `changes` before a save. A new item must carry every
    /// required field the server does not default; any item must keep set
    /// values within allowed values.
    pub fn validate(
        &self,
        changes: &BTreeMap<String, String>,
        is_new: bool,
    ) -> Result<(), ProviderError> {
        let invalid: Vec<String> = self
            .fields
            .iter()
            .filter(|field| match changes.get(&field.reference_name) {
                Some(value) => !field.accepts(value),
                None => is_new && field.always_required && !field.has_default(),
            })
            .map(|field| field.reference_name.clone())
            .collect();

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::Validation { fields: invalid })
        }
    }
}
