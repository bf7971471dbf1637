use std::collections::BTreeMap;

use serde::Deserialize;

use crate::model::issue::Issue;

const LINE_BREAK: &str = "<br/>";

/// Reserved template values replaced with issue attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Id,
    Topic,
    Description,
    Activity,
}

impl Placeholder {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "{{Id}}" => Some(Self::Id),
            "{{Topic}}" => Some(Self::Topic),
            "{{Description}}" => Some(Self::Description),
            "{{Activity}}" => Some(Self::Activity),
            _ => None,
        }
    }

    fn substitute(self, issue: &Issue) -> String {
        match self {
            Self::Id => issue.id.clone(),
            Self::Topic => issue.topic.clone(),
            Self::Description => inline_line_breaks(&issue.description),
            Self::Activity => issue.activity_count.to_string(),
        }
    }
}

fn inline_line_breaks(text: &str) -> String {
    text.replace("\r\n", LINE_BREAK)
        .replace(['\n', '\r'], LINE_BREAK)
}

/// Target field name to template value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<String, String>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Computes the values to write for `issue`.
    ///
    /// Placeholder entries always resolve to the current issue state. Literal
    /// entries seed a new work item and are left alone on updates.
    pub fn resolve(&self, issue: &Issue, is_new: bool) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter_map(|(field, value)| match Placeholder::parse(value) {
                Some(placeholder) => Some((field.clone(), placeholder.substitute(issue))),
                None if is_new => Some((field.clone(), value.clone())),
                None => None,
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> FieldMap {
        [
            ("Title", "{{Topic}}"),
            ("ActivityCount", "{{Activity}}"),
            ("Description", "{{Description}}"),
            ("IssueId", "{{Id}}"),
            ("AreaPath", "Support\\Mail"),
        ]
        .into_iter()
        .collect()
    }

    fn issue() -> Issue {
        Issue::new("issue2", "T", 1).with_description("line one\r\nline two\nthree")
    }

    #[test]
    fn new_item_gets_templates_and_literals() {
        let resolved = map().resolve(&issue(), true);
        assert_eq!(
            resolved,
            vec![
                ("ActivityCount".to_string(), "1".to_string()),
                ("AreaPath".to_string(), "Support\\Mail".to_string()),
                (
                    "Description".to_string(),
                    "line one<br/>line two<br/>three".to_string()
                ),
                ("IssueId".to_string(), "issue2".to_string()),
                ("Title".to_string(), "T".to_string()),
            ]
        );
    }

    #[test]
    fn update_skips_literals() {
        let resolved = map().resolve(&issue(), false);
        assert!(resolved.iter().all(|(field, _)| field != "AreaPath"));
        assert_eq!(resolved.len(), 4);
    }

    #[test]
    fn placeholder_must_match_exactly() {
        assert_eq!(Placeholder::parse("{{Topic}}"), Some(Placeholder::Topic));
        assert_eq!(Placeholder::parse("Re: {{Topic}}"), None);
        assert_eq!(Placeholder::parse("{{topic}}"), None);
    }

    #[test]
    fn deserializes_from_toml_table() {
        let map: FieldMap = toml::from_str("Title = \"{{Topic}}\"\nState = \"New\"").unwrap();
        let resolved = map.resolve(&Issue::new("a", "Subject", 2), false);
        assert_eq!(resolved, vec![("Title".to_string(), "Subject".to_string())]);
    }
}
