use tracing::warn;

use crate::sync::signature::IssueSignature;

/// A hierarchy link from the parent record to one synchronized work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub related_id: u64,
    pub comment: String,
    /// Position of the relation on the backend record, used to address the
    /// link when its comment is rewritten.
    pub relation_index: usize,
}

/// The root record aggregating links to all synchronized work items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentWorkItem {
    pub id: u64,
    pub links: Vec<ParentLink>,
}

/// A link whose comment decoded to the requested issue.
#[derive(Debug, Clone, Copy)]
pub struct LinkMatch<'a> {
    pub link: &'a ParentLink,
    /// `None` when the id matched but the stored count was unreadable.
    pub stored_activity: Option<u32>,
}

impl ParentWorkItem {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            links: Vec::new(),
        }
    }

    /// Finds the link carrying the signature of `issue_id`.
    ///
    /// Comments are compared on the exact issue id, never on a prefix, and
    /// comments without a signature are skipped. When several links match,
    /// the first in link order wins and the rest are reported.
    pub fn find_issue_link(&self, issue_id: &str) -> Option<LinkMatch<'_>> {
        let mut matches = self.links.iter().filter_map(|link| {
            IssueSignature::match_comment(&link.comment, issue_id).map(|stored_activity| {
                LinkMatch {
                    link,
                    stored_activity,
                }
            })
        });

        let first = matches.next()?;
        let duplicates: Vec<u64> = matches.map(|m| m.link.related_id).collect();
        if !duplicates.is_empty() {
            warn!(
                parent = self.id,
                issue_id,
                chosen = first.link.related_id,
                ignored = ?duplicates,
                "multiple links match issue, using the first"
            );
        }
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(links: &[(u64, &str)]) -> ParentWorkItem {
        ParentWorkItem {
            id: 1,
            links: links
                .iter()
                .enumerate()
                .map(|(i, (id, comment))| ParentLink {
                    related_id: *id,
                    comment: comment.to_string(),
                    relation_index: i,
                })
                .collect(),
        }
    }

    #[test]
    fn finds_exact_issue_id() {
        let p = parent(&[(10, "issue10:4"), (11, "issue1:2")]);
        let found = p.find_issue_link("issue1").unwrap();
        assert_eq!(found.link.related_id, 11);
        assert_eq!(found.stored_activity, Some(2));
    }

    #[test]
    fn prefix_of_stored_id_does_not_match() {
        let p = parent(&[(10, "issue10:4")]);
        assert!(p.find_issue_link("issue1").is_none());
    }

    #[test]
    fn garbage_comment_is_skipped() {
        let p = parent(&[(5, "garbageNoColon"), (6, "")]);
        assert!(p.find_issue_link("garbageNoColon").is_none());
        assert!(p.find_issue_link("issue2").is_none());
    }

    #[test]
    fn first_duplicate_wins() {
        let p = parent(&[(20, "dup:1"), (21, "dup:3")]);
        let found = p.find_issue_link("dup").unwrap();
        assert_eq!(found.link.related_id, 20);
        assert_eq!(found.link.relation_index, 0);
    }

    #[test]
    fn unreadable_count_still_matches() {
        let p = parent(&[(30, "issue3:lots")]);
        let found = p.find_issue_link("issue3").unwrap();
        assert_eq!(found.link.related_id, 30);
        assert_eq!(found.stored_activity, None);
    }
}
