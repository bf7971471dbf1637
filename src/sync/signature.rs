use std::fmt;

const SEPARATOR: char = ':';

/// Change-detection token stored as the comment of a parent link:
/// `{issue_id}:{activity_count}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueSignature {
    pub issue_id: String,
    pub activity_count: u32,
}

impl IssueSignature {
    pub fn new(issue_id: impl Into<String>, activity_count: u32) -> Self {
        Self {
            issue_id: issue_id.into(),
            activity_count,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decodes a well-formed comment. The count follows the last separator so
    /// ids that themselves contain a colon survive a round trip.
    pub fn decode(comment: &str) -> Option<Self> {
        let (issue_id, count) = comment.rsplit_once(SEPARATOR)?;
        let activity_count = count.trim().parse().ok()?;
        Some(Self::new(issue_id, activity_count))
    }

    /// Checks a link comment against `issue_id`.
    ///
    /// Returns `None` when the comment carries no separator or names a
    /// different issue. On a match, the inner value is the stored activity
    /// count, or `None` if it could not be read.
    pub fn match_comment(comment: &str, issue_id: &str) -> Option<Option<u32>> {
        let (stored_id, count) = comment.rsplit_once(SEPARATOR)?;
        if stored_id != issue_id {
            return None;
        }
        Some(count.trim().parse().ok())
    }
}

impl fmt::Display for IssueSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.issue_id, self.activity_count)
    }
}
