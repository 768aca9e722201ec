//! Work items drawn from the issue tracker.

use serde::{Deserialize, Serialize};

/// Branch namespace for cycle branches.
pub const BRANCH_PREFIX: &str = "paintress";

/// A unit of work fetched from the issue tracker.
///
/// Identity is the tracker id. Items are immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItem {
    /// Tracker identifier (e.g. `MY-239`).
    pub id: String,
    pub title: String,
    /// Workflow state name as reported by the tracker.
    pub state: String,
    #[serde(default)]
    pub metadata: WorkItemMetadata,
}

/// Tracker fields consumed when rendering the agent prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItemMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            state: state.into(),
            metadata: WorkItemMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: WorkItemMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Branch name for a cycle working on this item, e.g. `paintress/my-239`.
    pub fn branch_name(&self) -> String {
        format!("{}/{}", BRANCH_PREFIX, branch_slug(&self.id))
    }

    /// Whether the item's state is in `allowed` after normalization.
    ///
    /// An empty allow-list accepts every state.
    pub fn state_matches(&self, allowed: &[String]) -> bool {
        if allowed.is_empty() {
            return true;
        }
        let state = normalize_state(&self.state);
        allowed.iter().any(|a| normalize_state(a) == state)
    }
}

/// Normalize a workflow state name: trimmed, lowercase, hyphens to spaces.
///
/// `"In-Progress"` and `"in progress"` compare equal.
pub fn normalize_state(state: &str) -> String {
    state.trim().to_lowercase().replace('-', " ")
}

/// Lowercase git-safe slug: runs of anything other than `[a-z0-9._]` become `-`.
pub fn branch_slug(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut last_dash = true;
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches(|c| c == '-' || c == '.').to_string();
    if slug.is_empty() {
        "item".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_state_hyphen_and_case() {
        assert_eq!(normalize_state("In-Progress"), "in progress");
        assert_eq!(normalize_state("  Todo "), "todo");
        assert_eq!(normalize_state("in progress"), "in progress");
    }

    #[test]
    fn test_state_matches_allow_list() {
        let item = WorkItem::new("MY-1", "Fix login", "In Progress");
        assert!(item.state_matches(&["in-progress".to_string()]));
        assert!(item.state_matches(&[]));
        assert!(!item.state_matches(&["todo".to_string(), "backlog".to_string()]));
    }

    #[test]
    fn test_branch_name_is_git_safe() {
        let item = WorkItem::new("MY-239", "x", "Todo");
        assert_eq!(item.branch_name(), "paintress/my-239");

        assert_eq!(branch_slug("Feat: add  ~thing~"), "feat-add-thing");
        assert_eq!(branch_slug("..."), "item");
        assert_eq!(branch_slug("../escape"), "escape");
    }

    #[test]
    fn test_metadata_defaults_when_absent() {
        let json = r#"{"id":"MY-2","title":"t","state":"Todo"}"#;
        let item: WorkItem = serde_json::from_str(json).expect("deserialize");
        assert_eq!(item.metadata, WorkItemMetadata::default());
    }
}
