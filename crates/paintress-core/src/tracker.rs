//! Issue-tracker client.
//!
//! [`IssueTracker`] is the seam the orchestrator depends on. [`LinearClient`]
//! is the production backend: Linear's GraphQL API, authenticated with an
//! API key from `LINEAR_API_KEY`. Only the fields Paintress consumes are
//! modelled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::domain::error::{PaintressError, Result};
use crate::domain::work_item::{WorkItem, WorkItemMetadata};

pub const LINEAR_API_URL: &str = "https://api.linear.app/graphql";
pub const LINEAR_API_KEY_ENV: &str = "LINEAR_API_KEY";

/// Page size and default page cap for one fetch.
const PAGE_SIZE: u32 = 50;
const MAX_PAGES: usize = 20;

/// Source of work items. Errors here abort the run before any cycle starts.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn fetch(&self, query: &TrackerConfig) -> Result<Vec<WorkItem>>;
}

/// Linear GraphQL client.
pub struct LinearClient {
    api_url: String,
    api_key: String,
    max_pages: usize,
    http: reqwest::Client,
}

impl LinearClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_url(LINEAR_API_URL, api_key)
    }

    pub fn with_url(api_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("paintress/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            max_pages: MAX_PAGES,
            http,
        })
    }

    /// Stop after `max_pages` pages (at least one).
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Build a client from `LINEAR_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(LINEAR_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PaintressError::Tracker(format!("{LINEAR_API_KEY_ENV} is not set")))?;
        Self::new(key)
    }

    async fn fetch_page(
        &self,
        query: &TrackerConfig,
        after: Option<&str>,
    ) -> Result<IssueConnection> {
        let body = json!({
            "query": ISSUES_QUERY,
            "variables": {
                "filter": issue_filter(query),
                "first": PAGE_SIZE,
                "after": after,
            },
        });

        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PaintressError::Tracker(format!(
                "linear returned {status}: {}",
                text.trim()
            )));
        }

        let envelope: GraphQlResponse = response.json().await?;
        envelope.into_issues()
    }
}

#[async_trait]
impl IssueTracker for LinearClient {
    async fn fetch(&self, query: &TrackerConfig) -> Result<Vec<WorkItem>> {
        if query.team.trim().is_empty() {
            return Err(PaintressError::Tracker("team key is required".to_string()));
        }

        let mut items = Vec::new();
        let mut after: Option<String> = None;
        for page in 0..self.max_pages {
            let conn = self.fetch_page(query, after.as_deref()).await?;
            debug!(page, count = conn.nodes.len(), "fetched issue page");
            items.extend(conn.nodes.into_iter().map(IssueNode::into_work_item));
            after = next_cursor(conn.page_info);
            if after.is_none() {
                break;
            }
        }
        if after.is_some() {
            warn!(
                team = %query.team,
                pages = self.max_pages,
                fetched = items.len(),
                "issue list truncated, more pages remain"
            );
        }

        items.retain(|item| item.state_matches(&query.states));
        info!(team = %query.team, count = items.len(), "fetched work items");
        Ok(items)
    }
}

const ISSUES_QUERY: &str = r#"
query Issues($filter: IssueFilter, $first: Int, $after: String) {
  issues(filter: $filter, first: $first, after: $after) {
    nodes {
      identifier
      title
      description
      url
      priority
      state { name }
      labels { nodes { name } }
    }
    pageInfo { hasNextPage endCursor }
  }
}
"#;

/// Cursor of the next page, if the tracker reports one.
fn next_cursor(info: Option<PageInfo>) -> Option<String> {
    match info {
        Some(PageInfo {
            has_next_page: true,
            end_cursor: Some(cursor),
        }) => Some(cursor),
        _ => None,
    }
}

fn issue_filter(query: &TrackerConfig) -> serde_json::Value {
    let mut filter = json!({ "team": { "key": { "eq": query.team } } });
    if let Some(project) = query.project.as_deref().filter(|p| !p.trim().is_empty()) {
        filter["project"] = json!({ "name": { "eq": project } });
    }
    filter
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<IssuesData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

impl GraphQlResponse {
    fn into_issues(self) -> Result<IssueConnection> {
        if let Some(first) = self.errors.first() {
            return Err(PaintressError::Tracker(format!(
                "linear query failed: {}",
                first.message
            )));
        }
        self.data
            .map(|d| d.issues)
            .ok_or_else(|| PaintressError::Tracker("linear response had no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct IssuesData {
    issues: IssueConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueConnection {
    nodes: Vec<IssueNode>,
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IssueNode {
    identifier: String,
    title: String,
    description: Option<String>,
    url: Option<String>,
    priority: Option<f64>,
    state: Option<NamedNode>,
    labels: Option<LabelConnection>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NamedNode {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LabelConnection {
    nodes: Vec<NamedNode>,
}

impl IssueNode {
    fn into_work_item(self) -> WorkItem {
        let state = self.state.map(|s| s.name).unwrap_or_default();
        WorkItem::new(self.identifier, self.title, state).with_metadata(WorkItemMetadata {
            description: self.description.filter(|d| !d.trim().is_empty()),
            url: self.url,
            priority: self.priority.map(|p| p.clamp(0.0, 4.0) as u8),
            labels: self
                .labels
                .map(|l| l.nodes.into_iter().map(|n| n.name).collect())
                .unwrap_or_default(),
        })
    }
}
