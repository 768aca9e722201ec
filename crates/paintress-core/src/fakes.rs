//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `ScriptedInvoker`, `HangingInvoker`, `RecordingPublisher`,
//! `StaticReviewer`, and `MemoryTracker`, which satisfy the trait contracts
//! without spawning processes or touching the network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{AgentInvoker, InvokeOutcome, InvokeRequest};
use crate::cancel::CancelSignal;
use crate::config::TrackerConfig;
use crate::domain::error::{PaintressError, Result};
use crate::domain::work_item::WorkItem;
use crate::publish::{PrPublisher, PublishRequest};
use crate::review::{ReviewRequest, ReviewRunner, ReviewVerdict};
use crate::tracker::IssueTracker;

// ---------------------------------------------------------------------------
// ScriptedInvoker
// ---------------------------------------------------------------------------

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRecord {
    pub item_id: String,
    pub model: String,
    pub slot_path: String,
}

/// Agent invoker whose outcomes are scripted per `(item id, model)`.
///
/// Unscripted calls succeed. Each call optionally takes `delay` first,
/// returning `Cancelled` if the signal fires meanwhile.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    script: Mutex<HashMap<(String, String), VecDeque<InvokeOutcome>>>,
    calls: Mutex<Vec<InvocationRecord>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue `outcome` for the next call of `model` on `item_id`.
    pub fn script(self, item_id: &str, model: &str, outcome: InvokeOutcome) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry((item_id.to_string(), model.to_string()))
            .or_default()
            .push_back(outcome);
        self
    }

    /// Make `model` soft-fail once on `item_id`.
    pub fn fail(self, item_id: &str, model: &str) -> Self {
        self.script(item_id, model, InvokeOutcome::SoftFail(format!("{model} failed")))
    }

    pub fn calls(&self) -> Vec<InvocationRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of invocations that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvokeRequest<'_>, cancel: &CancelSignal) -> InvokeOutcome {
        self.calls.lock().unwrap().push(InvocationRecord {
            item_id: request.item.id.clone(),
            model: request.model.to_string(),
            slot_path: request.workdir.to_string_lossy().to_string(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let interrupted = if self.delay.is_zero() {
            None
        } else {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => None,
                reason = cancel.cancelled() => Some(reason),
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(reason) = interrupted {
            return InvokeOutcome::Cancelled(reason);
        }
        self.script
            .lock()
            .unwrap()
            .get_mut(&(request.item.id.clone(), request.model.to_string()))
            .and_then(VecDeque::pop_front)
            .unwrap_or(InvokeOutcome::Success)
    }
}

// ---------------------------------------------------------------------------
// HangingInvoker
// ---------------------------------------------------------------------------

/// Agent that never finishes on its own; only cancellation or the cycle
/// deadline ends it.
#[derive(Debug, Default)]
pub struct HangingInvoker {
    started: AtomicUsize,
}

impl HangingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentInvoker for HangingInvoker {
    async fn invoke(&self, _request: &InvokeRequest<'_>, cancel: &CancelSignal) -> InvokeOutcome {
        self.started.fetch_add(1, Ordering::SeqCst);
        InvokeOutcome::Cancelled(cancel.cancelled().await)
    }
}

// ---------------------------------------------------------------------------
// RecordingPublisher
// ---------------------------------------------------------------------------

/// One recorded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub item_id: String,
    pub branch: String,
    pub base: String,
    pub model: String,
}

/// Publisher that records requests and returns `https://example.test/pr/<n>`.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishRecord>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every publish for `item_id`.
    pub fn fail_for(self, item_id: &str) -> Self {
        self.failing.lock().unwrap().insert(item_id.to_string());
        self
    }

    pub fn published(&self) -> Vec<PublishRecord> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrPublisher for RecordingPublisher {
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<String> {
        if self.failing.lock().unwrap().contains(&request.item.id) {
            return Err(PaintressError::Publish(format!(
                "remote rejected {}",
                request.branch
            )));
        }
        let mut published = self.published.lock().unwrap();
        published.push(PublishRecord {
            item_id: request.item.id.clone(),
            branch: request.branch.to_string(),
            base: request.base.to_string(),
            model: request.model.to_string(),
        });
        Ok(format!("https://example.test/pr/{}", published.len()))
    }
}

// ---------------------------------------------------------------------------
// StaticReviewer
// ---------------------------------------------------------------------------

/// Reviewer that returns the same verdict every time.
#[derive(Debug)]
pub struct StaticReviewer {
    verdict: ReviewVerdict,
    reviewed: Mutex<Vec<String>>,
}

impl StaticReviewer {
    pub fn passing() -> Self {
        Self::with_verdict(ReviewVerdict::Pass)
    }

    pub fn failing(reason: &str) -> Self {
        Self::with_verdict(ReviewVerdict::Fail(reason.to_string()))
    }

    pub fn with_verdict(verdict: ReviewVerdict) -> Self {
        Self {
            verdict,
            reviewed: Mutex::new(Vec::new()),
        }
    }

    /// Pull requests reviewed so far.
    pub fn reviewed(&self) -> Vec<String> {
        self.reviewed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReviewRunner for StaticReviewer {
    async fn review(
        &self,
        request: &ReviewRequest<'_>,
        _cancel: &CancelSignal,
    ) -> Result<ReviewVerdict> {
        self.reviewed
            .lock()
            .unwrap()
            .push(request.pull_request.to_string());
        Ok(self.verdict.clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryTracker
// ---------------------------------------------------------------------------

/// Tracker serving a fixed item list, filtered by state like the real one.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    items: Vec<WorkItem>,
    error: Option<String>,
    delay: Option<Duration>,
    queries: Mutex<Vec<TrackerConfig>>,
}

impl MemoryTracker {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    /// A tracker whose every fetch fails with `message`.
    pub fn unavailable(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Sleep for `delay` before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<TrackerConfig> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    async fn fetch(&self, query: &TrackerConfig) -> Result<Vec<WorkItem>> {
        self.queries.lock().unwrap().push(query.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.error {
            return Err(PaintressError::Tracker(message.clone()));
        }
        Ok(self
            .items
            .iter()
            .filter(|item| item.state_matches(&query.states))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn request<'a>(item: &'a WorkItem, model: &'a str) -> InvokeRequest<'a> {
        InvokeRequest {
            workdir: std::path::Path::new("/tmp"),
            item,
            branch: "paintress/my-1",
            model,
            prompt: "p",
            deadline: Instant::now() + Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn scripted_invoker_pops_outcomes_then_succeeds() {
        let invoker = ScriptedInvoker::new().fail("MY-1", "opus");
        let item = WorkItem::new("MY-1", "t", "Todo");
        let never = CancelSignal::never();

        assert!(matches!(
            invoker.invoke(&request(&item, "opus"), &never).await,
            InvokeOutcome::SoftFail(_)
        ));
        assert_eq!(
            invoker.invoke(&request(&item, "opus"), &never).await,
            InvokeOutcome::Success
        );
        assert_eq!(invoker.call_count(), 2);
    }

    #[tokio::test]
    async fn memory_tracker_filters_states() {
        let tracker = MemoryTracker::new(vec![
            WorkItem::new("MY-1", "a", "Todo"),
            WorkItem::new("MY-2", "b", "Done"),
        ]);
        let query = TrackerConfig {
            team: "MY".to_string(),
            states: vec!["todo".to_string()],
            ..TrackerConfig::default()
        };
        let items = tracker.fetch(&query).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(tracker.queries().len(), 1);

        let down = MemoryTracker::unavailable("401 unauthorized");
        assert!(down.fetch(&query).await.is_err());
    }
}
