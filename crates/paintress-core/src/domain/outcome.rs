//! Cycle states, per-cycle outcome records, and the aggregate run result.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// States of the cycle state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Dequeued,
    Acquiring,
    SettingUp,
    Implementing,
    Publishing,
    Reviewing,
    Done,
    Failed,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Dequeued => "dequeued",
            CycleState::Acquiring => "acquiring",
            CycleState::SettingUp => "setting_up",
            CycleState::Implementing => "implementing",
            CycleState::Publishing => "publishing",
            CycleState::Reviewing => "reviewing",
            CycleState::Done => "done",
            CycleState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Done | CycleState::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Every non-terminal state may fail; Implementing may loop on itself
    /// while the model reserve advances.
    pub fn can_transition_to(&self, next: CycleState) -> bool {
        use CycleState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Dequeued, Acquiring)
                | (Acquiring, SettingUp)
                | (SettingUp, Implementing)
                | (Implementing, Implementing)
                | (Implementing, Publishing)
                | (Publishing, Reviewing)
                | (Reviewing, Done)
        )
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cycle ended in `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Acquisition,
    Setup,
    ModelsExhausted,
    DeadlineExceeded,
    Publish,
    Review,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Acquisition => "acquisition",
            FailureKind::Setup => "setup",
            FailureKind::ModelsExhausted => "models_exhausted",
            FailureKind::DeadlineExceeded => "deadline_exceeded",
            FailureKind::Publish => "publish",
            FailureKind::Review => "review",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleFailure {
    pub kind: FailureKind,
    /// State the cycle was in when it failed.
    pub during: CycleState,
    pub message: String,
}

/// One recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transition {
    pub from: CycleState,
    pub to: CycleState,
    /// Milliseconds since the cycle started.
    pub at_ms: u64,
}

/// Result of one agent invocation attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Succeeded,
    SoftFailed,
    DeadlineExceeded,
    Cancelled,
}

/// One model attempt inside the Implementing state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelAttempt {
    /// Reserve cursor position of this attempt.
    pub cursor: usize,
    pub model: String,
    pub result: AttemptResult,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The record every cycle emits exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleOutcome {
    pub item_id: String,
    pub final_state: CycleState,
    /// Last model invoked (or, in dry-run, the model that would have been).
    pub model: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub branch: Option<String>,
    pub pull_request: Option<String>,
    pub failure: Option<CycleFailure>,
    pub transitions: Vec<Transition>,
    pub attempts: Vec<ModelAttempt>,
    /// Rendered task prompt, present only in dry-run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run_prompt: Option<String>,
}

impl CycleOutcome {
    pub fn succeeded(&self) -> bool {
        self.final_state == CycleState::Done
    }

    /// Failed because the cancellation signal fired.
    pub fn interrupted(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|f| f.kind == FailureKind::Cancelled)
    }

    /// Failed for any reason other than cancellation.
    pub fn failed_hard(&self) -> bool {
        self.final_state == CycleState::Failed && !self.interrupted()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    /// Label used for spans, logs, and summaries.
    pub fn label(&self) -> &'static str {
        if self.succeeded() {
            "done"
        } else if self.interrupted() {
            "interrupted"
        } else {
            "failed"
        }
    }
}

/// Aggregate exit status of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    Success,
    Failed { failed_cycles: usize },
    Interrupted { signal: String },
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed { .. } => 1,
            RunStatus::Interrupted { .. } => 130,
        }
    }
}

/// Why the dispatch loop stopped handing out new cycles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    QueueEmpty,
    BudgetExhausted,
    Cancelled,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub stop_reason: StopReason,
    /// Cycles started (the budget's attempted count).
    pub attempted: usize,
    pub outcomes: Vec<CycleOutcome>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.failed_hard()).count()
    }

    pub fn interrupted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.interrupted()).count()
    }

    pub fn outcome_for(&self, item_id: &str) -> Option<&CycleOutcome> {
        self.outcomes.iter().find(|o| o.item_id == item_id)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
