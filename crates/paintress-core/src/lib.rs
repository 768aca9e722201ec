//! Paintress Core Library
//!
//! Runs expeditions: autonomous coding cycles against a target repository
//! (the continent). Each cycle takes a work item from the issue tracker,
//! isolates it in a pooled git worktree, drives the coding agent through
//! the model reserve, opens a pull request, and optionally reviews it.

pub mod agent;
pub mod cancel;
pub mod config;
pub mod cycle;
pub mod devserver;
pub mod domain;
pub mod fakes;
pub mod git;
pub mod journal;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod pool;
pub mod process;
pub mod prompt;
pub mod publish;
pub mod queue;
pub mod review;
pub mod telemetry;
pub mod tracker;

pub use domain::{
    AttemptResult, CycleFailure, CycleOutcome, CycleState, FailureKind, ModelAttempt,
    PaintressError, Result, RunReport, RunStatus, StopReason, Transition, ValidationError,
    WorkItem, WorkItemMetadata,
};

pub use agent::{
    invoke_within_deadline, AgentInvoker, CommandInvoker, DryRunInvoker, InvokeOutcome,
    InvokeRequest, ModelCursor, ModelReserve,
};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::{ExpeditionConfig, Language, TrackerConfig};
pub use cycle::{run_cycle, CycleContext};
pub use git::{is_git_repo, GitRunner};
pub use journal::{read_journal, Journal, JournalEntry};
pub use orchestrator::{Expedition, ExpeditionDeps};
pub use pool::{PoolConfig, WorkingCopy, WorkingCopyPool};
pub use publish::{GhPublisher, PrPublisher, PublishRequest};
pub use queue::{Budget, Dispatch, WorkQueue};
pub use review::{CommandReviewRunner, ReviewRequest, ReviewRunner, ReviewVerdict};
pub use tracker::{IssueTracker, LinearClient};

pub use metrics::METRICS;
pub use obs::{
    emit_cycle_finished, emit_cycle_started, emit_cycle_transition, emit_model_fallback,
    emit_run_finished, emit_run_started, CycleSpan,
};
pub use telemetry::init_tracing;

/// Paintress version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
