//! Domain model for Paintress expeditions.
//!
//! - [`work_item`]: `WorkItem` and state normalization
//! - [`outcome`]: `CycleState`, `CycleOutcome`, `RunStatus`, `RunReport`
//! - [`error`]: `PaintressError`, `ValidationError`, `Result`

pub mod error;
pub mod outcome;
pub mod work_item;

pub use error::{PaintressError, Result, ValidationError};
pub use outcome::{
    AttemptResult, CycleFailure, CycleOutcome, CycleState, FailureKind, ModelAttempt,
    RunReport, RunStatus, StopReason, Transition,
};
pub use work_item::{branch_slug, normalize_state, WorkItem, WorkItemMetadata, BRANCH_PREFIX};
