#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]

//! Command intake, deduplication, priority queueing, dispatch, and outcome
//! reporting (C8, §4.1).
//!
//! [`CommandPipeline`] is the single point every trading command passes
//! through, whether it came from the control-plane link, the strategy
//! monitor, or an operator tool — intake validation, the dedup window, the
//! bounded priority queue, and the single-threaded dispatcher all live
//! here. Dispatch itself (talking to the terminal bridge, retry/backoff,
//! outcome classification) is factored into [`dispatch`] so it can be
//! tested independent of the queue and dedup machinery.

pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod outcome;
pub mod pipeline;
pub mod queue;

pub use agent_types::CancelError;
pub use dedup::DedupWindow;
pub use error::{FailureKind, PipelineError};
pub use outcome::{Outcome, OutcomeKind};
pub use pipeline::{CommandPipeline, CommandStatus};
pub use queue::{PriorityQueue, PushOutcome};
