//! Workflow execution engine.
//!
//! Operations are grouped into stages and stages into a pipeline. Runs are
//! strictly sequential: each operation is awaited before the next starts, and
//! the mutable state has exactly one writer at a time.

pub mod context;
pub mod pipeline;
pub mod types;

pub use context::{CancellationToken, WorkflowContext};
pub use pipeline::{Operation, Pipeline, PipelineState, Stage};
pub use types::{PipelineReport, WorkflowError};
