//! Workflow error type shared by every operation.

use std::time::Duration;

use thiserror::Error;

use crate::hooks::{HookError, HookPhase};
use crate::package::{ArchiveError, ToolchainError};
use crate::remote::RemoteError;
use crate::template::TemplateError;

/// Errors raised by workflow operations and the pipeline itself.
#[derive(Debug, Error)]
pub enum WorkflowError {
  /// Malformed input, reported together before any side effect.
  #[error("precondition check failed:\n  - {}", .0.join("\n  - "))]
  Preconditions(Vec<String>),

  /// A user hook or exporter returned an error.
  #[error("{phase} hook {name} failed: {source}")]
  Hook {
    phase: HookPhase,
    name: String,
    #[source]
    source: HookError,
  },

  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error(transparent)]
  Toolchain(#[from] ToolchainError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  /// File system failure, with the attempted operation.
  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },

  /// The applied stack does not match what was built.
  #[error("stack verification failed: {0}")]
  Verification(String),

  #[error("cancelled: {0}")]
  Cancelled(String),

  /// Independent failures from one step. Rollback reports each separately.
  #[error("{}", join_errors(.0))]
  Multiple(Vec<WorkflowError>),

  /// An operation failed and the pipeline rolled back.
  #[error("{stage}/{operation} failed: {source}{}", rollback_suffix(.rollback_errors))]
  Aborted {
    stage: String,
    operation: String,
    #[source]
    source: Box<WorkflowError>,
    rollback_errors: Vec<WorkflowError>,
  },
}

impl WorkflowError {
  pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
    WorkflowError::Io {
      context: context.into(),
      source,
    }
  }

  pub fn hook(phase: HookPhase, name: impl Into<String>, source: HookError) -> Self {
    WorkflowError::Hook {
      phase,
      name: name.into(),
      source,
    }
  }

  /// The error that caused an abort, or `self` for any other variant.
  pub fn root_cause(&self) -> &WorkflowError {
    match self {
      WorkflowError::Aborted { source, .. } => source.root_cause(),
      other => other,
    }
  }

  /// Rollback failures attached to an abort.
  pub fn rollback_errors(&self) -> &[WorkflowError] {
    match self {
      WorkflowError::Aborted { rollback_errors, .. } => rollback_errors,
      _ => &[],
    }
  }
}

fn join_errors(errors: &[WorkflowError]) -> String {
  errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

fn rollback_suffix(errors: &[WorkflowError]) -> String {
  if errors.is_empty() {
    return String::new();
  }
  format!(" (rollback errors: {})", join_errors(errors))
}

/// Summary of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
  pub pipeline: String,
  /// `stage/operation` labels in completion order.
  pub completed: Vec<String>,
  pub elapsed: Duration,
}
