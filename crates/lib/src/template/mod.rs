//! Template model, fragment merging and the final annotation passes.

pub mod annotate;
pub mod expr;
mod merge;
mod types;

use std::fmt;

use thiserror::Error;

pub use merge::{MergeConflict, TemplateSection};
pub use types::{Output, Parameter, Resource, Template};

/// A function resource missing part of its runtime environment contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentGap {
  pub resource: String,
  pub missing: Vec<String>,
}

impl fmt::Display for EnvironmentGap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} is missing {}", self.resource, self.missing.join(", "))
  }
}

/// Errors raised while assembling or validating a template.
#[derive(Debug, Error)]
pub enum TemplateError {
  /// One or more logical names were declared twice with different content.
  #[error("template merge conflict: {}", join_display(.0))]
  MergeConflicts(Vec<MergeConflict>),

  /// A resource depends on a logical name that is not declared.
  #[error("resource {resource} depends on undeclared resource {dependency}")]
  UnknownDependency { resource: String, dependency: String },

  /// A function resource's environment is not a key/value map.
  #[error("function {resource} has an unsupported environment block")]
  UnsupportedEnvironment { resource: String },

  /// Function resources without the discovery or log-level keys.
  #[error("template validation failed: {}", join_display(.0))]
  IncompleteEnvironment(Vec<EnvironmentGap>),

  #[error("template serialization failed: {0}")]
  Serialize(#[from] serde_json::Error),
}

impl TemplateError {
  /// Logical names involved in a merge conflict, if this is one.
  pub fn conflicting_names(&self) -> Vec<&str> {
    match self {
      TemplateError::MergeConflicts(conflicts) => conflicts.iter().map(|c| c.logical_name.as_str()).collect(),
      _ => Vec::new(),
    }
  }
}

fn join_display<T: fmt::Display>(items: &[T]) -> String {
  items.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
