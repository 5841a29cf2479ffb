//! Precondition checks run before any side effect.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::execute::{Operation, WorkflowContext, WorkflowError};
use crate::service::ServiceDefinition;

use super::state::BuildState;

/// Warns when the pipeline environments disagree on their variable names.
///
/// Parameters are derived from the first environment, so an environment with
/// a different key set would leave parameters unset or values unused.
pub struct VerifyEnvironmentsOp;

#[async_trait]
impl Operation<BuildState> for VerifyEnvironmentsOp {
  async fn invoke(&self, _ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
    let service = &state.inputs.service;
    let mismatched = service.mismatched_environments();
    if mismatched.is_empty() {
      info!(
        environments = service.pipeline_environments.len(),
        "pipeline environments are consistent"
      );
    } else {
      warn!(
        environments = ?mismatched,
        "pipeline environments do not share the same variable names"
      );
    }
    Ok(())
  }
}

/// Rejects malformed service definitions, reporting every problem at once.
pub struct ValidatePreconditionsOp;

#[async_trait]
impl Operation<BuildState> for ValidatePreconditionsOp {
  async fn invoke(&self, _ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
    let has_hooks = !state.inputs.hooks.is_empty();
    let errors = check_service(&state.inputs.service, has_hooks);
    if errors.is_empty() {
      info!(
        service = %state.inputs.service.name,
        functions = state.inputs.service.functions.len(),
        "preconditions satisfied"
      );
      Ok(())
    } else {
      Err(WorkflowError::Preconditions(errors))
    }
  }
}

/// Every precondition violation of `service`.
///
/// An empty function set is only an error when no hooks are registered,
/// since hooks may contribute the whole template themselves.
pub fn check_service(service: &ServiceDefinition, has_hooks: bool) -> Vec<String> {
  let mut errors = Vec::new();

  if service.functions.is_empty() {
    if has_hooks {
      warn!(service = %service.name, "no functions provided, continuing with hooks only");
    } else {
      errors.push("no functions provided".to_string());
    }
  }

  for (index, function) in service.functions.iter().enumerate() {
    if function.is_none() {
      errors.push(format!("function at position {index} is null"));
    }
  }

  let mut names: BTreeMap<&str, usize> = BTreeMap::new();
  for function in service.defined_functions() {
    if let Err(message) = function.handler.validate() {
      errors.push(message);
    }
    *names.entry(function.function_name()).or_default() += 1;

    for custom in &function.custom_resources {
      if let Err(message) = custom.handler.validate() {
        errors.push(message);
      }
      *names.entry(custom.function_name()).or_default() += 1;
    }
  }

  for (name, count) in names.into_iter().filter(|(_, count)| *count > 1) {
    errors.push(format!("multiple definitions of function `{name}` (count {count})"));
  }

  errors
}
