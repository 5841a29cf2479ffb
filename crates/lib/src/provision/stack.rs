//! Applying the template to the stack API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::consts::{
  OUTPUT_BUILD_ID, PARAM_CODE_BUCKET, PARAM_CODE_KEY, PARAM_SITE_ARCHIVE_KEY, TAG_BUILD_ID, TAG_BUILD_TAGS,
};
use crate::execute::{Operation, WorkflowContext, WorkflowError};
use crate::remote::StackRequest;

use super::state::{Artifacts, BuildInputs, BuildOutputs, BuildState};

/// Creates or updates the service stack.
///
/// Rollback restores the request the stack was last applied with, or
/// deletes the stack if this run created it. Dry runs skip the call.
pub struct ApplyStackOp;

#[async_trait]
impl Operation<BuildState> for ApplyStackOp {
  async fn invoke(&self, _ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
    let request = stack_request(&state.inputs, &state.outputs)?;
    if state.inputs.options.dry_run {
      info!(stack = %request.stack_name, "dry run, not applying stack");
      return Ok(());
    }

    let session = &state.inputs.session;
    let previous = session.last_request(&request.stack_name).await?;
    state.outputs.previous_request = Some(previous);

    info!(
      stack = %request.stack_name,
      resources = request.template.resources.len(),
      "applying stack"
    );
    let description = session.apply_stack(request).await?;
    info!(stack = %description.stack_name, status = %description.status, "stack applied");
    state.outputs.stack = Some(description);
    Ok(())
  }

  async fn rollback(&self, _ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
    let Some(previous) = state.outputs.previous_request.take() else {
      return Ok(());
    };
    let session = &state.inputs.session;
    let stack_name = state.inputs.stack_name();
    match previous {
      Some(request) => {
        warn!(stack = %stack_name, "restoring previous stack");
        session.apply_stack(request).await?;
      }
      None => {
        warn!(stack = %stack_name, "deleting stack created by this run");
        session.delete_stack(stack_name).await?;
      }
    }
    state.outputs.stack = None;
    Ok(())
  }
}

/// Checks that the applied stack reports this build.
pub struct VerifyStackOp;

#[async_trait]
impl Operation<BuildState> for VerifyStackOp {
  async fn invoke(&self, _ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
    if state.inputs.options.dry_run {
      return Ok(());
    }
    let Some(stack) = &state.outputs.stack else {
      return Err(WorkflowError::Verification("stack was not applied".to_string()));
    };
    if !stack.status.is_complete() {
      return Err(WorkflowError::Verification(format!(
        "stack {} is {}{}",
        stack.stack_name,
        stack.status,
        stack
          .status_reason
          .as_deref()
          .map(|reason| format!(": {reason}"))
          .unwrap_or_default()
      )));
    }
    let build_id = &state.inputs.options.build_id;
    match stack.output(OUTPUT_BUILD_ID) {
      Some(found) if found == build_id => {
        info!(stack = %stack.stack_name, build_id = %build_id, "stack verified");
        Ok(())
      }
      found => Err(WorkflowError::Verification(format!(
        "stack {} reports build {}, expected {}",
        stack.stack_name,
        found.unwrap_or("<none>"),
        build_id
      ))),
    }
  }
}

/// The create-or-update request for the assembled template.
pub fn stack_request(inputs: &BuildInputs, outputs: &BuildOutputs) -> Result<StackRequest, WorkflowError> {
  let options = &inputs.options;
  let service = &inputs.service;

  let mut parameters = BTreeMap::new();
  parameters.insert(PARAM_CODE_BUCKET.to_string(), options.bucket.clone());
  parameters.insert(
    PARAM_CODE_KEY.to_string(),
    Artifacts::key_of(&outputs.artifacts.code_archive),
  );
  if outputs.artifacts.site_archive.is_some() {
    parameters.insert(
      PARAM_SITE_ARCHIVE_KEY.to_string(),
      Artifacts::key_of(&outputs.artifacts.site_archive),
    );
  }

  let environment = match &options.environment {
    Some(name) => Some(service.pipeline_environments.get(name).ok_or_else(|| {
      WorkflowError::Preconditions(vec![format!("unknown pipeline environment `{name}`")])
    })?),
    None => service.pipeline_environments.values().next(),
  };
  if let Some(variables) = environment {
    for (key, parameter) in service.pipeline_parameters() {
      if let Some(value) = variables.get(&key) {
        parameters.insert(parameter, value.clone());
      }
    }
  }

  let mut tags = BTreeMap::new();
  tags.insert(TAG_BUILD_ID.to_string(), options.build_id.clone());
  if !options.build_tags.is_empty() {
    tags.insert(TAG_BUILD_TAGS.to_string(), options.build_tags.join(","));
  }

  Ok(StackRequest {
    stack_name: inputs.stack_name().to_string(),
    template: outputs.template.clone(),
    parameters,
    tags,
  })
}
