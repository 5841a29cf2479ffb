//! Hook invocation protocol.
//!
//! Every call replaces the threaded context with the hook's return value. A
//! failing hook leaves the context as it was before the call.

use tracing::{debug, info, warn};

use crate::execute::WorkflowError;
use crate::package::CodeArchive;
use crate::template::Template;

use super::{
  ArchiveHook, HookArgs, HookContext, HookPhase, HookRegistration, ServiceDecorator, ValidationHook, WorkflowHook,
};

/// Run a slot of plain workflow hooks in registration order.
pub fn call_workflow_hooks(
  phase: HookPhase,
  hooks: &[HookRegistration<dyn WorkflowHook>],
  context: &mut HookContext,
  args: &HookArgs<'_>,
) -> Result<(), WorkflowError> {
  for registration in hooks {
    info!(phase = %phase, hook = %registration.name, context_keys = context.len(), "calling workflow hook");
    let next = registration
      .hook
      .call(context.clone(), args)
      .map_err(|source| WorkflowError::hook(phase, registration.name.clone(), source))?;
    *context = next;
  }
  Ok(())
}

/// Run archive hooks against the open code archive.
pub fn call_archive_hooks(
  hooks: &[HookRegistration<dyn ArchiveHook>],
  context: &mut HookContext,
  args: &HookArgs<'_>,
  archive: &mut CodeArchive,
) -> Result<(), WorkflowError> {
  for registration in hooks {
    info!(hook = %registration.name, "calling archive hook");
    let next = registration
      .hook
      .call(context.clone(), args, archive)
      .map_err(|source| WorkflowError::hook(HookPhase::Archive, registration.name.clone(), source))?;
    *context = next;
  }
  Ok(())
}

/// Run service decorators, each against its own empty fragment.
///
/// A fragment is merged into `template` right after its decorator returns,
/// so no decorator observes another decorator's fragment.
pub fn call_service_decorators(
  hooks: &[HookRegistration<dyn ServiceDecorator>],
  context: &mut HookContext,
  args: &HookArgs<'_>,
  template: &mut Template,
) -> Result<(), WorkflowError> {
  for registration in hooks {
    info!(hook = %registration.name, "calling service decorator");
    let mut fragment = Template::new();
    let next = registration
      .hook
      .call(context.clone(), args, &mut fragment)
      .map_err(|source| WorkflowError::hook(HookPhase::ServiceDecorator, registration.name.clone(), source))?;
    *context = next;

    debug!(
      hook = %registration.name,
      resources = fragment.resources.len(),
      outputs = fragment.outputs.len(),
      "merging decorator fragment"
    );
    template.safe_merge(fragment).inspect_err(|err| {
      warn!(hook = %registration.name, error = %err, "decorator fragment conflicts with template");
    })?;
  }
  Ok(())
}

/// Run validation hooks, each against a fresh deserialized copy of `template`.
pub fn call_validation_hooks(
  hooks: &[HookRegistration<dyn ValidationHook>],
  context: &mut HookContext,
  args: &HookArgs<'_>,
  template: &Template,
) -> Result<(), WorkflowError> {
  if hooks.is_empty() {
    return Ok(());
  }
  let body = serde_json::to_vec(template).map_err(crate::template::TemplateError::from)?;

  for registration in hooks {
    info!(hook = %registration.name, "calling validation hook");
    let copy: Template = serde_json::from_slice(&body).map_err(crate::template::TemplateError::from)?;
    let next = registration
      .hook
      .call(context.clone(), args, &copy)
      .map_err(|source| WorkflowError::hook(HookPhase::Validation, registration.name.clone(), source))?;
    *context = next;
  }
  Ok(())
}

/// Run rollback hooks in reverse registration order.
///
/// Every hook runs even if an earlier one fails; failures are returned.
pub fn call_rollback_hooks(
  hooks: &[HookRegistration<dyn WorkflowHook>],
  context: &mut HookContext,
  args: &HookArgs<'_>,
) -> Vec<WorkflowError> {
  let mut errors = Vec::new();
  for registration in hooks.iter().rev() {
    info!(hook = %registration.name, "calling rollback hook");
    match registration.hook.call(context.clone(), args) {
      Ok(next) => *context = next,
      Err(source) => {
        warn!(hook = %registration.name, error = %source, "rollback hook failed");
        errors.push(WorkflowError::hook(HookPhase::Rollback, registration.name.clone(), source));
      }
    }
  }
  errors
}
