//! Execution role resolution.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::execute::{Operation, WorkflowContext, WorkflowError};
use crate::hooks::HookPhase;
use crate::service::RoleRequirement;
use crate::template::{TemplateError, expr};

use super::state::BuildState;

/// Runs the profile decorator on every function, then maps each role
/// requirement to an identifier expression.
///
/// Inline definitions become template resources, declared once per logical
/// name. Literal names are looked up through the identity API once per
/// distinct value.
pub struct ResolveRolesOp;

#[async_trait]
impl Operation<BuildState> for ResolveRolesOp {
  async fn invoke(&self, ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
    let inputs = &state.inputs;
    let outputs = &mut state.outputs;
    let service_name = inputs.service.name.as_str();

    let mut functions: Vec<_> = inputs.service.defined_functions().cloned().collect();
    if let Some(decorator) = &inputs.extensions.profile_decorator {
      let args = inputs.hook_args();
      for function in &mut functions {
        debug!(decorator = %decorator.name, function = %function.function_name(), "calling profile decorator");
        let next = decorator
          .hook
          .call(outputs.context.clone(), &args, function)
          .map_err(|source| WorkflowError::hook(HookPhase::ProfileDecorator, decorator.name.clone(), source))?;
        outputs.context = next;
      }
    }

    let requirements = functions.iter().flat_map(|function| {
      std::iter::once(&function.role).chain(function.custom_resources.iter().map(|custom| &custom.role))
    });

    let mut literals = BTreeSet::new();
    let mut inline_count = 0;
    for requirement in requirements {
      match requirement {
        RoleRequirement::Literal(name) => {
          literals.insert(name.clone());
        }
        RoleRequirement::Inline(definition) => {
          let logical = definition.logical_name(service_name).map_err(TemplateError::from)?;
          if outputs.roles.contains_key(&logical) {
            continue;
          }
          outputs.template.add_resource(logical.clone(), definition.to_resource())?;
          outputs.roles.insert(logical.clone(), expr::get_att(&logical, "Arn"));
          inline_count += 1;
          debug!(role = %logical, "declared inline role");
        }
      }
    }

    let mut lookups = 0;
    for name in literals {
      if outputs.roles.contains_key(&name) {
        continue;
      }
      ctx.ensure_active()?;
      let arn = inputs.session.get_role(&name).await?;
      lookups += 1;
      debug!(role = %name, arn = %arn, "resolved literal role");
      outputs.roles.insert(name, Value::String(arn));
    }

    info!(
      service = %service_name,
      inline_roles = inline_count,
      role_lookups = lookups,
      "roles resolved"
    );
    outputs.functions = functions;
    Ok(())
  }
}
