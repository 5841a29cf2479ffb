//! Function definitions and their export into template fragments.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::consts::{BINARY_NAME, ENV_HANDLER, FUNCTION_RESOURCE_TYPE, FUNCTION_RUNTIME};
use crate::execute::WorkflowError;
use crate::hooks::{HookContext, HookPhase, HookRegistration, HookResult};
use crate::package::CodeLocation;
use crate::template::{Resource, Template, TemplateError, expr};
use crate::util::hash::logical_name;

use super::custom::CustomResourceRegistration;
use super::role::{RoleMap, RoleRequirement};
use super::{FunctionDecorator, FunctionDecoratorArgs};

/// Path of the handler routine inside the service binary, e.g.
/// `orders::api::create`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerRef(pub String);

impl HandlerRef {
  pub fn new(path: impl Into<String>) -> Self {
    Self(path.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Last path segment.
  pub fn short_name(&self) -> &str {
    self.0.rsplit("::").next().unwrap_or(&self.0)
  }

  /// Check that the reference is a `::`-separated path of identifiers.
  pub fn validate(&self) -> Result<(), String> {
    if self.0.trim().is_empty() {
      return Err("handler reference is empty".to_string());
    }
    for segment in self.0.split("::") {
      if !is_identifier(segment) {
        return Err(format!("handler `{}` has invalid path segment `{}`", self.0, segment));
      }
    }
    Ok(())
  }
}

impl fmt::Display for HandlerRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

fn is_identifier(segment: &str) -> bool {
  let mut chars = segment.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return false,
  }
  segment != "_" && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_memory_size() -> u32 {
  128
}

fn default_timeout() -> u32 {
  3
}

/// Runtime settings of a deployed function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionOptions {
  #[serde(default = "default_memory_size")]
  pub memory_size: u32,
  /// Seconds.
  #[serde(default = "default_timeout")]
  pub timeout: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub environment: BTreeMap<String, String>,
}

impl Default for FunctionOptions {
  fn default() -> Self {
    Self {
      memory_size: default_memory_size(),
      timeout: default_timeout(),
      description: None,
      environment: BTreeMap::new(),
    }
  }
}

/// A function of the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
  /// Defaults to the last segment of the handler path.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub handler: HandlerRef,
  #[serde(default)]
  pub role: RoleRequirement,
  #[serde(default)]
  pub options: FunctionOptions,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub custom_resources: Vec<CustomResourceRegistration>,
  /// Extra logical names the function resource depends on.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  #[serde(skip)]
  pub decorator: Option<HookRegistration<dyn FunctionDecorator>>,
}

/// Inputs shared by every function export of one build.
#[derive(Debug, Clone, Copy)]
pub struct ExportContext<'a> {
  pub service_name: &'a str,
  pub build_id: &'a str,
  pub code: &'a CodeLocation,
  pub roles: &'a RoleMap,
  /// Environment variable name -> stack parameter name.
  pub pipeline_parameters: &'a BTreeMap<String, String>,
}

impl FunctionDefinition {
  pub fn new(handler: impl Into<String>, role: RoleRequirement) -> Self {
    Self {
      name: None,
      handler: HandlerRef::new(handler),
      role,
      options: FunctionOptions::default(),
      custom_resources: Vec::new(),
      depends_on: Vec::new(),
      decorator: None,
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn with_custom_resource(mut self, registration: CustomResourceRegistration) -> Self {
    self.custom_resources.push(registration);
    self
  }

  pub fn with_decorator<F>(mut self, name: impl Into<String>, decorator: F) -> Self
  where
    F: Fn(HookContext, &FunctionDecoratorArgs<'_>, &mut BTreeMap<String, Value>, &mut Template) -> HookResult
      + Send
      + Sync
      + 'static,
  {
    self.decorator = Some(HookRegistration::new(name, std::sync::Arc::new(decorator)));
    self
  }

  pub fn function_name(&self) -> &str {
    self.name.as_deref().unwrap_or_else(|| self.handler.short_name())
  }

  pub fn logical_name(&self, service_name: &str) -> String {
    function_logical_name(service_name, self.function_name())
  }

  /// Export this function, its custom resources and its decorator output
  /// into one fragment.
  pub fn export(&self, ctx: &ExportContext<'_>, hook_context: &mut HookContext) -> Result<Template, WorkflowError> {
    let logical = self.logical_name(ctx.service_name);
    let mut fragment = Template::new();

    let mut depends_on = self.depends_on.clone();
    for registration in &self.custom_resources {
      let custom = registration.export(ctx)?;
      depends_on.push(registration.logical_name(ctx.service_name).to_string());
      fragment.safe_merge(custom)?;
    }
    depends_on.sort();
    depends_on.dedup();

    let mut resource =
      function_resource(ctx, &self.handler, &self.role, &self.options)?.with_depends_on(depends_on);

    if let Some(decorator) = &self.decorator {
      let mut decorated = Template::new();
      let mut metadata = resource.metadata.clone();
      let args = FunctionDecoratorArgs {
        service_name: ctx.service_name,
        logical_name: &logical,
        resource: &resource,
        code: ctx.code,
        build_id: ctx.build_id,
      };
      let next = decorator
        .hook
        .call(hook_context.clone(), &args, &mut metadata, &mut decorated)
        .map_err(|source| WorkflowError::hook(HookPhase::FunctionDecorator, decorator.name.clone(), source))?;
      *hook_context = next;
      resource.metadata = metadata;
      fragment.safe_merge(decorated)?;
    }

    debug!(function = %self.function_name(), logical_name = %logical, "exported function");
    fragment.add_resource(logical, resource)?;
    Ok(fragment)
  }
}

pub(crate) fn function_logical_name(service_name: &str, function_name: &str) -> String {
  logical_name(&format!("{function_name}Lambda"), &[service_name, function_name])
}

/// The function resource shared by service functions and custom resource
/// handlers.
pub(crate) fn function_resource(
  ctx: &ExportContext<'_>,
  handler: &HandlerRef,
  role: &RoleRequirement,
  options: &FunctionOptions,
) -> Result<Resource, WorkflowError> {
  let role_key = role.key(ctx.service_name).map_err(TemplateError::from)?;
  let role_value = ctx
    .roles
    .get(&role_key)
    .cloned()
    .ok_or_else(|| WorkflowError::Preconditions(vec![format!("no role resolved for `{role_key}` ({handler})")]))?;

  let mut variables = Map::new();
  for (key, value) in &options.environment {
    variables.insert(key.clone(), Value::String(value.clone()));
  }
  for (key, parameter) in ctx.pipeline_parameters {
    variables.insert(key.clone(), expr::reference(parameter));
  }
  variables.insert(ENV_HANDLER.to_string(), Value::String(handler.to_string()));

  let mut properties = json!({
    "Code": ctx.code.to_properties(),
    "Handler": BINARY_NAME,
    "Runtime": FUNCTION_RUNTIME,
    "Role": role_value,
    "MemorySize": options.memory_size,
    "Timeout": options.timeout,
    "Environment": {"Variables": variables},
  });
  if let Some(description) = &options.description {
    properties["Description"] = Value::String(description.clone());
  }
  Ok(Resource::new(FUNCTION_RESOURCE_TYPE, properties))
}
