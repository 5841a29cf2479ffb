//! Custom resources backed by a handler function of the service binary.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::consts::CUSTOM_RESOURCE_TYPE;
use crate::execute::WorkflowError;
use crate::template::{Resource, Template, expr};
use crate::util::hash::logical_name;

use super::function::{ExportContext, FunctionOptions, HandlerRef, function_logical_name, function_resource};
use super::role::RoleRequirement;

/// A custom resource whose lifecycle events are handled by `handler`.
///
/// The registration exports two resources: the handler function and the
/// custom resource that invokes it. The function owning the registration
/// depends on the custom resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomResourceRegistration {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub handler: HandlerRef,
  #[serde(default)]
  pub role: RoleRequirement,
  #[serde(default)]
  pub options: FunctionOptions,
  /// Passed to the handler with every lifecycle event.
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub properties: Map<String, Value>,
  #[serde(skip)]
  logical_name: OnceLock<String>,
}

impl CustomResourceRegistration {
  pub fn new(handler: impl Into<String>, role: RoleRequirement) -> Self {
    Self {
      name: None,
      handler: HandlerRef::new(handler),
      role,
      options: FunctionOptions::default(),
      properties: Map::new(),
      logical_name: OnceLock::new(),
    }
  }

  pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
    self.properties.insert(key.into(), value);
    self
  }

  /// Name of the handler function.
  pub fn function_name(&self) -> &str {
    self.name.as_deref().unwrap_or_else(|| self.handler.short_name())
  }

  pub fn handler_logical_name(&self, service_name: &str) -> String {
    function_logical_name(service_name, self.function_name())
  }

  /// Logical name of the invocation resource.
  ///
  /// Computed on first use and memoized; later calls return the same name
  /// whatever service name they pass.
  pub fn logical_name(&self, service_name: &str) -> &str {
    self.logical_name.get_or_init(|| {
      let function_name = self.function_name();
      logical_name(
        &format!("{function_name}CustomResource"),
        &[service_name, self.handler.as_str(), function_name],
      )
    })
  }

  pub(crate) fn export(&self, ctx: &ExportContext<'_>) -> Result<Template, WorkflowError> {
    let handler_name = self.handler_logical_name(ctx.service_name);
    let handler = function_resource(ctx, &self.handler, &self.role, &self.options)?;

    let mut properties = self.properties.clone();
    properties.insert("ServiceToken".to_string(), expr::get_att(&handler_name, "Arn"));
    let invocation = Resource::new(CUSTOM_RESOURCE_TYPE, Value::Object(properties))
      .with_depends_on(vec![handler_name.clone()]);

    let mut fragment = Template::new();
    fragment.add_resource(handler_name, handler)?;
    fragment.add_resource(self.logical_name(ctx.service_name), invocation)?;
    Ok(fragment)
  }
}
