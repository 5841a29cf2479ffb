//! Infrastructure template types.
//!
//! A [`Template`] is the single document handed to the stack API. It is built
//! up from independently generated fragments (see [`super::merge`]) and is
//! serialized with the PascalCase keys the template format expects:
//!
//! ```json
//! {
//!   "Description": "orders service",
//!   "Parameters": { "CodeBucket": { "Type": "String", "MinLength": 3 } },
//!   "Resources": {
//!     "OrdersFunction0a1b2c...": {
//!       "Type": "AWS::Lambda::Function",
//!       "Properties": { "Handler": "bootstrap" }
//!     }
//!   },
//!   "Outputs": { "BuildID": { "Value": "20240101" } }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TemplateError;

/// A complete or partial (fragment) infrastructure template.
///
/// All maps are [`BTreeMap`]s so serialization order is deterministic, which
/// keeps the rendered template stable between identical builds.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub parameters: BTreeMap<String, Parameter>,

  #[serde(default)]
  pub resources: BTreeMap<String, Resource>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub outputs: BTreeMap<String, Output>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub metadata: BTreeMap<String, Value>,
}

impl Template {
  /// Create an empty template.
  pub fn new() -> Self {
    Self::default()
  }

  /// Create an empty template with a description.
  pub fn with_description(description: impl Into<String>) -> Self {
    Self {
      description: Some(description.into()),
      ..Self::default()
    }
  }

  /// Declare a single resource.
  ///
  /// Follows the safe-merge rule: redeclaring an identical resource is a
  /// no-op, redeclaring a different one is a conflict.
  pub fn add_resource(&mut self, logical_name: impl Into<String>, resource: Resource) -> Result<(), TemplateError> {
    let mut fragment = Template::new();
    fragment.resources.insert(logical_name.into(), resource);
    self.safe_merge(fragment)
  }

  /// Iterate over all resources of the given type.
  pub fn resources_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = (&'a String, &'a Resource)> {
    self
      .resources
      .iter()
      .filter(move |(_, resource)| resource.resource_type == resource_type)
  }

  /// Serialize the template into the document handed to the stack API.
  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }

  /// Deep copy through serialization.
  ///
  /// Used to hand out read-only views that share no state with the original.
  pub fn reserialized(&self) -> Result<Template, serde_json::Error> {
    let body = serde_json::to_vec(self)?;
    serde_json::from_slice(&body)
  }
}

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
  #[serde(rename = "Type")]
  pub resource_type: String,

  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub properties: Value,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub metadata: BTreeMap<String, Value>,
}

impl Resource {
  pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
    Self {
      resource_type: resource_type.into(),
      properties,
      depends_on: Vec::new(),
      metadata: BTreeMap::new(),
    }
  }

  pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
    self.depends_on = depends_on;
    self
  }

  /// The `Environment.Variables` map of a function resource, if present.
  pub fn environment(&self) -> Option<&serde_json::Map<String, Value>> {
    self
      .properties
      .get("Environment")
      .and_then(|env| env.get("Variables"))
      .and_then(Value::as_object)
  }

  /// The `Environment.Variables` map, created on demand.
  ///
  /// Returns `None` when the properties or environment block exist but are
  /// not JSON objects.
  pub fn environment_mut(&mut self) -> Option<&mut serde_json::Map<String, Value>> {
    if self.properties.is_null() {
      self.properties = Value::Object(serde_json::Map::new());
    }
    let props = self.properties.as_object_mut()?;
    let env = props
      .entry("Environment")
      .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let vars = env
      .as_object_mut()?
      .entry("Variables")
      .or_insert_with(|| Value::Object(serde_json::Map::new()));
    vars.as_object_mut()
  }
}

/// A stack parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
  #[serde(rename = "Type")]
  pub param_type: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub allowed_pattern: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_length: Option<u64>,
}

impl Parameter {
  /// A `String` parameter with the given constraints.
  ///
  /// Empty defaults and patterns and a zero minimum length are left out.
  pub fn string(description: &str, default: &str, allowed_pattern: &str, min_length: u64) -> Self {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    Self {
      param_type: "String".to_string(),
      description: non_empty(description),
      default: non_empty(default),
      allowed_pattern: non_empty(allowed_pattern),
      min_length: (min_length > 0).then_some(min_length),
    }
  }
}

/// A stack output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  pub value: Value,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub export: Option<Value>,
}

impl Output {
  pub fn new(description: &str, value: Value) -> Self {
    Self {
      description: Some(description.to_string()),
      value,
      export: None,
    }
  }
}
