//! The service being provisioned: its functions, roles, custom resources
//! and the extension points that contribute to its template.

mod custom;
mod function;
pub mod manifest;
mod role;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::hooks::{HookArgs, HookContext, HookError, HookResult};
use crate::package::CodeLocation;
use crate::template::{Output, Resource, Template, expr};
use crate::util::hash::logical_name;

pub use custom::CustomResourceRegistration;
pub use function::{ExportContext, FunctionDefinition, FunctionOptions, HandlerRef};
pub use manifest::{ManifestError, ServiceManifest};
pub use role::{Privilege, RoleDefinition, RoleMap, RoleRequirement};

/// Static assets published next to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
  /// Directory whose contents are archived.
  pub resources: PathBuf,
  #[serde(default = "default_index")]
  pub index_document: String,
  #[serde(default = "default_error")]
  pub error_document: String,
}

fn default_index() -> String {
  "index.html".to_string()
}

fn default_error() -> String {
  "error.html".to_string()
}

impl SiteConfig {
  pub fn new(resources: impl Into<PathBuf>) -> Self {
    Self {
      resources: resources.into(),
      index_document: default_index(),
      error_document: default_error(),
    }
  }
}

/// Everything known about the service before a build starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDefinition {
  pub name: String,
  #[serde(default)]
  pub description: String,
  /// Entries may be null; the precondition check reports them by index.
  #[serde(default)]
  pub functions: Vec<Option<FunctionDefinition>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub site: Option<SiteConfig>,
  /// Environment name -> variables supplied to every function.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub pipeline_environments: BTreeMap<String, BTreeMap<String, String>>,
}

impl ServiceDefinition {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  pub fn with_function(mut self, function: FunctionDefinition) -> Self {
    self.functions.push(Some(function));
    self
  }

  pub fn with_site(mut self, site: SiteConfig) -> Self {
    self.site = Some(site);
    self
  }

  pub fn with_environment(mut self, name: impl Into<String>, variables: BTreeMap<String, String>) -> Self {
    self.pipeline_environments.insert(name.into(), variables);
    self
  }

  /// Function definitions that are present, in declaration order.
  pub fn defined_functions(&self) -> impl Iterator<Item = &FunctionDefinition> {
    self.functions.iter().flatten()
  }

  /// Variable name -> stack parameter name, for every variable of the
  /// first pipeline environment.
  pub fn pipeline_parameters(&self) -> BTreeMap<String, String> {
    self
      .pipeline_environments
      .values()
      .next()
      .map(|variables| {
        variables
          .keys()
          .map(|key| (key.clone(), pipeline_parameter_name(key)))
          .collect()
      })
      .unwrap_or_default()
  }

  /// Environments whose variable names differ from the first environment's.
  pub fn mismatched_environments(&self) -> Vec<String> {
    let mut environments = self.pipeline_environments.iter();
    let Some((_, first)) = environments.next() else {
      return Vec::new();
    };
    let expected: BTreeSet<&String> = first.keys().collect();
    environments
      .filter(|(_, variables)| variables.keys().collect::<BTreeSet<_>>() != expected)
      .map(|(name, _)| name.clone())
      .collect()
  }
}

/// Stack parameter name for a pipeline environment variable.
pub fn pipeline_parameter_name(key: &str) -> String {
  key.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Arguments passed to a [`FunctionDecorator`].
#[derive(Debug)]
pub struct FunctionDecoratorArgs<'a> {
  pub service_name: &'a str,
  pub logical_name: &'a str,
  pub resource: &'a Resource,
  pub code: &'a CodeLocation,
  pub build_id: &'a str,
}

/// Adjusts the export of a single function.
///
/// Receives the function's resource, may edit its metadata and contributes
/// resources through its own fragment.
pub trait FunctionDecorator: Send + Sync {
  fn call(
    &self,
    context: HookContext,
    args: &FunctionDecoratorArgs<'_>,
    metadata: &mut BTreeMap<String, Value>,
    fragment: &mut Template,
  ) -> HookResult;
}

impl<F> FunctionDecorator for F
where
  F: Fn(HookContext, &FunctionDecoratorArgs<'_>, &mut BTreeMap<String, Value>, &mut Template) -> HookResult
    + Send
    + Sync,
{
  fn call(
    &self,
    context: HookContext,
    args: &FunctionDecoratorArgs<'_>,
    metadata: &mut BTreeMap<String, Value>,
    fragment: &mut Template,
  ) -> HookResult {
    self(context, args, metadata, fragment)
  }
}

/// Runs once per function while roles are resolved and may rewrite the
/// definition before it is exported.
pub trait ProfileDecorator: Send + Sync {
  fn call(&self, context: HookContext, args: &HookArgs<'_>, function: &mut FunctionDefinition) -> HookResult;
}

impl<F> ProfileDecorator for F
where
  F: Fn(HookContext, &HookArgs<'_>, &mut FunctionDefinition) -> HookResult + Send + Sync,
{
  fn call(&self, context: HookContext, args: &HookArgs<'_>, function: &mut FunctionDefinition) -> HookResult {
    self(context, args, function)
  }
}

/// Contributes the HTTP gateway of the service.
pub trait GatewayExporter: Send + Sync {
  fn name(&self) -> &str;

  fn export(&self, args: &HookArgs<'_>, roles: &RoleMap, fragment: &mut Template) -> Result<(), HookError>;
}

/// Contributes the resources serving the static site.
///
/// `archive` points at the uploaded site archive. `gateway_outputs` holds
/// the outputs of the gateway fragment so the site can be configured with
/// the API endpoint.
pub trait SiteExporter: Send + Sync {
  fn name(&self) -> &str;

  fn export(
    &self,
    args: &HookArgs<'_>,
    site: &SiteConfig,
    archive: &CodeLocation,
    gateway_outputs: &BTreeMap<String, Output>,
    fragment: &mut Template,
  ) -> Result<(), HookError>;
}

/// Declares a website bucket for the site and exposes its URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketSiteExporter;

impl SiteExporter for BucketSiteExporter {
  fn name(&self) -> &str {
    "bucket-site"
  }

  fn export(
    &self,
    args: &HookArgs<'_>,
    site: &SiteConfig,
    archive: &CodeLocation,
    gateway_outputs: &BTreeMap<String, Output>,
    fragment: &mut Template,
  ) -> Result<(), HookError> {
    let bucket = logical_name("SiteBucket", &[args.service_name]);
    let mut resource = Resource::new(
      "AWS::S3::Bucket",
      json!({
        "WebsiteConfiguration": {
          "IndexDocument": site.index_document,
          "ErrorDocument": site.error_document,
        },
      }),
    );
    resource.metadata.insert("SiteArchive".to_string(), archive.to_properties());
    if !gateway_outputs.is_empty() {
      let names: Vec<&String> = gateway_outputs.keys().collect();
      resource.metadata.insert("GatewayOutputs".to_string(), json!(names));
    }
    fragment.add_resource(bucket.clone(), resource)?;
    fragment.outputs.insert(
      "SiteURL".to_string(),
      Output::new("Static site URL", expr::get_att(&bucket, "WebsiteURL")),
    );
    Ok(())
  }
}
