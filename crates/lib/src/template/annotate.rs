//! Whole-template annotation passes.
//!
//! These run after every fragment has been merged: discovery values may
//! reference any resource in the template, so they can only be computed once
//! the resource set is final.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::consts::{
  ENV_DISCOVERY_INFO, ENV_LOG_LEVEL, FUNCTION_RESOURCE_TYPE, META_BUILD_ID, OUTPUT_BUILD_ID, OUTPUT_BUILD_TIME,
};

use super::{EnvironmentGap, Output, Template, TemplateError, expr};

/// Inject the discovery value and log level into every function resource.
///
/// The discovery value is an `Fn::Sub` expression over a JSON document
/// describing the function itself, the stack it lives in and each resource
/// it depends on. The stack API resolves the placeholders at apply time.
/// Existing log-level values are kept.
pub fn annotate_discovery_info(template: &mut Template, log_level: &str) -> Result<(), TemplateError> {
  let function_names: Vec<String> = template
    .resources_of_type(FUNCTION_RESOURCE_TYPE)
    .map(|(name, _)| name.clone())
    .collect();

  for name in function_names {
    let discovery = discovery_info_for(template, &name)?;
    let Some(resource) = template.resources.get_mut(&name) else {
      continue;
    };
    let env = resource
      .environment_mut()
      .ok_or_else(|| TemplateError::UnsupportedEnvironment { resource: name.clone() })?;
    env.insert(ENV_DISCOVERY_INFO.to_string(), discovery);
    env
      .entry(ENV_LOG_LEVEL.to_string())
      .or_insert_with(|| Value::String(log_level.to_string()));
    debug!(resource = %name, "annotated discovery info");
  }
  Ok(())
}

/// Build the discovery expression for one resource.
pub fn discovery_info_for(template: &Template, logical_name: &str) -> Result<Value, TemplateError> {
  let mut resources = Map::new();
  if let Some(resource) = template.resources.get(logical_name) {
    for dependency in &resource.depends_on {
      let target = template
        .resources
        .get(dependency)
        .ok_or_else(|| TemplateError::UnknownDependency {
          resource: logical_name.to_string(),
          dependency: dependency.clone(),
        })?;
      resources.insert(
        dependency.clone(),
        json!({
          "ResourceID": dependency,
          "ResourceType": target.resource_type,
          "Ref": format!("${{{dependency}}}"),
        }),
      );
    }
  }

  let document = json!({
    "ResourceID": logical_name,
    "Region": "${AWS::Region}",
    "StackID": "${AWS::StackId}",
    "StackName": "${AWS::StackName}",
    "Resources": resources,
  });
  Ok(expr::sub(&serde_json::to_string(&document)?))
}

/// Record the build id and time as stack outputs and tag every function
/// resource with the build id.
///
/// The outputs are merged like any other fragment, so an output of the same
/// name declared earlier with different content is a conflict.
pub fn annotate_build_information(
  template: &mut Template,
  build_id: &str,
  build_time: DateTime<Utc>,
) -> Result<(), TemplateError> {
  let mut fragment = Template::new();
  fragment.outputs.insert(
    OUTPUT_BUILD_TIME.to_string(),
    Output::new(
      "UTC time template was created",
      Value::String(build_time.to_rfc3339_opts(SecondsFormat::Secs, true)),
    ),
  );
  fragment.outputs.insert(
    OUTPUT_BUILD_ID.to_string(),
    Output::new("BuildID", Value::String(build_id.to_string())),
  );
  template.safe_merge(fragment)?;

  for (_, resource) in template
    .resources
    .iter_mut()
    .filter(|(_, r)| r.resource_type == FUNCTION_RESOURCE_TYPE)
  {
    resource
      .metadata
      .insert(META_BUILD_ID.to_string(), Value::String(build_id.to_string()));
  }
  Ok(())
}

/// Verify every function resource carries the discovery and log-level keys.
///
/// All offending resources are reported together.
pub fn ensure_discovery_info(template: &Template) -> Result<(), TemplateError> {
  let required = [ENV_DISCOVERY_INFO, ENV_LOG_LEVEL];
  let mut gaps = Vec::new();

  for (name, resource) in template.resources_of_type(FUNCTION_RESOURCE_TYPE) {
    let missing: Vec<String> = match resource.environment() {
      Some(vars) => required
        .iter()
        .filter(|key| !vars.contains_key(**key))
        .map(|key| key.to_string())
        .collect(),
      None => required.iter().map(|key| key.to_string()).collect(),
    };
    if !missing.is_empty() {
      gaps.push(EnvironmentGap {
        resource: name.clone(),
        missing,
      });
    }
  }

  if gaps.is_empty() {
    Ok(())
  } else {
    Err(TemplateError::IncompleteEnvironment(gaps))
  }
}
