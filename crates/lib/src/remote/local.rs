//! Filesystem-backed stack registry and a static identity provider.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/stacks/
//! └── <stack-name>.json   # StackRecord: last request + description
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::platform::paths::stacks_dir;
use crate::template::{Template, expr};
use crate::util::hash::hash_bytes;

use super::{IdentityApi, RemoteError, StackApi, StackDescription, StackOutput, StackRequest, StackStatus};

#[derive(Debug, Error)]
pub enum StackStoreError {
  #[error("failed to create stack directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read stack record: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write stack record: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse stack record: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize stack record: {0}")]
  Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StackRecord {
  description: StackDescription,
  request: StackRequest,
}

/// A stack API that keeps one JSON record per stack on disk.
///
/// Applying a request validates the template's references, resolves
/// parameters and outputs, and atomically replaces the record.
#[derive(Debug, Clone)]
pub struct LocalStackStore {
  base_path: PathBuf,
  region: String,
  account_id: String,
}

impl LocalStackStore {
  pub fn new(base_path: PathBuf, region: impl Into<String>, account_id: impl Into<String>) -> Self {
    Self {
      base_path,
      region: region.into(),
      account_id: account_id.into(),
    }
  }

  /// Store at `{data_dir}/stacks`.
  pub fn default_store(region: &str, account_id: &str) -> Self {
    Self::new(stacks_dir(), region, account_id)
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  fn record_path(&self, name: &str) -> PathBuf {
    self.base_path.join(format!("{}.json", name))
  }

  fn load(&self, name: &str) -> Result<Option<StackRecord>, StackStoreError> {
    let content = match fs::read_to_string(self.record_path(name)) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StackStoreError::Read(e)),
    };
    let record = serde_json::from_str(&content).map_err(StackStoreError::Parse)?;
    Ok(Some(record))
  }

  /// Write to a temp file, then rename over the record.
  fn save(&self, name: &str, record: &StackRecord) -> Result<(), StackStoreError> {
    fs::create_dir_all(&self.base_path).map_err(StackStoreError::CreateDir)?;
    let content = serde_json::to_string_pretty(record).map_err(StackStoreError::Serialize)?;
    let mut file = NamedTempFile::new_in(&self.base_path).map_err(StackStoreError::Write)?;
    file.write_all(content.as_bytes()).map_err(StackStoreError::Write)?;
    file
      .persist(self.record_path(name))
      .map_err(|e| StackStoreError::Write(e.error))?;
    debug!(stack = %name, "saved stack record");
    Ok(())
  }

  fn resolver<'a>(&'a self, stack_name: &'a str, stack_id: &'a str, parameters: &'a BTreeMap<String, String>) -> Resolver<'a> {
    Resolver {
      region: &self.region,
      account_id: &self.account_id,
      stack_name,
      stack_id,
      parameters,
    }
  }
}

#[async_trait]
impl StackApi for LocalStackStore {
  async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>, RemoteError> {
    Ok(self.load(name)?.map(|record| record.description))
  }

  async fn last_request(&self, name: &str) -> Result<Option<StackRequest>, RemoteError> {
    Ok(self.load(name)?.map(|record| record.request))
  }

  async fn apply_stack(&self, request: StackRequest) -> Result<StackDescription, RemoteError> {
    validate_stack_name(&request.stack_name)?;
    validate_references(&request.template)?;
    let parameters = resolve_parameters(&request)?;

    let existing = self.load(&request.stack_name)?;
    let now = Utc::now();
    let (stack_id, created_at, status, updated_at) = match &existing {
      Some(record) => (
        record.description.stack_id.clone(),
        record.description.created_at,
        StackStatus::UpdateComplete,
        Some(now),
      ),
      None => {
        let suffix = hash_bytes(format!("{}{}", request.stack_name, now.timestamp_nanos_opt().unwrap_or_default()).as_bytes());
        let stack_id = format!(
          "arn:aws:cloudformation:{}:{}:stack/{}/{}",
          self.region,
          self.account_id,
          request.stack_name,
          &suffix.0[..12]
        );
        (stack_id, now, StackStatus::CreateComplete, None)
      }
    };

    let resolver = self.resolver(&request.stack_name, &stack_id, &parameters);
    let outputs = request
      .template
      .outputs
      .iter()
      .map(|(key, output)| StackOutput {
        key: key.clone(),
        value: resolver.resolve(&output.value),
        export_name: output.export.as_ref().map(|export| resolver.resolve(export)),
      })
      .collect();

    let description = StackDescription {
      stack_id,
      stack_name: request.stack_name.clone(),
      description: request.template.description.clone(),
      status,
      status_reason: None,
      created_at,
      updated_at,
      parameters,
      tags: request.tags.clone(),
      outputs,
    };

    info!(
      stack = %request.stack_name,
      status = %description.status,
      resources = request.template.resources.len(),
      "applied stack"
    );
    let name = request.stack_name.clone();
    self.save(
      &name,
      &StackRecord {
        description: description.clone(),
        request,
      },
    )?;
    Ok(description)
  }

  async fn delete_stack(&self, name: &str) -> Result<bool, RemoteError> {
    match fs::remove_file(self.record_path(name)) {
      Ok(()) => {
        info!(stack = %name, "deleted stack");
        Ok(true)
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(StackStoreError::Write(e).into()),
    }
  }
}

fn validate_stack_name(name: &str) -> Result<(), RemoteError> {
  let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    && name.len() <= 128;
  if !valid {
    return Err(RemoteError::Rejected(format!("invalid stack name: {name:?}")));
  }
  Ok(())
}

/// Every `DependsOn`, `Ref` and `Fn::GetAtt` target must be declared.
fn validate_references(template: &Template) -> Result<(), RemoteError> {
  let declared: BTreeSet<&str> = template
    .resources
    .keys()
    .chain(template.parameters.keys())
    .map(String::as_str)
    .collect();

  let mut problems = Vec::new();
  for (name, resource) in &template.resources {
    for dependency in &resource.depends_on {
      if !template.resources.contains_key(dependency) {
        problems.push(format!("{name} depends on undeclared {dependency}"));
      }
    }
    for target in expr::referenced_names(&resource.properties) {
      if !declared.contains(target.as_str()) {
        problems.push(format!("{name} references undeclared {target}"));
      }
    }
  }
  for (name, output) in &template.outputs {
    for target in expr::referenced_names(&output.value) {
      if !declared.contains(target.as_str()) {
        problems.push(format!("output {name} references undeclared {target}"));
      }
    }
  }

  if problems.is_empty() {
    Ok(())
  } else {
    Err(RemoteError::Rejected(problems.join("; ")))
  }
}

/// Template defaults overlaid with the request's values.
fn resolve_parameters(request: &StackRequest) -> Result<BTreeMap<String, String>, RemoteError> {
  let mut resolved = BTreeMap::new();
  let mut missing = Vec::new();
  for (name, parameter) in &request.template.parameters {
    match request.parameters.get(name).or(parameter.default.as_ref()) {
      Some(value) => {
        resolved.insert(name.clone(), value.clone());
      }
      None if parameter.min_length.unwrap_or(0) > 0 => missing.push(name.clone()),
      None => {
        resolved.insert(name.clone(), String::new());
      }
    }
  }
  if !missing.is_empty() {
    return Err(RemoteError::Rejected(format!(
      "missing values for parameters: {}",
      missing.join(", ")
    )));
  }
  Ok(resolved)
}

/// Evaluates intrinsic expressions the way the stack API would.
struct Resolver<'a> {
  region: &'a str,
  account_id: &'a str,
  stack_name: &'a str,
  stack_id: &'a str,
  parameters: &'a BTreeMap<String, String>,
}

impl Resolver<'_> {
  fn resolve(&self, value: &Value) -> String {
    match value {
      Value::String(text) => text.clone(),
      Value::Null => String::new(),
      Value::Bool(_) | Value::Number(_) => value.to_string(),
      Value::Object(map) if map.len() == 1 => {
        if let Some(Value::String(name)) = map.get("Ref") {
          return self.reference(name);
        }
        if let Some(Value::Array(args)) = map.get("Fn::GetAtt")
          && let [Value::String(name), Value::String(attribute)] = args.as_slice()
        {
          return self.attribute(name, attribute);
        }
        if let Some(Value::String(body)) = map.get("Fn::Sub") {
          return self.substitute(body);
        }
        if let Some(Value::Array(args)) = map.get("Fn::Join")
          && let [Value::String(delimiter), Value::Array(parts)] = args.as_slice()
        {
          return parts
            .iter()
            .map(|part| self.resolve(part))
            .collect::<Vec<_>>()
            .join(delimiter);
        }
        value.to_string()
      }
      other => other.to_string(),
    }
  }

  fn reference(&self, name: &str) -> String {
    match name {
      "AWS::Region" => self.region.to_string(),
      "AWS::AccountId" => self.account_id.to_string(),
      "AWS::StackName" => self.stack_name.to_string(),
      "AWS::StackId" => self.stack_id.to_string(),
      "AWS::Partition" => "aws".to_string(),
      _ => match self.parameters.get(name) {
        Some(value) => value.clone(),
        None => format!("{}-{}", self.stack_name, name),
      },
    }
  }

  fn attribute(&self, name: &str, attribute: &str) -> String {
    if attribute == "Arn" {
      format!("arn:aws:local:{}:{}:{}/{}", self.region, self.account_id, self.stack_name, name)
    } else {
      format!("{}-{}.{}", self.stack_name, name, attribute)
    }
  }

  fn substitute(&self, body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find("${") {
      out.push_str(&rest[..start]);
      let after = &rest[start + 2..];
      let Some(end) = after.find('}') else {
        out.push_str(&rest[start..]);
        return out;
      };
      let inner = &after[..end];
      if let Some(literal) = inner.strip_prefix('!') {
        out.push_str("${");
        out.push_str(literal);
        out.push('}');
      } else if let Some((name, attribute)) = inner.split_once('.')
        && !name.starts_with("AWS::")
      {
        out.push_str(&self.attribute(name, attribute));
      } else {
        out.push_str(&self.reference(inner));
      }
      rest = &after[end + 1..];
    }
    out.push_str(rest);
    debug!(len = out.len(), "resolved substitution");
    out
  }
}

/// An identity provider with a fixed account and a known set of roles.
///
/// Counts lookups so callers can observe how often the remote API was hit.
#[derive(Debug, Default)]
pub struct StaticIdentity {
  account_id: String,
  roles: BTreeMap<String, String>,
  lookups: AtomicUsize,
}

impl StaticIdentity {
  pub fn new(account_id: impl Into<String>) -> Self {
    Self {
      account_id: account_id.into(),
      ..Self::default()
    }
  }

  /// Register a role by name. Lookups by name or by its ARN succeed.
  pub fn with_role(mut self, name: &str) -> Self {
    let arn = if name.starts_with("arn:") {
      name.to_string()
    } else {
      format!("arn:aws:iam::{}:role/{}", self.account_id, name)
    };
    self.roles.insert(name.to_string(), arn.clone());
    self.roles.insert(arn.clone(), arn);
    self
  }

  pub fn account_id(&self) -> &str {
    &self.account_id
  }

  /// Number of `get_role` calls so far.
  pub fn lookups(&self) -> usize {
    self.lookups.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl IdentityApi for StaticIdentity {
  async fn get_role(&self, name: &str) -> Result<String, RemoteError> {
    self.lookups.fetch_add(1, Ordering::SeqCst);
    debug!(role = %name, "looking up role");
    self
      .roles
      .get(name)
      .cloned()
      .ok_or_else(|| RemoteError::not_found("role", name))
  }

  async fn caller_account(&self) -> Result<String, RemoteError> {
    Ok(self.account_id.clone())
  }
}
