//! The `stratus.yaml` service manifest.
//!
//! ```yaml
//! name: orders
//! description: Order processing
//! account_id: "123456789012"
//! region: us-east-1
//! bucket: orders-artifacts
//! known_roles: [orders-legacy]
//! functions:
//!   - handler: orders::api::create
//!     role:
//!       privileges:
//!         - actions: ["dynamodb:PutItem"]
//!   - handler: orders::api::list
//!     role: orders-legacy
//! pipeline_environments:
//!   dev: { STAGE: dev }
//!   prod: { STAGE: prod }
//! ```
//!
//! JSON manifests are accepted as well. Relative paths are resolved against
//! the manifest's directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::ServiceDefinition;

pub const DEFAULT_MANIFEST: &str = "stratus.yaml";

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_ACCOUNT_ID: &str = "000000000000";

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {}: {source}", path.display())]
  Read { path: PathBuf, source: std::io::Error },

  #[error("failed to parse manifest {}: {source}", path.display())]
  Parse { path: PathBuf, source: serde_yaml::Error },

  #[error("invalid manifest {}: {message}", path.display())]
  Invalid { path: PathBuf, message: String },
}

/// Settings for building the binary with cargo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CargoSettings {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub manifest_path: Option<PathBuf>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bin: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,
}

/// A parsed manifest: the service plus deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceManifest {
  #[serde(flatten)]
  pub service: ServiceDefinition,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub account_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub region: Option<String>,
  /// Artifact bucket; the CLI flag takes precedence.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bucket: Option<String>,
  /// Pre-existing roles known to the offline identity provider.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub known_roles: Vec<String>,
  /// Use this binary instead of compiling.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub binary: Option<PathBuf>,
  #[serde(default)]
  pub cargo: CargoSettings,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub build_tags: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub link_flags: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub log_level: Option<String>,
  /// Pipeline environment whose values are supplied at provision time.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub environment: Option<String>,

  #[serde(skip)]
  base_dir: PathBuf,
}

impl ServiceManifest {
  /// Read and validate a manifest.
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let base_dir = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));
    let base_dir = dunce::canonicalize(&base_dir).unwrap_or(base_dir);

    let mut manifest = Self::parse(&content).map_err(|source| ManifestError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    manifest.base_dir = base_dir;
    manifest.resolve_paths();
    manifest.validate().map_err(|message| ManifestError::Invalid {
      path: path.to_path_buf(),
      message,
    })?;

    debug!(
      path = %path.display(),
      service = %manifest.service.name,
      functions = manifest.service.functions.len(),
      "loaded manifest"
    );
    Ok(manifest)
  }

  /// Parse without touching the file system.
  pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(content)
  }

  pub fn base_dir(&self) -> &Path {
    &self.base_dir
  }

  pub fn region(&self) -> &str {
    self.region.as_deref().unwrap_or(DEFAULT_REGION)
  }

  pub fn account_id(&self) -> &str {
    self.account_id.as_deref().unwrap_or(DEFAULT_ACCOUNT_ID)
  }

  fn resolve_paths(&mut self) {
    let base = self.base_dir.clone();
    let absolute = |path: &mut PathBuf| {
      if path.is_relative() {
        *path = base.join(&*path);
      }
    };
    if let Some(site) = &mut self.service.site {
      absolute(&mut site.resources);
    }
    if let Some(binary) = &mut self.binary {
      absolute(binary);
    }
    if let Some(manifest_path) = &mut self.cargo.manifest_path {
      absolute(manifest_path);
    }
  }

  fn validate(&self) -> Result<(), String> {
    let name = &self.service.name;
    if name.is_empty() {
      return Err("service name is empty".to_string());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
      return Err(format!("service name `{name}` may only contain alphanumerics and hyphens"));
    }
    if let Some(environment) = &self.environment
      && !self.service.pipeline_environments.contains_key(environment)
    {
      return Err(format!("unknown pipeline environment `{environment}`"));
    }
    Ok(())
  }
}
