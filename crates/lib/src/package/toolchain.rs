//! Compiler invocation that produces the function binary.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::consts::ENV_BUILD_ID;

#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{program} exited with {}:\n{stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
  CompileFailed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("compiled binary not found at {0}")]
  MissingArtifact(PathBuf),

  #[error("failed to copy {from} to {to}: {source}")]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Everything a toolchain needs to produce one binary.
#[derive(Debug, Clone)]
pub struct CompileRequest {
  pub service_name: String,
  /// Where the binary must end up.
  pub output_path: PathBuf,
  /// Build for the host instead of the deployment target.
  pub native: bool,
  pub build_id: String,
  pub build_tags: Vec<String>,
  pub link_flags: Option<String>,
  pub dry_run: bool,
}

/// Produces the deployable binary.
#[async_trait]
pub trait Toolchain: Send + Sync {
  fn name(&self) -> &str;

  async fn compile(&self, request: &CompileRequest) -> Result<PathBuf, ToolchainError>;
}

/// Target triple of the function runtime.
pub const DEFAULT_TARGET: &str = "x86_64-unknown-linux-musl";

/// Builds the binary with `cargo build --release`.
///
/// Build tags become cargo features, link flags are passed through
/// `RUSTFLAGS`, and the build id is exported as `STRATUS_BUILD_ID` so the
/// binary can embed it.
#[derive(Debug, Clone)]
pub struct CargoToolchain {
  pub program: PathBuf,
  pub manifest_path: Option<PathBuf>,
  pub bin: Option<String>,
  pub target: String,
  pub target_dir: PathBuf,
}

impl CargoToolchain {
  pub fn new(target_dir: PathBuf) -> Self {
    Self {
      program: PathBuf::from("cargo"),
      manifest_path: None,
      bin: None,
      target: DEFAULT_TARGET.to_string(),
      target_dir,
    }
  }

  pub fn with_manifest_path(mut self, path: PathBuf) -> Self {
    self.manifest_path = Some(path);
    self
  }

  pub fn with_bin(mut self, bin: impl Into<String>) -> Self {
    self.bin = Some(bin.into());
    self
  }

  fn args(&self, request: &CompileRequest) -> Vec<String> {
    let mut args = vec!["build".to_string(), "--release".to_string()];
    if let Some(manifest) = &self.manifest_path {
      args.push("--manifest-path".to_string());
      args.push(manifest.display().to_string());
    }
    if let Some(bin) = &self.bin {
      args.push("--bin".to_string());
      args.push(bin.clone());
    }
    if !request.native {
      args.push("--target".to_string());
      args.push(self.target.clone());
    }
    if !request.build_tags.is_empty() {
      args.push("--features".to_string());
      args.push(request.build_tags.join(","));
    }
    args.push("--target-dir".to_string());
    args.push(self.target_dir.display().to_string());
    args
  }

  fn artifact_path(&self, request: &CompileRequest) -> PathBuf {
    let mut dir = self.target_dir.clone();
    if !request.native {
      dir.push(&self.target);
    }
    dir.push("release");
    let name = self.bin.clone().unwrap_or_else(|| request.service_name.clone());
    dir.join(format!("{}{}", name, std::env::consts::EXE_SUFFIX))
  }
}

#[async_trait]
impl Toolchain for CargoToolchain {
  fn name(&self) -> &str {
    "cargo"
  }

  async fn compile(&self, request: &CompileRequest) -> Result<PathBuf, ToolchainError> {
    let program = self.program.display().to_string();
    let args = self.args(request);
    info!(
      service = %request.service_name,
      build_id = %request.build_id,
      native = request.native,
      dry_run = request.dry_run,
      "compiling service binary"
    );
    debug!(program = %program, args = ?args, "spawning toolchain");

    let mut command = Command::new(&self.program);
    command
      .args(&args)
      .env(ENV_BUILD_ID, &request.build_id)
      .env("CARGO_TARGET_DIR", &self.target_dir);
    if let Some(flags) = &request.link_flags {
      command.env("RUSTFLAGS", flags);
    }

    let output = command.output().await.map_err(|source| ToolchainError::Spawn {
      program: program.clone(),
      source,
    })?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      warn!(program = %program, code = ?output.status.code(), "compilation failed");
      return Err(ToolchainError::CompileFailed {
        program,
        code: output.status.code(),
        stderr,
      });
    }

    let artifact = self.artifact_path(request);
    if !artifact.is_file() {
      return Err(ToolchainError::MissingArtifact(artifact));
    }
    copy_binary(&artifact, &request.output_path).await?;
    Ok(request.output_path.clone())
  }
}

/// Uses a binary that was built elsewhere.
#[derive(Debug, Clone)]
pub struct PrebuiltToolchain {
  pub binary: PathBuf,
}

impl PrebuiltToolchain {
  pub fn new(binary: impl Into<PathBuf>) -> Self {
    Self { binary: binary.into() }
  }
}

#[async_trait]
impl Toolchain for PrebuiltToolchain {
  fn name(&self) -> &str {
    "prebuilt"
  }

  async fn compile(&self, request: &CompileRequest) -> Result<PathBuf, ToolchainError> {
    if !self.binary.is_file() {
      return Err(ToolchainError::MissingArtifact(self.binary.clone()));
    }
    info!(binary = %self.binary.display(), service = %request.service_name, "using prebuilt binary");
    copy_binary(&self.binary, &request.output_path).await?;
    Ok(request.output_path.clone())
  }
}

async fn copy_binary(from: &Path, to: &Path) -> Result<(), ToolchainError> {
  let copy_err = |source| ToolchainError::Copy {
    from: from.to_path_buf(),
    to: to.to_path_buf(),
    source,
  };
  if let Some(parent) = to.parent() {
    tokio::fs::create_dir_all(parent).await.map_err(copy_err)?;
  }
  tokio::fs::copy(from, to).await.map_err(copy_err)?;
  Ok(())
}
