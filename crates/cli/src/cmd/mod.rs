//! Subcommands and the manifest plumbing they share.

mod build;
mod delete;
mod describe;
mod provision;
mod status;

pub use build::cmd_build;
pub use delete::cmd_delete;
pub use describe::cmd_describe;
pub use provision::cmd_provision;
pub use status::cmd_status;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, warn};

use stratus_lib::execute::{CancellationToken, WorkflowContext, WorkflowError};
use stratus_lib::package::{CargoToolchain, PrebuiltToolchain, Toolchain};
use stratus_lib::provision::{BuildOptions, Provisioner};
use stratus_lib::remote::{LocalStackStore, Session, StaticIdentity};
use stratus_lib::service::BucketSiteExporter;
use stratus_lib::service::manifest::{DEFAULT_MANIFEST, ServiceManifest};

/// Flags shared by every command that runs the build.
#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Path to the service manifest
  #[arg(short, long, default_value = DEFAULT_MANIFEST)]
  pub manifest: PathBuf,

  /// Where archives and the template are written
  #[arg(long)]
  pub output_dir: Option<PathBuf>,

  /// Cargo features to enable, comma separated
  #[arg(long, value_delimiter = ',')]
  pub build_tags: Vec<String>,

  /// Build for the host instead of the function runtime target
  #[arg(long)]
  pub native: bool,

  /// Compile and assemble, but do not apply the stack
  #[arg(long)]
  pub dry_run: bool,

  /// Pipeline environment whose values become stack parameters
  #[arg(long)]
  pub environment: Option<String>,

  /// Function log level from the global `--level`/`--verbose` flags.
  #[arg(skip)]
  pub log_level: Option<String>,
}

impl BuildArgs {
  pub fn with_log_level(mut self, level: Option<String>) -> Self {
    self.log_level = level;
    self
  }
}

pub(crate) fn load_manifest(path: &Path) -> Result<ServiceManifest> {
  let path = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
  ServiceManifest::load(&path).context("Failed to load service manifest")
}

/// Offline session: known roles from the manifest, stacks under the data dir.
pub(crate) fn session_for(manifest: &ServiceManifest) -> Session {
  let identity = manifest
    .known_roles
    .iter()
    .fold(StaticIdentity::new(manifest.account_id()), |identity, role| {
      identity.with_role(role)
    });
  let stacks = LocalStackStore::default_store(manifest.region(), manifest.account_id());
  debug!(stacks = %stacks.base_path().display(), "using local stack registry");
  Session::new(manifest.region(), Arc::new(identity), Arc::new(stacks))
}

fn toolchain_for(manifest: &ServiceManifest) -> Arc<dyn Toolchain> {
  if let Some(binary) = &manifest.binary {
    return Arc::new(PrebuiltToolchain::new(binary.clone()));
  }
  let mut cargo = CargoToolchain::new(manifest.base_dir().join("target"));
  if let Some(path) = &manifest.cargo.manifest_path {
    cargo = cargo.with_manifest_path(path.clone());
  }
  if let Some(bin) = &manifest.cargo.bin {
    cargo = cargo.with_bin(bin.clone());
  }
  if let Some(target) = &manifest.cargo.target {
    cargo.target = target.clone();
  }
  Arc::new(cargo)
}

/// Manifest values first, then command line overrides.
fn options_for(manifest: &ServiceManifest, bucket: Option<String>, args: &BuildArgs) -> BuildOptions {
  let bucket = bucket
    .or_else(|| manifest.bucket.clone())
    .unwrap_or_else(|| format!("{}-artifacts", manifest.service.name));
  let output_dir = args
    .output_dir
    .clone()
    .unwrap_or_else(|| manifest.base_dir().join("target").join("stratus"));

  let mut options = BuildOptions::new(bucket, output_dir);
  options.native = args.native;
  options.dry_run = args.dry_run;
  options.build_tags = if args.build_tags.is_empty() {
    manifest.build_tags.clone()
  } else {
    args.build_tags.clone()
  };
  options.link_flags = manifest.link_flags.clone();
  options.environment = args.environment.clone().or_else(|| manifest.environment.clone());
  if let Some(level) = manifest.log_level.clone().or_else(|| args.log_level.clone()) {
    options.log_level = level;
  }
  options
}

pub(crate) fn provisioner_for(manifest: &ServiceManifest, bucket: Option<String>, args: &BuildArgs) -> Provisioner {
  let options = options_for(manifest, bucket, args);
  let mut provisioner = Provisioner::new(
    manifest.service.clone(),
    options,
    session_for(manifest),
    toolchain_for(manifest),
  );
  if manifest.service.site.is_some() {
    provisioner = provisioner.with_site_exporter(Arc::new(BucketSiteExporter));
  }
  provisioner
}

/// Run a workflow on a fresh runtime; Ctrl-C cancels it between operations.
pub(crate) fn run_workflow<T, F, Fut>(work: F) -> Result<T>
where
  F: FnOnce(WorkflowContext) -> Fut,
  Fut: Future<Output = Result<T, WorkflowError>>,
{
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let token = CancellationToken::new();
  let ctx = WorkflowContext::with_token(token.clone());

  let result = rt.block_on(async move {
    let watcher = tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, stopping after the current operation");
        token.cancel("interrupted");
      }
    });
    let result = work(ctx).await;
    watcher.abort();
    result
  });
  Ok(result?)
}
