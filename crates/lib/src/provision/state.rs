//! Shared state of one build.

use std::path::PathBuf;
use std::sync::Arc;

use crate::execute::{PipelineState, WorkflowError};
use crate::hooks::{HookArgs, HookContext, HookRegistration, WorkflowHooks, call_rollback_hooks};
use crate::package::{CodeLocation, Toolchain};
use crate::remote::{Session, StackDescription, StackRequest};
use crate::service::{FunctionDefinition, GatewayExporter, ProfileDecorator, RoleMap, ServiceDefinition, SiteExporter};
use crate::template::Template;
use crate::util::hash::ContentHash;

/// Build settings supplied by the caller.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  pub build_id: String,
  /// Bucket the archives are uploaded to.
  pub bucket: String,
  pub output_dir: PathBuf,
  /// Compile for the host instead of the function runtime.
  pub native: bool,
  pub build_tags: Vec<String>,
  pub link_flags: Option<String>,
  pub dry_run: bool,
  pub log_level: String,
  /// Pipeline environment supplying parameter values at provision time.
  /// Defaults to the first environment.
  pub environment: Option<String>,
}

/// Optional contributors to the template.
#[derive(Clone, Default)]
pub struct Extensions {
  pub profile_decorator: Option<HookRegistration<dyn ProfileDecorator>>,
  pub gateway: Option<Arc<dyn GatewayExporter>>,
  pub site: Option<Arc<dyn SiteExporter>>,
}

impl std::fmt::Debug for Extensions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Extensions")
      .field("profile_decorator", &self.profile_decorator)
      .field("gateway", &self.gateway.as_ref().map(|g| g.name().to_string()))
      .field("site", &self.site.as_ref().map(|s| s.name().to_string()))
      .finish()
  }
}

/// Inputs fixed for the whole run.
pub struct BuildInputs {
  pub service: ServiceDefinition,
  pub options: BuildOptions,
  pub session: Session,
  pub toolchain: Arc<dyn Toolchain>,
  pub hooks: WorkflowHooks,
  pub extensions: Extensions,
  pub code: CodeLocation,
}

impl BuildInputs {
  pub fn hook_args(&self) -> HookArgs<'_> {
    HookArgs {
      service_name: &self.service.name,
      build_id: &self.options.build_id,
      code: &self.code,
      session: &self.session,
      dry_run: self.options.dry_run,
    }
  }

  /// Stack name of the service.
  pub fn stack_name(&self) -> &str {
    &self.service.name
  }
}

/// Files produced by the packaging and template steps.
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
  pub binary: Option<PathBuf>,
  pub code_archive: Option<PathBuf>,
  pub code_sha256: Option<ContentHash>,
  pub site_archive: Option<PathBuf>,
  pub template_path: Option<PathBuf>,
}

impl Artifacts {
  /// File name of an archive, used as its object key.
  pub fn key_of(path: &Option<PathBuf>) -> String {
    path
      .as_ref()
      .and_then(|p| p.file_name())
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default()
  }
}

/// Values accumulated while the pipeline runs.
#[derive(Debug, Default)]
pub struct BuildOutputs {
  /// Function definitions after profile decoration.
  pub functions: Vec<FunctionDefinition>,
  pub roles: RoleMap,
  pub template: Template,
  /// Replaced by every hook's return value.
  pub context: HookContext,
  pub artifacts: Artifacts,
  /// Request the stack was applied with before this run. `Some(None)` when
  /// the stack did not exist.
  pub previous_request: Option<Option<StackRequest>>,
  pub stack: Option<StackDescription>,
}

/// The single mutable state threaded through every operation.
pub struct BuildState {
  pub inputs: BuildInputs,
  pub outputs: BuildOutputs,
}

impl BuildState {
  pub fn new(inputs: BuildInputs, context: HookContext) -> Self {
    Self {
      inputs,
      outputs: BuildOutputs {
        context,
        ..BuildOutputs::default()
      },
    }
  }
}

impl PipelineState for BuildState {
  fn run_rollback_hooks(&mut self) -> Vec<WorkflowError> {
    let args = self.inputs.hook_args();
    call_rollback_hooks(&self.inputs.hooks.rollbacks, &mut self.outputs.context, &args)
  }
}
