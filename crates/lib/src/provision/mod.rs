//! The build and provision workflows.
//!
//! [`Provisioner::build`] runs four stages against one [`BuildState`]:
//!
//! 1. `validate`: pipeline environment consistency, service preconditions
//! 2. `roles`: profile decoration and role resolution
//! 3. `package`: binary, site archive and code archive
//! 4. `template`: template assembly, annotation and validation
//!
//! [`Provisioner::provision`] appends a `provision` stage that applies the
//! template to the stack API and verifies the result. The first failure
//! rolls back every completed operation in reverse order, then the rollback
//! hooks run.

mod assemble;
mod package;
mod roles;
mod stack;
mod state;
mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::consts::{
  BINARY_NAME, CONTEXT_KEY_BUILD_BINARY_NAME, CONTEXT_KEY_BUILD_ID, CONTEXT_KEY_BUILD_OUTPUT_DIR, ENV_BUILD_ID,
};
use crate::execute::{Pipeline, PipelineReport, Stage, WorkflowContext, WorkflowError};
use crate::hooks::{HookArgs, HookContext, HookRegistration, HookResult, WorkflowHooks};
use crate::package::{CodeLocation, Toolchain};
use crate::remote::{RemoteError, Session, StackDescription};
use crate::service::{FunctionDefinition, GatewayExporter, ServiceDefinition, SiteExporter};
use crate::template::Template;

pub use assemble::CreateTemplateOp;
pub use package::CreatePackageOp;
pub use roles::ResolveRolesOp;
pub use stack::{ApplyStackOp, VerifyStackOp, stack_request};
pub use state::{Artifacts, BuildInputs, BuildOptions, BuildOutputs, BuildState, Extensions};
pub use validate::{ValidatePreconditionsOp, VerifyEnvironmentsOp, check_service};

/// Build id from `STRATUS_BUILD_ID`, otherwise the current UTC time.
pub fn default_build_id() -> String {
  std::env::var(ENV_BUILD_ID)
    .ok()
    .filter(|id| !id.trim().is_empty())
    .unwrap_or_else(|| Utc::now().format("%Y%m%d%H%M%S").to_string())
}

impl BuildOptions {
  pub fn new(bucket: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
    Self {
      build_id: default_build_id(),
      bucket: bucket.into(),
      output_dir: output_dir.into(),
      native: false,
      build_tags: Vec::new(),
      link_flags: None,
      dry_run: false,
      log_level: "info".to_string(),
      environment: None,
    }
  }
}

/// What a successful run produced.
#[derive(Debug)]
pub struct BuildOutcome {
  pub report: PipelineReport,
  pub template: Template,
  pub artifacts: Artifacts,
  pub context: HookContext,
  /// Set when the stack was applied.
  pub stack: Option<StackDescription>,
}

/// Entry point for building and provisioning one service.
pub struct Provisioner {
  service: ServiceDefinition,
  options: BuildOptions,
  session: Session,
  toolchain: Arc<dyn Toolchain>,
  hooks: WorkflowHooks,
  extensions: Extensions,
}

impl Provisioner {
  pub fn new(service: ServiceDefinition, options: BuildOptions, session: Session, toolchain: Arc<dyn Toolchain>) -> Self {
    Self {
      service,
      options,
      session,
      toolchain,
      hooks: WorkflowHooks::default(),
      extensions: Extensions::default(),
    }
  }

  pub fn with_hooks(mut self, hooks: WorkflowHooks) -> Self {
    self.hooks = hooks;
    self
  }

  pub fn with_profile_decorator<F>(mut self, name: impl Into<String>, decorator: F) -> Self
  where
    F: Fn(HookContext, &HookArgs<'_>, &mut FunctionDefinition) -> HookResult + Send + Sync + 'static,
  {
    self.extensions.profile_decorator = Some(HookRegistration::new(name, Arc::new(decorator)));
    self
  }

  pub fn with_gateway(mut self, gateway: Arc<dyn GatewayExporter>) -> Self {
    self.extensions.gateway = Some(gateway);
    self
  }

  pub fn with_site_exporter(mut self, exporter: Arc<dyn SiteExporter>) -> Self {
    self.extensions.site = Some(exporter);
    self
  }

  /// The stages shared by build and provision.
  pub fn build_pipeline() -> Pipeline<BuildState> {
    Pipeline::new("build")
      .with(
        "validate",
        Stage::new()
          .with("verify-environments", VerifyEnvironmentsOp)
          .with("validate-preconditions", ValidatePreconditionsOp),
      )
      .with("roles", Stage::new().with("resolve-roles", ResolveRolesOp))
      .with("package", Stage::new().with("create-package", CreatePackageOp))
      .with("template", Stage::new().with("create-template", CreateTemplateOp))
  }

  pub fn provision_pipeline() -> Pipeline<BuildState> {
    let mut pipeline = Self::build_pipeline();
    pipeline.append(
      "provision",
      Stage::new()
        .with("apply-stack", ApplyStackOp)
        .with("verify-stack", VerifyStackOp),
    );
    pipeline
  }

  /// Build the artifacts and template without touching the stack.
  pub async fn build(self, ctx: &WorkflowContext) -> Result<BuildOutcome, WorkflowError> {
    self.run(Self::build_pipeline(), ctx).await
  }

  /// Build, then apply the template to the stack API.
  pub async fn provision(self, ctx: &WorkflowContext) -> Result<BuildOutcome, WorkflowError> {
    self.run(Self::provision_pipeline(), ctx).await
  }

  async fn run(self, pipeline: Pipeline<BuildState>, ctx: &WorkflowContext) -> Result<BuildOutcome, WorkflowError> {
    info!(
      service = %self.service.name,
      build_id = %self.options.build_id,
      dry_run = self.options.dry_run,
      pipeline = %pipeline.name(),
      "starting workflow"
    );
    let mut state = self.into_state();
    let report = pipeline.run(ctx, &mut state).await?;
    let outputs = state.outputs;
    Ok(BuildOutcome {
      report,
      template: outputs.template,
      artifacts: outputs.artifacts,
      context: outputs.context,
      stack: outputs.stack,
    })
  }

  fn into_state(self) -> BuildState {
    let context = self
      .hooks
      .context
      .clone()
      .with_value(CONTEXT_KEY_BUILD_ID, self.options.build_id.clone())
      .with_value(
        CONTEXT_KEY_BUILD_OUTPUT_DIR,
        Value::String(self.options.output_dir.display().to_string()),
      )
      .with_value(CONTEXT_KEY_BUILD_BINARY_NAME, BINARY_NAME);
    let inputs = BuildInputs {
      service: self.service,
      options: self.options,
      session: self.session,
      toolchain: self.toolchain,
      hooks: self.hooks,
      extensions: self.extensions,
      code: CodeLocation::from_parameters(),
    };
    BuildState::new(inputs, context)
  }
}

/// Delete the service stack. Returns whether a stack existed.
pub async fn delete(session: &Session, stack_name: &str) -> Result<bool, WorkflowError> {
  let deleted = session.delete_stack(stack_name).await?;
  if deleted {
    info!(stack = %stack_name, "stack deleted");
  } else {
    info!(stack = %stack_name, "stack does not exist");
  }
  Ok(deleted)
}

/// Describe the service stack, failing when it does not exist.
pub async fn describe_stack(session: &Session, stack_name: &str) -> Result<StackDescription, WorkflowError> {
  session
    .describe_stack(stack_name)
    .await?
    .ok_or_else(|| RemoteError::not_found("stack", stack_name).into())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consts::{ENV_DISCOVERY_INFO, ENV_LOG_LEVEL, FUNCTION_RESOURCE_TYPE, OUTPUT_BUILD_ID};
  use crate::execute::Operation;
  use crate::remote::StaticIdentity;
  use crate::util::testutil::{ACCOUNT_ID, provisioner, sample_service};
  use serial_test::serial;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  #[test]
  fn pipelines_list_their_stages() {
    assert_eq!(
      Provisioner::build_pipeline().stage_names(),
      vec!["validate", "roles", "package", "template"]
    );
    assert_eq!(Provisioner::provision_pipeline().stage_names().last(), Some(&"provision"));
  }

  #[test]
  #[serial]
  fn default_build_id_prefers_environment() {
    temp_env::with_var(ENV_BUILD_ID, Some("from-env"), || {
      assert_eq!(default_build_id(), "from-env");
    });
    temp_env::with_var(ENV_BUILD_ID, None::<&str>, || {
      let id = default_build_id();
      assert_eq!(id.len(), 14);
      assert!(id.chars().all(|c| c.is_ascii_digit()));
    });
  }

  #[tokio::test]
  async fn build_writes_archive_and_template() {
    let temp = TempDir::new().unwrap();
    let identity = Arc::new(StaticIdentity::new(ACCOUNT_ID));
    let outcome = provisioner(temp.path(), sample_service(), identity)
      .build(&WorkflowContext::new())
      .await
      .unwrap();

    let code = outcome.artifacts.code_archive.unwrap();
    assert!(code.ends_with("orders-code.zip"));
    assert!(code.is_file());
    let template_path = outcome.artifacts.template_path.unwrap();
    assert!(template_path.ends_with("orders-cftemplate.json"));

    let written: Template = serde_json::from_str(&std::fs::read_to_string(template_path).unwrap()).unwrap();
    assert_eq!(written, outcome.template);
    assert_eq!(written.outputs[OUTPUT_BUILD_ID].value, "build-1");

    let (_, function) = written.resources_of_type(FUNCTION_RESOURCE_TYPE).next().unwrap();
    let env = function.environment().unwrap();
    assert!(env.contains_key(ENV_DISCOVERY_INFO));
    assert_eq!(env[ENV_LOG_LEVEL], "info");
    assert!(outcome.stack.is_none());
  }

  #[tokio::test]
  async fn initial_context_carries_build_values() {
    let temp = TempDir::new().unwrap();
    let identity = Arc::new(StaticIdentity::new(ACCOUNT_ID));
    let hooks = WorkflowHooks::new().pre_build("capture", |ctx, _args| {
      let id = ctx.get_str(CONTEXT_KEY_BUILD_ID).unwrap_or_default().to_string();
      Ok(ctx.with_value("seen", id))
    });
    let outcome = provisioner(temp.path(), sample_service(), identity)
      .with_hooks(hooks)
      .build(&WorkflowContext::new())
      .await
      .unwrap();

    assert_eq!(outcome.context.get_str("seen"), Some("build-1"));
    assert_eq!(outcome.context.get_str(CONTEXT_KEY_BUILD_BINARY_NAME), Some(BINARY_NAME));
  }

  #[tokio::test]
  async fn failed_template_removes_archives() {
    let temp = TempDir::new().unwrap();
    let identity = Arc::new(StaticIdentity::new(ACCOUNT_ID));
    let hooks = WorkflowHooks::new().validator("reject", |_ctx, _args, _template| Err("not today".into()));
    let err = provisioner(temp.path(), sample_service(), identity)
      .with_hooks(hooks)
      .build(&WorkflowContext::new())
      .await
      .unwrap_err();

    assert!(matches!(err, WorkflowError::Aborted { ref operation, .. } if operation == "create-template"));
    assert!(err.rollback_errors().is_empty());
    assert!(!temp.path().join("out").join("orders-code.zip").exists());
    assert!(!temp.path().join("out").join("orders-cftemplate.json").exists());
  }

  #[tokio::test]
  #[traced_test]
  async fn mismatched_environments_only_warn() {
    let temp = TempDir::new().unwrap();
    let identity = Arc::new(StaticIdentity::new(ACCOUNT_ID));
    let service = sample_service()
      .with_environment("dev", [("STAGE".to_string(), "dev".to_string())].into())
      .with_environment("prod", [("REGION".to_string(), "eu".to_string())].into());
    provisioner(temp.path(), service, identity)
      .build(&WorkflowContext::new())
      .await
      .unwrap();

    assert!(logs_contain("pipeline environments do not share the same variable names"));
  }

  #[tokio::test]
  async fn profile_decorator_rewrites_functions() {
    let temp = TempDir::new().unwrap();
    let identity = Arc::new(StaticIdentity::new(ACCOUNT_ID));
    let outcome = provisioner(temp.path(), sample_service(), identity)
      .with_profile_decorator("memory", |ctx, _args, function| {
        function.options.memory_size = 512;
        Ok(ctx)
      })
      .build(&WorkflowContext::new())
      .await
      .unwrap();

    let (_, function) = outcome.template.resources_of_type(FUNCTION_RESOURCE_TYPE).next().unwrap();
    assert_eq!(function.properties["MemorySize"], 512);
  }

  #[tokio::test]
  async fn package_rollback_reports_every_failed_removal() {
    let temp = TempDir::new().unwrap();
    let identity = Arc::new(StaticIdentity::new(ACCOUNT_ID));
    let mut state = provisioner(temp.path(), sample_service(), identity).into_state();
    // Directories cannot be removed with remove_file, so both removals fail.
    let code = temp.path().join("code.zip");
    let site = temp.path().join("site.zip");
    std::fs::create_dir(&code).unwrap();
    std::fs::create_dir(&site).unwrap();
    state.outputs.artifacts.code_archive = Some(code.clone());
    state.outputs.artifacts.site_archive = Some(site.clone());

    let err = CreatePackageOp
      .rollback(&WorkflowContext::new(), &mut state)
      .await
      .unwrap_err();

    let WorkflowError::Multiple(failures) = err else {
      panic!("expected every failure, got {err:?}");
    };
    assert_eq!(failures.len(), 2);
    let text = failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n");
    assert!(text.contains(&code.display().to_string()));
    assert!(text.contains(&site.display().to_string()));
    assert!(state.outputs.artifacts.code_archive.is_none());
  }
}
