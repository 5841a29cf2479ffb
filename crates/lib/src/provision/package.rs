//! Compile the binary and write the deployable archives.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::consts::{
  BINARY_NAME, META_CODE_ARCHIVE_PATH, META_CODE_ARCHIVE_SHA256, META_S3_BUCKET, META_SERVICE_NAME,
  META_SITE_ARCHIVE_PATH, PARAM_SITE_ARCHIVE_KEY, PARAM_SITE_ARCHIVE_VERSION,
};
use crate::execute::{Operation, WorkflowContext, WorkflowError};
use crate::hooks::{HookPhase, call_archive_hooks, call_workflow_hooks};
use crate::package::{CodeArchive, CompileRequest};
use crate::template::Parameter;

use super::state::{Artifacts, BuildState};

/// Builds the binary and the code archive, plus the site archive when a
/// site is configured.
///
/// Archives written by a failed invocation are removed before the error is
/// returned; rollback removes the archives of a successful one.
pub struct CreatePackageOp;

#[async_trait]
impl Operation<BuildState> for CreatePackageOp {
  async fn invoke(&self, ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
    match package(ctx, state).await {
      Ok(()) => Ok(()),
      Err(err) => {
        for (path, err) in remove_archives(&mut state.outputs.artifacts) {
          warn!(path = %path.display(), error = %err, "failed to remove partial archive");
        }
        Err(err)
      }
    }
  }

  async fn rollback(&self, _ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
    let mut failures: Vec<WorkflowError> = remove_archives(&mut state.outputs.artifacts)
      .into_iter()
      .map(|(path, source)| WorkflowError::io(format!("removing {}", path.display()), source))
      .collect();
    match failures.len() {
      0 => Ok(()),
      1 => Err(failures.remove(0)),
      _ => Err(WorkflowError::Multiple(failures)),
    }
  }
}

async fn package(ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
  let inputs = &state.inputs;
  let outputs = &mut state.outputs;
  let options = &inputs.options;
  let service = &inputs.service;
  let args = inputs.hook_args();

  tokio::fs::create_dir_all(&options.output_dir)
    .await
    .map_err(|source| WorkflowError::io(format!("creating {}", options.output_dir.display()), source))?;

  call_workflow_hooks(HookPhase::PreBuild, &inputs.hooks.pre_builds, &mut outputs.context, &args)?;

  let request = CompileRequest {
    service_name: service.name.clone(),
    output_path: options.output_dir.join(BINARY_NAME),
    native: options.native,
    build_id: options.build_id.clone(),
    build_tags: options.build_tags.clone(),
    link_flags: options.link_flags.clone(),
    dry_run: options.dry_run,
  };
  let binary = inputs.toolchain.compile(&request).await?;
  info!(toolchain = %inputs.toolchain.name(), binary = %binary.display(), "binary ready");
  outputs.artifacts.binary = Some(binary.clone());
  ctx.ensure_active()?;

  if let Some(site) = &service.site {
    let path = options.output_dir.join(format!("{}-site.zip", service.name));
    outputs.artifacts.site_archive = Some(path.clone());
    let mut archive = CodeArchive::create(&path)?;
    let added = archive.add_directory_tree(&site.resources, "")?;
    archive.finish()?;
    info!(path = %path.display(), files = added, "site archive written");

    let key = Artifacts::key_of(&outputs.artifacts.site_archive);
    let template = &mut outputs.template;
    template.parameters.insert(
      PARAM_SITE_ARCHIVE_KEY.to_string(),
      Parameter::string("Object key of the site archive", &key, ".+", 3),
    );
    template.parameters.insert(
      PARAM_SITE_ARCHIVE_VERSION.to_string(),
      Parameter::string("Object version of the site archive", "", "", 0),
    );
    template
      .metadata
      .insert(META_SITE_ARCHIVE_PATH.to_string(), path_value(&path));
  }

  call_workflow_hooks(HookPhase::PostBuild, &inputs.hooks.post_builds, &mut outputs.context, &args)?;

  let sanitized: String = service.name.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
  let path = options.output_dir.join(format!("{sanitized}-code.zip"));
  outputs.artifacts.code_archive = Some(path.clone());
  {
    let metadata = &mut outputs.template.metadata;
    metadata.insert(META_CODE_ARCHIVE_PATH.to_string(), path_value(&path));
    metadata.insert(META_SERVICE_NAME.to_string(), Value::String(service.name.clone()));
    metadata.insert(META_S3_BUCKET.to_string(), Value::String(options.bucket.clone()));
  }

  let mut archive = CodeArchive::create(&path)?;
  call_archive_hooks(&inputs.hooks.archives, &mut outputs.context, &args, &mut archive)?;
  archive.add_executable(BINARY_NAME, &binary)?;
  let (path, digest) = archive.finish()?;
  outputs
    .template
    .metadata
    .insert(META_CODE_ARCHIVE_SHA256.to_string(), Value::String(digest.to_string()));
  outputs.artifacts.code_sha256 = Some(digest);
  info!(path = %path.display(), "code archive written");
  Ok(())
}

fn path_value(path: &Path) -> Value {
  Value::String(path.display().to_string())
}

/// Delete the archives recorded in `artifacts`, returning the failures.
fn remove_archives(artifacts: &mut Artifacts) -> Vec<(PathBuf, io::Error)> {
  let mut failures = Vec::new();
  for slot in [&mut artifacts.code_archive, &mut artifacts.site_archive] {
    let Some(path) = slot.take() else {
      continue;
    };
    match std::fs::remove_file(&path) {
      Ok(()) => info!(path = %path.display(), "removed archive"),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => failures.push((path, e)),
    }
  }
  artifacts.code_sha256 = None;
  failures
}
