//! Template assembly: parameters, function fragments, gateway, decorators,
//! site, annotation and validation, in that order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::consts::{
  PARAM_CODE_BUCKET, PARAM_CODE_KEY, PARAM_CODE_VERSION, PARAM_SITE_ARCHIVE_KEY, PARAM_SITE_ARCHIVE_VERSION,
};
use crate::execute::{Operation, WorkflowContext, WorkflowError};
use crate::hooks::{HookPhase, call_service_decorators, call_validation_hooks, call_workflow_hooks};
use crate::package::CodeLocation;
use crate::service::ExportContext;
use crate::template::annotate::{annotate_build_information, annotate_discovery_info, ensure_discovery_info};
use crate::template::{Parameter, Template, TemplateError, expr};

use super::state::{Artifacts, BuildState};

/// Assembles the service template and writes it to
/// `<output>/<service>-cftemplate.json`.
pub struct CreateTemplateOp;

#[async_trait]
impl Operation<BuildState> for CreateTemplateOp {
  async fn invoke(&self, _ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
    assemble(state)?;
    write_template(state).await
  }

  async fn rollback(&self, _ctx: &WorkflowContext, state: &mut BuildState) -> Result<(), WorkflowError> {
    let Some(path) = state.outputs.artifacts.template_path.take() else {
      return Ok(());
    };
    match tokio::fs::remove_file(&path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(WorkflowError::io(format!("removing {}", path.display()), e)),
    }
  }
}

fn assemble(state: &mut BuildState) -> Result<(), WorkflowError> {
  let inputs = &state.inputs;
  let outputs = &mut state.outputs;
  let service = &inputs.service;
  let options = &inputs.options;
  let args = inputs.hook_args();

  if !service.description.is_empty() {
    outputs.template.description = Some(service.description.clone());
  }

  call_workflow_hooks(HookPhase::PreMarshal, &inputs.hooks.pre_marshals, &mut outputs.context, &args)?;

  let pipeline_parameters = service.pipeline_parameters();
  {
    let parameters = &mut outputs.template.parameters;
    let code_key = Artifacts::key_of(&outputs.artifacts.code_archive);
    parameters.insert(
      PARAM_CODE_BUCKET.to_string(),
      Parameter::string("Bucket holding the code archive", &options.bucket, "", 3),
    );
    parameters.insert(
      PARAM_CODE_KEY.to_string(),
      Parameter::string("Object key of the code archive", &code_key, "", 3),
    );
    parameters.insert(
      PARAM_CODE_VERSION.to_string(),
      Parameter::string("Object version of the code archive", "", "", 0),
    );
    for (key, parameter) in &pipeline_parameters {
      parameters.insert(
        parameter.clone(),
        Parameter::string(&format!("Pipeline environment variable {key}"), "", "", 0),
      );
    }
  }

  let export_ctx = ExportContext {
    service_name: &service.name,
    build_id: &options.build_id,
    code: &inputs.code,
    roles: &outputs.roles,
    pipeline_parameters: &pipeline_parameters,
  };
  for function in &outputs.functions {
    let fragment = function.export(&export_ctx, &mut outputs.context)?;
    outputs.template.safe_merge(fragment)?;
  }
  info!(functions = outputs.functions.len(), "functions exported");

  let mut gateway_outputs = BTreeMap::new();
  if let Some(gateway) = &inputs.extensions.gateway {
    let mut fragment = Template::new();
    gateway
      .export(&args, &outputs.roles, &mut fragment)
      .map_err(|source| WorkflowError::hook(HookPhase::GatewayExport, gateway.name(), source))?;
    gateway_outputs = fragment.outputs.clone();
    outputs.template.safe_merge(fragment)?;
    debug!(gateway = %gateway.name(), "gateway exported");
  }

  call_service_decorators(
    &inputs.hooks.service_decorators,
    &mut outputs.context,
    &args,
    &mut outputs.template,
  )?;

  match (&service.site, &inputs.extensions.site) {
    (Some(site), Some(exporter)) => {
      let location = CodeLocation {
        bucket: expr::reference(PARAM_CODE_BUCKET),
        key: expr::reference(PARAM_SITE_ARCHIVE_KEY),
        version: expr::reference(PARAM_SITE_ARCHIVE_VERSION),
      };
      let mut fragment = Template::new();
      exporter
        .export(&args, site, &location, &gateway_outputs, &mut fragment)
        .map_err(|source| WorkflowError::hook(HookPhase::SiteExport, exporter.name(), source))?;
      outputs.template.safe_merge(fragment)?;
      debug!(exporter = %exporter.name(), "site exported");
    }
    (Some(_), None) => warn!("site configured but no site exporter registered"),
    _ => {}
  }

  call_workflow_hooks(HookPhase::PostMarshal, &inputs.hooks.post_marshals, &mut outputs.context, &args)?;

  annotate_discovery_info(&mut outputs.template, &options.log_level)?;
  annotate_build_information(&mut outputs.template, &options.build_id, Utc::now())?;

  call_validation_hooks(&inputs.hooks.validators, &mut outputs.context, &args, &outputs.template)?;
  ensure_discovery_info(&outputs.template)?;

  info!(
    resources = outputs.template.resources.len(),
    parameters = outputs.template.parameters.len(),
    outputs = outputs.template.outputs.len(),
    "template assembled"
  );
  Ok(())
}

async fn write_template(state: &mut BuildState) -> Result<(), WorkflowError> {
  let path = state
    .inputs
    .options
    .output_dir
    .join(format!("{}-cftemplate.json", state.inputs.service.name));
  let body = serde_json::to_string_pretty(&state.outputs.template).map_err(TemplateError::from)?;
  debug!(template = %body, "rendered template");

  tokio::fs::create_dir_all(&state.inputs.options.output_dir)
    .await
    .map_err(|source| WorkflowError::io("creating output directory", source))?;
  tokio::fs::write(&path, body)
    .await
    .map_err(|source| WorkflowError::io(format!("writing {}", path.display()), source))?;
  info!(path = %path.display(), "template written");
  state.outputs.artifacts.template_path = Some(path);
  Ok(())
}
