//! Build pipeline: preconditions, role resolution, packaging and template
//! assembly.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use stratus_lib::consts::{
  CUSTOM_RESOURCE_TYPE, ENV_DISCOVERY_INFO, ENV_LOG_LEVEL, FUNCTION_RESOURCE_TYPE, OUTPUT_BUILD_ID,
  PARAM_SITE_ARCHIVE_KEY, ROLE_RESOURCE_TYPE,
};
use stratus_lib::execute::{WorkflowContext, WorkflowError};
use stratus_lib::hooks::{HookArgs, HookContext, HookPhase, HookResult, WorkflowHooks};
use stratus_lib::remote::{RemoteError, StaticIdentity};
use stratus_lib::service::{BucketSiteExporter, CustomResourceRegistration, RoleRequirement, SiteConfig};
use stratus_lib::template::{Output, Resource, Template, TemplateError};

use super::common::{TestEnv, function, literal, service};

#[tokio::test]
async fn zero_functions_without_hooks_fails() {
  let env = TestEnv::new();
  let err = env.provisioner(service()).build(&WorkflowContext::new()).await.unwrap_err();

  match err.root_cause() {
    WorkflowError::Preconditions(errors) => assert_eq!(errors, &vec!["no functions provided".to_string()]),
    other => panic!("expected precondition failure, got {other:?}"),
  }
  assert!(!env.output_dir().exists());
}

#[tokio::test]
async fn zero_functions_with_hooks_builds() {
  let env = TestEnv::new();
  let hooks = WorkflowHooks::new().service_decorator("queue", |ctx, _args, fragment| {
    fragment.add_resource("Queue", Resource::new("AWS::SQS::Queue", json!({})))?;
    Ok(ctx)
  });
  let outcome = env
    .provisioner(service())
    .with_hooks(hooks)
    .build(&WorkflowContext::new())
    .await
    .unwrap();

  assert!(outcome.template.resources.contains_key("Queue"));
}

#[tokio::test]
async fn duplicate_function_names_report_one_collision() {
  let env = TestEnv::new();
  let service = service()
    .with_function(function("api::Handler"))
    .with_function(function("jobs::Handler"));
  let err = env.provisioner(service).build(&WorkflowContext::new()).await.unwrap_err();

  match err.root_cause() {
    WorkflowError::Preconditions(errors) => {
      assert_eq!(errors.len(), 1);
      assert!(errors[0].contains("Handler"));
      assert!(errors[0].contains("count 2"));
    }
    other => panic!("expected precondition failure, got {other:?}"),
  }
}

#[tokio::test]
async fn literal_roles_are_looked_up_once_each() {
  let env = TestEnv::with_identity(
    StaticIdentity::new("123456789012")
      .with_role("shared")
      .with_role("other"),
  );
  let service = service()
    .with_function(literal("api::create", "shared"))
    .with_function(literal("api::update", "shared"))
    .with_function(literal("api::delete", "other"))
    .with_function(
      literal("api::list", "shared")
        .with_custom_resource(CustomResourceRegistration::new("setup::seed", RoleRequirement::Literal("other".into()))),
    );
  let outcome = env.provisioner(service).build(&WorkflowContext::new()).await.unwrap();

  assert_eq!(env.identity.lookups(), 2);
  let roles: Vec<_> = outcome
    .template
    .resources_of_type(FUNCTION_RESOURCE_TYPE)
    .map(|(_, r)| r.properties["Role"].clone())
    .collect();
  assert_eq!(roles.len(), 5);
  assert!(roles.contains(&json!("arn:aws:iam::123456789012:role/shared")));
  assert!(roles.contains(&json!("arn:aws:iam::123456789012:role/other")));
}

#[tokio::test]
async fn equal_inline_roles_share_one_resource() {
  let env = TestEnv::new();
  let service = service()
    .with_function(function("api::create"))
    .with_function(function("api::update"));
  let outcome = env.provisioner(service).build(&WorkflowContext::new()).await.unwrap();

  let roles: Vec<_> = outcome.template.resources_of_type(ROLE_RESOURCE_TYPE).collect();
  assert_eq!(roles.len(), 1);
  let (role_name, _) = roles[0];
  for (_, function) in outcome.template.resources_of_type(FUNCTION_RESOURCE_TYPE) {
    assert_eq!(function.properties["Role"], json!({"Fn::GetAtt": [role_name, "Arn"]}));
  }
  assert_eq!(env.identity.lookups(), 0);
}

#[tokio::test]
async fn missing_literal_role_fails_and_runs_rollback_hooks() {
  let env = TestEnv::new();
  let rollbacks = Arc::new(AtomicUsize::new(0));
  let seen = Arc::clone(&rollbacks);
  let hooks = WorkflowHooks::new().rollback("count", move |ctx, _args| {
    seen.fetch_add(1, Ordering::SeqCst);
    Ok(ctx)
  });
  let service = service().with_function(literal("api::create", "arn:missing"));
  let err = env
    .provisioner(service)
    .with_hooks(hooks)
    .build(&WorkflowContext::new())
    .await
    .unwrap_err();

  assert!(err.to_string().contains("arn:missing"));
  assert!(matches!(
    err.root_cause(),
    WorkflowError::Remote(RemoteError::NotFound { kind: "role", name }) if name == "arn:missing"
  ));
  assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
  assert_eq!(env.identity.lookups(), 1);
}

#[tokio::test]
async fn every_function_carries_discovery_and_log_level() {
  let env = TestEnv::new();
  let mut options = env.options();
  options.log_level = "debug".to_string();
  let service = service()
    .with_function(function("api::create"))
    .with_function(
      function("api::list").with_custom_resource(
        CustomResourceRegistration::new("setup::seed", RoleRequirement::default()).with_property("Table", json!("t")),
      ),
    );
  let outcome = env
    .provisioner_with(service, options)
    .build(&WorkflowContext::new())
    .await
    .unwrap();

  let functions: Vec<_> = outcome.template.resources_of_type(FUNCTION_RESOURCE_TYPE).collect();
  assert_eq!(functions.len(), 3);
  for (name, function) in functions {
    let env = function.environment().unwrap();
    assert!(env.contains_key(ENV_DISCOVERY_INFO), "{name} lacks discovery info");
    assert_eq!(env[ENV_LOG_LEVEL], "debug");
  }

  let (custom_name, custom) = outcome.template.resources_of_type(CUSTOM_RESOURCE_TYPE).next().unwrap();
  assert_eq!(custom.properties["Table"], "t");
  let (_, owner) = outcome
    .template
    .resources_of_type(FUNCTION_RESOURCE_TYPE)
    .find(|(_, r)| r.properties["Environment"]["Variables"]["STRATUS_HANDLER"] == "api::list")
    .unwrap();
  assert_eq!(owner.depends_on, vec![custom_name.clone()]);
}

#[tokio::test]
async fn decorator_conflicting_with_function_export_names_resource() {
  let env = TestEnv::new();
  let service = service().with_function(function("api::create").with_decorator(
    "function-queue",
    |ctx, _args, _metadata, fragment| {
      fragment.add_resource("Queue", Resource::new("AWS::SQS::Queue", json!({"DelaySeconds": 0})))?;
      Ok(ctx)
    },
  ));
  let hooks = WorkflowHooks::new().service_decorator("service-queue", |ctx, _args, fragment| {
    fragment.add_resource("Queue", Resource::new("AWS::SQS::Queue", json!({"DelaySeconds": 5})))?;
    Ok(ctx)
  });
  let err = env
    .provisioner(service)
    .with_hooks(hooks)
    .build(&WorkflowContext::new())
    .await
    .unwrap_err();

  match err.root_cause() {
    WorkflowError::Template(conflict @ TemplateError::MergeConflicts(_)) => {
      assert_eq!(conflict.conflicting_names(), vec!["Queue"]);
      assert!(conflict.to_string().contains("DelaySeconds"));
    }
    other => panic!("expected merge conflict, got {other:?}"),
  }
}

fn declare_queue(ctx: HookContext, _args: &HookArgs<'_>, fragment: &mut Template) -> HookResult {
  fragment.add_resource("Queue", Resource::new("AWS::SQS::Queue", json!({})))?;
  Ok(ctx)
}

#[tokio::test]
async fn identical_decorator_resources_merge_cleanly() {
  let env = TestEnv::new();
  let hooks = WorkflowHooks::new()
    .service_decorator("first", declare_queue)
    .service_decorator("second", declare_queue);
  let outcome = env
    .provisioner(service().with_function(function("api::create")))
    .with_hooks(hooks)
    .build(&WorkflowContext::new())
    .await
    .unwrap();

  assert!(outcome.template.resources.contains_key("Queue"));
}

#[tokio::test]
async fn decorator_output_clashing_with_build_id_fails() {
  let env = TestEnv::new();
  let hooks = WorkflowHooks::new().service_decorator("build-output", |ctx, _args, fragment| {
    fragment
      .outputs
      .insert(OUTPUT_BUILD_ID.to_string(), Output::new("BuildID", json!("user-value")));
    Ok(ctx)
  });
  let err = env
    .provisioner(service().with_function(function("api::create")))
    .with_hooks(hooks)
    .build(&WorkflowContext::new())
    .await
    .unwrap_err();

  match err.root_cause() {
    WorkflowError::Template(conflict @ TemplateError::MergeConflicts(_)) => {
      assert_eq!(conflict.conflicting_names(), vec![OUTPUT_BUILD_ID]);
      assert!(conflict.to_string().contains("user-value"));
    }
    other => panic!("expected merge conflict, got {other:?}"),
  }
  assert!(!env.output_dir().join("orders-cftemplate.json").exists());
}

#[tokio::test]
async fn hook_failures_name_phase_and_hook() {
  let env = TestEnv::new();
  let hooks = WorkflowHooks::new().post_build("stamp", |_ctx, _args| Err("disk full".into()));
  let err = env
    .provisioner(service().with_function(function("api::create")))
    .with_hooks(hooks)
    .build(&WorkflowContext::new())
    .await
    .unwrap_err();

  assert!(matches!(
    err.root_cause(),
    WorkflowError::Hook { phase: HookPhase::PostBuild, name, .. } if name == "stamp"
  ));
  assert!(err.to_string().contains("PostBuild hook stamp failed: disk full"));
}

#[tokio::test]
async fn site_archive_adds_parameters_and_resources() {
  let env = TestEnv::new();
  let site = env.path().join("site");
  std::fs::create_dir_all(&site).unwrap();
  std::fs::write(site.join("index.html"), "<html/>").unwrap();

  let service = service()
    .with_function(function("api::create"))
    .with_site(SiteConfig::new(&site));
  let outcome = env
    .provisioner(service)
    .with_site_exporter(Arc::new(BucketSiteExporter))
    .build(&WorkflowContext::new())
    .await
    .unwrap();

  let archive = outcome.artifacts.site_archive.unwrap();
  assert!(archive.ends_with("orders-site.zip"));
  assert_eq!(
    outcome.template.parameters[PARAM_SITE_ARCHIVE_KEY].default.as_deref(),
    Some("orders-site.zip")
  );
  assert!(outcome.template.outputs.contains_key("SiteURL"));
}
