//! Provisioning against the local stack registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use stratus_lib::consts::{OUTPUT_BUILD_ID, PARAM_CODE_BUCKET, TAG_BUILD_ID, TAG_BUILD_TAGS};
use stratus_lib::execute::{WorkflowContext, WorkflowError};
use stratus_lib::provision::{delete, describe_stack};
use stratus_lib::remote::{
  LocalStackStore, RemoteError, StackApi, StackDescription, StackRequest, StackStatus,
};
use stratus_lib::status::stack_status;

use super::common::{ACCOUNT_ID, TestEnv, function, service};

#[tokio::test]
async fn provision_creates_then_updates_stack() {
  let env = TestEnv::new();
  let mut options = env.options();
  options.build_tags = vec!["release".to_string(), "blue".to_string()];

  let first = env
    .provisioner_with(service().with_function(function("api::create")), options)
    .provision(&WorkflowContext::new())
    .await
    .unwrap();
  let stack = first.stack.unwrap();
  assert_eq!(stack.status, StackStatus::CreateComplete);
  assert_eq!(stack.output(OUTPUT_BUILD_ID), Some("build-1"));
  assert_eq!(stack.parameters[PARAM_CODE_BUCKET], "orders-artifacts");
  assert_eq!(stack.tags[TAG_BUILD_ID], "build-1");
  assert_eq!(stack.tags[TAG_BUILD_TAGS], "release,blue");

  let mut options = env.options();
  options.build_id = "build-2".to_string();
  let second = env
    .provisioner_with(service().with_function(function("api::create")), options)
    .provision(&WorkflowContext::new())
    .await
    .unwrap();
  let updated = second.stack.unwrap();
  assert_eq!(updated.status, StackStatus::UpdateComplete);
  assert_eq!(updated.stack_id, stack.stack_id);
  assert_eq!(updated.output(OUTPUT_BUILD_ID), Some("build-2"));
}

#[tokio::test]
async fn dry_run_leaves_stack_untouched() {
  let env = TestEnv::new();
  let mut options = env.options();
  options.dry_run = true;

  let outcome = env
    .provisioner_with(service().with_function(function("api::create")), options)
    .provision(&WorkflowContext::new())
    .await
    .unwrap();

  assert!(outcome.stack.is_none());
  assert!(outcome.artifacts.template_path.unwrap().is_file());
  assert!(env.session().describe_stack("orders").await.unwrap().is_none());
}

#[tokio::test]
async fn status_redacts_account_id() {
  let env = TestEnv::new();
  env
    .provisioner(service().with_function(function("api::create")))
    .provision(&WorkflowContext::new())
    .await
    .unwrap();

  let plain = stack_status(&env.session(), "orders", false).await.unwrap();
  assert!(plain.stack_id.contains(ACCOUNT_ID));

  let redacted = stack_status(&env.session(), "orders", true).await.unwrap();
  assert!(!redacted.stack_id.contains(ACCOUNT_ID));
  assert!(redacted.stack_id.contains("************"));
  assert_eq!(redacted.status, plain.status);
}

#[tokio::test]
async fn delete_reports_whether_stack_existed() {
  let env = TestEnv::new();
  env
    .provisioner(service().with_function(function("api::create")))
    .provision(&WorkflowContext::new())
    .await
    .unwrap();

  let session = env.session();
  assert!(delete(&session, "orders").await.unwrap());
  assert!(!delete(&session, "orders").await.unwrap());
}

#[tokio::test]
async fn describing_missing_stack_is_not_found() {
  let env = TestEnv::new();
  let err = describe_stack(&env.session(), "orders").await.unwrap_err();

  assert!(matches!(
    err,
    WorkflowError::Remote(RemoteError::NotFound { kind: "stack", ref name }) if name == "orders"
  ));
}

#[tokio::test]
async fn unknown_environment_leaves_stack_untouched() {
  let env = TestEnv::new();
  env
    .provisioner(service().with_function(function("api::create")))
    .provision(&WorkflowContext::new())
    .await
    .unwrap();

  let mut options = env.options();
  options.build_id = "build-2".to_string();
  options.environment = Some("staging".to_string());
  let err = env
    .provisioner_with(
      service()
        .with_function(function("api::create"))
        .with_environment(
          "prod",
          BTreeMap::from([("TableName".to_string(), "orders-prod".to_string())]),
        ),
      options,
    )
    .provision(&WorkflowContext::new())
    .await
    .unwrap_err();
  assert!(matches!(err.root_cause(), WorkflowError::Preconditions(_)));

  let current = describe_stack(&env.session(), "orders").await.unwrap();
  assert_eq!(current.output(OUTPUT_BUILD_ID), Some("build-1"));
}

/// Applies through the local registry, but reports the `fail_on`-th apply
/// (1-based) as failed.
struct FailingApply {
  inner: LocalStackStore,
  fail_on: usize,
  applies: AtomicUsize,
}

impl FailingApply {
  fn new(inner: LocalStackStore, fail_on: usize) -> Arc<Self> {
    Arc::new(Self {
      inner,
      fail_on,
      applies: AtomicUsize::new(0),
    })
  }

  fn applies(&self) -> usize {
    self.applies.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl StackApi for FailingApply {
  async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>, RemoteError> {
    self.inner.describe_stack(name).await
  }

  async fn last_request(&self, name: &str) -> Result<Option<StackRequest>, RemoteError> {
    self.inner.last_request(name).await
  }

  async fn apply_stack(&self, request: StackRequest) -> Result<StackDescription, RemoteError> {
    let count = self.applies.fetch_add(1, Ordering::SeqCst) + 1;
    let mut description = self.inner.apply_stack(request).await?;
    if count == self.fail_on {
      description.status = match description.status {
        StackStatus::CreateComplete => StackStatus::CreateFailed,
        _ => StackStatus::UpdateFailed,
      };
      description.status_reason = Some("resource limit exceeded".to_string());
    }
    Ok(description)
  }

  async fn delete_stack(&self, name: &str) -> Result<bool, RemoteError> {
    self.inner.delete_stack(name).await
  }
}

#[tokio::test]
async fn failed_update_restores_previous_stack() {
  let env = TestEnv::new();
  let stacks = FailingApply::new(env.stacks(), 2);
  env
    .provisioner_with_stacks(service().with_function(function("api::create")), env.options(), stacks.clone())
    .provision(&WorkflowContext::new())
    .await
    .unwrap();

  let mut options = env.options();
  options.build_id = "build-2".to_string();
  let err = env
    .provisioner_with_stacks(service().with_function(function("api::create")), options, stacks.clone())
    .provision(&WorkflowContext::new())
    .await
    .unwrap_err();

  assert!(matches!(err, WorkflowError::Aborted { ref operation, .. } if operation == "verify-stack"));
  assert!(err.to_string().contains("UPDATE_FAILED"));
  assert!(err.rollback_errors().is_empty());
  assert_eq!(stacks.applies(), 3);
  let current = describe_stack(&env.session(), "orders").await.unwrap();
  assert_eq!(current.output(OUTPUT_BUILD_ID), Some("build-1"));
}

#[tokio::test]
async fn failed_create_deletes_new_stack() {
  let env = TestEnv::new();
  let stacks = FailingApply::new(env.stacks(), 1);
  let err = env
    .provisioner_with_stacks(service().with_function(function("api::create")), env.options(), stacks.clone())
    .provision(&WorkflowContext::new())
    .await
    .unwrap_err();

  assert!(err.to_string().contains("CREATE_FAILED"));
  assert!(err.rollback_errors().is_empty());
  assert_eq!(stacks.applies(), 1);
  assert!(env.session().describe_stack("orders").await.unwrap().is_none());
}
