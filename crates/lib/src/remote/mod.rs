//! Remote APIs: identity lookups and the stack API.
//!
//! Both are traits so the workflow can run against the filesystem-backed
//! [`LocalStackStore`] and [`StaticIdentity`] or any other implementation.
//! Calls go through [`Session`], which applies the configured
//! [`RetryPolicy`]. The default policy performs no retries.

mod local;
mod retry;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::template::Template;

pub use local::{LocalStackStore, StackStoreError, StaticIdentity};
pub use retry::{Backoff, BackoffStrategy, NoRetry, RetryPolicy};

#[derive(Debug, Error)]
pub enum RemoteError {
  /// The named role, stack or other entity does not exist. Never retried.
  #[error("{kind} not found: {name}")]
  NotFound { kind: &'static str, name: String },

  /// The request was understood but refused. Never retried.
  #[error("request rejected: {0}")]
  Rejected(String),

  /// A transient failure; eligible for retry.
  #[error("service unavailable: {0}")]
  Unavailable(String),

  #[error("stack store error: {0}")]
  Store(#[from] StackStoreError),
}

impl RemoteError {
  pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
    RemoteError::NotFound { kind, name: name.into() }
  }

  /// Whether retrying can never help.
  pub fn is_terminal(&self) -> bool {
    !matches!(self, RemoteError::Unavailable(_))
  }
}

/// Looks up pre-existing identities.
#[async_trait]
pub trait IdentityApi: Send + Sync {
  /// Resolve a role name or ARN to its ARN.
  async fn get_role(&self, name: &str) -> Result<String, RemoteError>;

  /// The account id of the caller.
  async fn caller_account(&self) -> Result<String, RemoteError>;
}

/// Lifecycle state of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
  CreateComplete,
  UpdateComplete,
  CreateFailed,
  UpdateFailed,
  DeleteComplete,
}

impl StackStatus {
  pub fn is_complete(&self) -> bool {
    matches!(self, StackStatus::CreateComplete | StackStatus::UpdateComplete)
  }
}

impl fmt::Display for StackStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      StackStatus::CreateComplete => "CREATE_COMPLETE",
      StackStatus::UpdateComplete => "UPDATE_COMPLETE",
      StackStatus::CreateFailed => "CREATE_FAILED",
      StackStatus::UpdateFailed => "UPDATE_FAILED",
      StackStatus::DeleteComplete => "DELETE_COMPLETE",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackOutput {
  pub key: String,
  pub value: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub export_name: Option<String>,
}

/// What the stack API reports about a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDescription {
  pub stack_id: String,
  pub stack_name: String,
  #[serde(default)]
  pub description: Option<String>,
  pub status: StackStatus,
  #[serde(default)]
  pub status_reason: Option<String>,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub parameters: BTreeMap<String, String>,
  #[serde(default)]
  pub tags: BTreeMap<String, String>,
  #[serde(default)]
  pub outputs: Vec<StackOutput>,
}

impl StackDescription {
  pub fn output(&self, key: &str) -> Option<&str> {
    self
      .outputs
      .iter()
      .find(|output| output.key == key)
      .map(|output| output.value.as_str())
  }
}

/// A create-or-update request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackRequest {
  pub stack_name: String,
  pub template: Template,
  #[serde(default)]
  pub parameters: BTreeMap<String, String>,
  #[serde(default)]
  pub tags: BTreeMap<String, String>,
}

/// Describe/apply/delete protocol of the template execution API.
#[async_trait]
pub trait StackApi: Send + Sync {
  /// `Ok(None)` when the stack does not exist.
  async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>, RemoteError>;

  /// The request the stack was last applied with.
  async fn last_request(&self, name: &str) -> Result<Option<StackRequest>, RemoteError>;

  /// Create the stack, or update it if it exists.
  async fn apply_stack(&self, request: StackRequest) -> Result<StackDescription, RemoteError>;

  /// Returns whether a stack was deleted.
  async fn delete_stack(&self, name: &str) -> Result<bool, RemoteError>;
}

/// Remote API handles for one run.
#[derive(Clone)]
pub struct Session {
  pub region: String,
  pub identity: Arc<dyn IdentityApi>,
  pub stacks: Arc<dyn StackApi>,
  pub retry: Arc<dyn RetryPolicy>,
}

impl fmt::Debug for Session {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Session").field("region", &self.region).finish_non_exhaustive()
  }
}

impl Session {
  pub fn new(region: impl Into<String>, identity: Arc<dyn IdentityApi>, stacks: Arc<dyn StackApi>) -> Self {
    Self {
      region: region.into(),
      identity,
      stacks,
      retry: Arc::new(NoRetry),
    }
  }

  /// A session backed by a static identity and the default local stack store.
  pub fn offline(region: impl Into<String>, account_id: impl Into<String>) -> Self {
    let region = region.into();
    let identity = StaticIdentity::new(account_id);
    let stacks = LocalStackStore::default_store(&region, identity.account_id());
    Self::new(region, Arc::new(identity), Arc::new(stacks))
  }

  pub fn with_retry(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
    self.retry = retry;
    self
  }

  pub async fn get_role(&self, name: &str) -> Result<String, RemoteError> {
    self.call("get_role", || self.identity.get_role(name)).await
  }

  pub async fn caller_account(&self) -> Result<String, RemoteError> {
    self.call("caller_account", || self.identity.caller_account()).await
  }

  pub async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>, RemoteError> {
    self.call("describe_stack", || self.stacks.describe_stack(name)).await
  }

  pub async fn last_request(&self, name: &str) -> Result<Option<StackRequest>, RemoteError> {
    self.call("last_request", || self.stacks.last_request(name)).await
  }

  pub async fn apply_stack(&self, request: StackRequest) -> Result<StackDescription, RemoteError> {
    self
      .call("apply_stack", || self.stacks.apply_stack(request.clone()))
      .await
  }

  pub async fn delete_stack(&self, name: &str) -> Result<bool, RemoteError> {
    self.call("delete_stack", || self.stacks.delete_stack(name)).await
  }

  async fn call<T, F, Fut>(&self, operation: &str, mut attempt_call: F) -> Result<T, RemoteError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
  {
    let mut attempt = 1;
    loop {
      match attempt_call().await {
        Ok(value) => return Ok(value),
        Err(err) if err.is_terminal() => return Err(err),
        Err(err) => match self.retry.next_delay(attempt, &err) {
          Some(delay) => {
            warn!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying remote call");
            tokio::time::sleep(delay).await;
            attempt += 1;
          }
          None => {
            debug!(operation, attempt, "giving up on remote call");
            return Err(err);
          }
        },
      }
    }
  }
}
