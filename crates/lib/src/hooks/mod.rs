//! User extension points.
//!
//! A [`WorkflowHooks`] registry holds named callbacks for each extension
//! point of a build. Every callback receives the current [`HookContext`] and
//! returns the context that replaces it, so values accumulated by one hook are
//! visible to every later one:
//!
//! ```ignore
//! let hooks = WorkflowHooks::new()
//!   .pre_build("stamp", |ctx, args| Ok(ctx.with_value("stamped", json!(args.build_id))))
//!   .service_decorator("queue", |ctx, _args, fragment| {
//!     fragment.add_resource("Queue", Resource::new("AWS::SQS::Queue", json!({})))?;
//!     Ok(ctx)
//!   });
//! ```

mod invoke;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::package::{CodeArchive, CodeLocation};
use crate::remote::Session;
use crate::template::Template;

pub use invoke::{
  call_archive_hooks, call_rollback_hooks, call_service_decorators, call_validation_hooks, call_workflow_hooks,
};

/// Error type returned by user callbacks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

pub type HookResult = Result<HookContext, HookError>;

/// Immutable key/value context threaded through hook invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HookContext {
  values: BTreeMap<String, Value>,
}

impl HookContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Return a new context with `key` set to `value`.
  pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.values.insert(key.into(), value.into());
    self
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.values.get(key)
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.values.get(key).and_then(Value::as_str)
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

/// Read-only arguments shared by every hook call.
pub struct HookArgs<'a> {
  pub service_name: &'a str,
  pub build_id: &'a str,
  pub code: &'a CodeLocation,
  pub session: &'a Session,
  pub dry_run: bool,
}

/// The extension point a hook runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
  PreBuild,
  PostBuild,
  Archive,
  PreMarshal,
  PostMarshal,
  ServiceDecorator,
  Validation,
  Rollback,
  FunctionDecorator,
  ProfileDecorator,
  GatewayExport,
  SiteExport,
}

impl fmt::Display for HookPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      HookPhase::PreBuild => "PreBuild",
      HookPhase::PostBuild => "PostBuild",
      HookPhase::Archive => "Archive",
      HookPhase::PreMarshal => "PreMarshal",
      HookPhase::PostMarshal => "PostMarshal",
      HookPhase::ServiceDecorator => "ServiceDecorator",
      HookPhase::Validation => "Validation",
      HookPhase::Rollback => "Rollback",
      HookPhase::FunctionDecorator => "FunctionDecorator",
      HookPhase::ProfileDecorator => "ProfileDecorator",
      HookPhase::GatewayExport => "GatewayExport",
      HookPhase::SiteExport => "SiteExport",
    };
    f.write_str(name)
  }
}

/// Pre-build, post-build, pre-marshal, post-marshal and rollback callbacks.
pub trait WorkflowHook: Send + Sync {
  fn call(&self, context: HookContext, args: &HookArgs<'_>) -> HookResult;
}

impl<F> WorkflowHook for F
where
  F: Fn(HookContext, &HookArgs<'_>) -> HookResult + Send + Sync,
{
  fn call(&self, context: HookContext, args: &HookArgs<'_>) -> HookResult {
    self(context, args)
  }
}

/// Adds entries to the code archive before the binary is written.
pub trait ArchiveHook: Send + Sync {
  fn call(&self, context: HookContext, args: &HookArgs<'_>, archive: &mut CodeArchive) -> HookResult;
}

impl<F> ArchiveHook for F
where
  F: Fn(HookContext, &HookArgs<'_>, &mut CodeArchive) -> HookResult + Send + Sync,
{
  fn call(&self, context: HookContext, args: &HookArgs<'_>, archive: &mut CodeArchive) -> HookResult {
    self(context, args, archive)
  }
}

/// Contributes resources through a private fragment.
///
/// The fragment starts empty and is safe-merged into the service template
/// once the callback returns.
pub trait ServiceDecorator: Send + Sync {
  fn call(&self, context: HookContext, args: &HookArgs<'_>, fragment: &mut Template) -> HookResult;
}

impl<F> ServiceDecorator for F
where
  F: Fn(HookContext, &HookArgs<'_>, &mut Template) -> HookResult + Send + Sync,
{
  fn call(&self, context: HookContext, args: &HookArgs<'_>, fragment: &mut Template) -> HookResult {
    self(context, args, fragment)
  }
}

/// Inspects a private copy of the finished template.
pub trait ValidationHook: Send + Sync {
  fn call(&self, context: HookContext, args: &HookArgs<'_>, template: &Template) -> HookResult;
}

impl<F> ValidationHook for F
where
  F: Fn(HookContext, &HookArgs<'_>, &Template) -> HookResult + Send + Sync,
{
  fn call(&self, context: HookContext, args: &HookArgs<'_>, template: &Template) -> HookResult {
    self(context, args, template)
  }
}

/// A callback with the name used in logs and errors.
pub struct HookRegistration<H: ?Sized> {
  pub name: String,
  pub hook: Arc<H>,
}

impl<H: ?Sized> HookRegistration<H> {
  pub fn new(name: impl Into<String>, hook: Arc<H>) -> Self {
    Self {
      name: name.into(),
      hook,
    }
  }
}

impl<H: ?Sized> Clone for HookRegistration<H> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      hook: Arc::clone(&self.hook),
    }
  }
}

impl<H: ?Sized> fmt::Debug for HookRegistration<H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HookRegistration").field("name", &self.name).finish()
  }
}

/// The hook registry for one build.
#[derive(Debug, Clone, Default)]
pub struct WorkflowHooks {
  /// Initial hook context.
  pub context: HookContext,
  pub pre_builds: Vec<HookRegistration<dyn WorkflowHook>>,
  pub post_builds: Vec<HookRegistration<dyn WorkflowHook>>,
  pub archives: Vec<HookRegistration<dyn ArchiveHook>>,
  pub pre_marshals: Vec<HookRegistration<dyn WorkflowHook>>,
  pub post_marshals: Vec<HookRegistration<dyn WorkflowHook>>,
  pub service_decorators: Vec<HookRegistration<dyn ServiceDecorator>>,
  pub validators: Vec<HookRegistration<dyn ValidationHook>>,
  /// Run in reverse registration order after a failed build.
  pub rollbacks: Vec<HookRegistration<dyn WorkflowHook>>,
}

impl WorkflowHooks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Whether any callback is registered in any slot.
  pub fn is_empty(&self) -> bool {
    self.pre_builds.is_empty()
      && self.post_builds.is_empty()
      && self.archives.is_empty()
      && self.pre_marshals.is_empty()
      && self.post_marshals.is_empty()
      && self.service_decorators.is_empty()
      && self.validators.is_empty()
      && self.rollbacks.is_empty()
  }

  pub fn with_context(mut self, context: HookContext) -> Self {
    self.context = context;
    self
  }

  pub fn pre_build<F>(mut self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(HookContext, &HookArgs<'_>) -> HookResult + Send + Sync + 'static,
  {
    self.pre_builds.push(HookRegistration::new(name, Arc::new(hook)));
    self
  }

  pub fn post_build<F>(mut self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(HookContext, &HookArgs<'_>) -> HookResult + Send + Sync + 'static,
  {
    self.post_builds.push(HookRegistration::new(name, Arc::new(hook)));
    self
  }

  pub fn archive<F>(mut self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(HookContext, &HookArgs<'_>, &mut CodeArchive) -> HookResult + Send + Sync + 'static,
  {
    self.archives.push(HookRegistration::new(name, Arc::new(hook)));
    self
  }

  pub fn pre_marshal<F>(mut self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(HookContext, &HookArgs<'_>) -> HookResult + Send + Sync + 'static,
  {
    self.pre_marshals.push(HookRegistration::new(name, Arc::new(hook)));
    self
  }

  pub fn post_marshal<F>(mut self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(HookContext, &HookArgs<'_>) -> HookResult + Send + Sync + 'static,
  {
    self.post_marshals.push(HookRegistration::new(name, Arc::new(hook)));
    self
  }

  pub fn service_decorator<F>(mut self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(HookContext, &HookArgs<'_>, &mut Template) -> HookResult + Send + Sync + 'static,
  {
    self
      .service_decorators
      .push(HookRegistration::new(name, Arc::new(hook)));
    self
  }

  pub fn validator<F>(mut self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(HookContext, &HookArgs<'_>, &Template) -> HookResult + Send + Sync + 'static,
  {
    self.validators.push(HookRegistration::new(name, Arc::new(hook)));
    self
  }

  pub fn rollback<F>(mut self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(HookContext, &HookArgs<'_>) -> HookResult + Send + Sync + 'static,
  {
    self.rollbacks.push(HookRegistration::new(name, Arc::new(hook)));
    self
  }
}
