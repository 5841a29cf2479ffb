//! Test fixtures for workflow tests.
//!
//! Everything is rooted in a caller-owned temporary directory: the stack
//! registry, the output directory and a stand-in for the compiled binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::package::PrebuiltToolchain;
use crate::provision::{BuildOptions, Provisioner};
use crate::remote::{LocalStackStore, Session, StaticIdentity};
use crate::service::{FunctionDefinition, RoleRequirement, ServiceDefinition};

pub const ACCOUNT_ID: &str = "123456789012";
pub const REGION: &str = "us-east-1";

/// Write a fake binary under `dir`.
pub fn fake_binary(dir: &Path) -> PathBuf {
  let path = dir.join("prebuilt-bootstrap");
  std::fs::write(&path, b"\x7fELF test binary").unwrap();
  path
}

/// A session over a stack registry in `dir/stacks`.
pub fn offline_session(dir: &Path, identity: Arc<StaticIdentity>) -> Session {
  let stacks = LocalStackStore::new(dir.join("stacks"), REGION, ACCOUNT_ID);
  Session::new(REGION, identity, Arc::new(stacks))
}

/// One function with an inline role.
pub fn sample_service() -> ServiceDefinition {
  ServiceDefinition::new("orders")
    .with_description("order processing")
    .with_function(FunctionDefinition::new("orders::api::create", RoleRequirement::default()))
}

/// A provisioner that uses a prebuilt binary and writes into `dir/out`.
pub fn provisioner(dir: &Path, service: ServiceDefinition, identity: Arc<StaticIdentity>) -> Provisioner {
  let mut options = BuildOptions::new("orders-artifacts", dir.join("out"));
  options.build_id = "build-1".to_string();
  let toolchain = Arc::new(PrebuiltToolchain::new(fake_binary(dir)));
  Provisioner::new(service, options, offline_session(dir, identity), toolchain)
}
