//! Shared helpers for workflow integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stratus_lib::package::PrebuiltToolchain;
use stratus_lib::provision::{BuildOptions, Provisioner};
use stratus_lib::remote::{LocalStackStore, Session, StackApi, StaticIdentity};
use stratus_lib::service::{FunctionDefinition, RoleRequirement, ServiceDefinition};
use tempfile::TempDir;

pub const ACCOUNT_ID: &str = "123456789012";
pub const REGION: &str = "us-east-1";

/// Isolated environment: stack registry, output directory and a prebuilt
/// binary, all inside one temporary directory.
pub struct TestEnv {
  pub temp: TempDir,
  pub identity: Arc<StaticIdentity>,
}

impl TestEnv {
  pub fn new() -> Self {
    Self::with_identity(StaticIdentity::new(ACCOUNT_ID))
  }

  pub fn with_identity(identity: StaticIdentity) -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("bootstrap-prebuilt"), b"\x7fELF").unwrap();
    Self {
      temp,
      identity: Arc::new(identity),
    }
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  pub fn output_dir(&self) -> PathBuf {
    self.path().join("out")
  }

  pub fn session(&self) -> Session {
    Session::new(REGION, self.identity.clone(), Arc::new(self.stacks()))
  }

  /// The registry every session of this environment reads and writes.
  pub fn stacks(&self) -> LocalStackStore {
    LocalStackStore::new(self.path().join("stacks"), REGION, ACCOUNT_ID)
  }

  pub fn options(&self) -> BuildOptions {
    let mut options = BuildOptions::new("orders-artifacts", self.output_dir());
    options.build_id = "build-1".to_string();
    options
  }

  pub fn provisioner(&self, service: ServiceDefinition) -> Provisioner {
    self.provisioner_with(service, self.options())
  }

  pub fn provisioner_with(&self, service: ServiceDefinition, options: BuildOptions) -> Provisioner {
    self.provisioner_on(service, options, self.session())
  }

  /// A provisioner talking to `stacks` instead of the plain registry.
  pub fn provisioner_with_stacks(
    &self,
    service: ServiceDefinition,
    options: BuildOptions,
    stacks: Arc<dyn StackApi>,
  ) -> Provisioner {
    let session = Session::new(REGION, self.identity.clone(), stacks);
    self.provisioner_on(service, options, session)
  }

  fn provisioner_on(&self, service: ServiceDefinition, options: BuildOptions, session: Session) -> Provisioner {
    let toolchain = Arc::new(PrebuiltToolchain::new(self.path().join("bootstrap-prebuilt")));
    Provisioner::new(service, options, session, toolchain)
  }
}

pub fn function(handler: &str) -> FunctionDefinition {
  FunctionDefinition::new(handler, RoleRequirement::default())
}

pub fn literal(handler: &str, role: &str) -> FunctionDefinition {
  FunctionDefinition::new(handler, RoleRequirement::Literal(role.to_string()))
}

pub fn service() -> ServiceDefinition {
  ServiceDefinition::new("orders").with_description("order processing")
}
