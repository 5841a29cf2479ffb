//! Implementation of the `stratus delete` command.

use std::path::Path;

use anyhow::{Context, Result};

use stratus_lib::provision::delete;

use crate::cmd::{load_manifest, run_workflow, session_for};
use crate::output::{print_info, print_success};

pub fn cmd_delete(manifest_path: &Path) -> Result<()> {
  let manifest = load_manifest(manifest_path)?;
  let session = session_for(&manifest);
  let name = manifest.service.name.clone();

  let deleted = run_workflow(|_ctx| async move { delete(&session, &name).await }).context("Delete failed")?;
  if deleted {
    print_success(&format!("Deleted stack {}", manifest.service.name));
  } else {
    print_info(&format!("Stack {} does not exist", manifest.service.name));
  }
  Ok(())
}
