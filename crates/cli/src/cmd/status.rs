//! Status command implementation.
//!
//! Displays the stack's status, parameters, outputs and tags.

use std::path::Path;

use anyhow::{Context, Result};

use stratus_lib::execute::WorkflowError;
use stratus_lib::remote::RemoteError;
use stratus_lib::status::stack_status;

use crate::cmd::{load_manifest, run_workflow, session_for};
use crate::output::{format_timestamp, print_info, print_json, print_stat, print_success, symbols};

pub fn cmd_status(manifest_path: &Path, redact: bool, json: bool) -> Result<()> {
  let manifest = load_manifest(manifest_path)?;
  let session = session_for(&manifest);
  let name = manifest.service.name.clone();

  let found = run_workflow(|_ctx| async move {
    match stack_status(&session, &name, redact).await {
      Ok(stack) => Ok(Some(stack)),
      Err(WorkflowError::Remote(RemoteError::NotFound { .. })) => Ok(None),
      Err(err) => Err(err),
    }
  })
  .context("Status failed")?;

  let Some(stack) = found else {
    if json {
      print_json(&serde_json::Value::Null)?;
    } else {
      print_info(&format!(
        "No stack found for {}. Run 'stratus provision' to create one.",
        manifest.service.name
      ));
    }
    return Ok(());
  };

  if json {
    return print_json(&stack);
  }

  print_success(&format!("Stack {}: {}", stack.stack_name, stack.status));
  print_stat("Id", &stack.stack_id);
  if let Some(reason) = &stack.status_reason {
    print_stat("Reason", reason);
  }
  print_stat("Created", &format_timestamp(stack.created_at));
  if let Some(updated) = stack.updated_at {
    print_stat("Updated", &format_timestamp(updated));
  }

  for (title, entries) in [
    ("Parameters", stack.parameters.iter().collect::<Vec<_>>()),
    ("Tags", stack.tags.iter().collect()),
  ] {
    if entries.is_empty() {
      continue;
    }
    println!();
    println!("{title}:");
    for (key, value) in entries {
      println!("  {} {} = {}", symbols::INFO, key, value);
    }
  }

  if !stack.outputs.is_empty() {
    println!();
    println!("Outputs:");
    for output in &stack.outputs {
      println!("  {} {} = {}", symbols::INFO, output.key, output.value);
    }
  }

  Ok(())
}
