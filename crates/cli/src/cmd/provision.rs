//! Implementation of the `stratus provision` command.
//!
//! Builds the service, then creates or updates its stack. Any failure rolls
//! back what the run already did, including a stack it applied.

use anyhow::{Context, Result};

use crate::cmd::{BuildArgs, load_manifest, provisioner_for, run_workflow};
use crate::output::{format_duration, print_stat, print_success, print_warning};

pub fn cmd_provision(s3_bucket: Option<String>, args: &BuildArgs) -> Result<()> {
  let manifest = load_manifest(&args.manifest)?;
  if s3_bucket.is_none() && manifest.bucket.is_none() {
    anyhow::bail!("no code bucket: pass --s3-bucket or set `bucket` in the manifest");
  }

  let provisioner = provisioner_for(&manifest, s3_bucket, args);
  let outcome = run_workflow(|ctx| async move { provisioner.provision(&ctx).await })
    .context("Provision failed")?;

  println!();
  match &outcome.stack {
    Some(stack) => {
      print_success(&format!("Stack {} is {}", stack.stack_name, stack.status));
      print_stat("Stack id", &stack.stack_id);
      for output in &stack.outputs {
        print_stat(&output.key, &output.value);
      }
    }
    None => print_warning("Dry run: stack not applied"),
  }
  if let Some(template) = &outcome.artifacts.template_path {
    print_stat("Template", &template.display().to_string());
  }
  print_stat("Elapsed", &format_duration(outcome.report.elapsed));

  Ok(())
}
