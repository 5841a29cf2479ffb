//! Implementation of the `stratus describe` command.
//!
//! Runs a dry-run build and renders the assembled template's resource graph
//! as Graphviz DOT.

use std::path::Path;

use anyhow::{Context, Result};

use stratus_lib::describe::render_dot;

use crate::cmd::{BuildArgs, load_manifest, provisioner_for, run_workflow};
use crate::output::{print_success, symbols};

pub fn cmd_describe(out: Option<&Path>, args: &BuildArgs) -> Result<()> {
  let manifest = load_manifest(&args.manifest)?;
  let provisioner = provisioner_for(&manifest, None, args);
  let outcome = run_workflow(|ctx| async move { provisioner.build(&ctx).await }).context("Describe failed")?;

  let dot = render_dot(&outcome.template);
  match out {
    Some(path) => {
      std::fs::write(path, &dot).with_context(|| format!("Failed to write {}", path.display()))?;
      print_success(&format!(
        "{} resources {} {}",
        outcome.template.resources.len(),
        symbols::ARROW,
        path.display()
      ));
    }
    None => print!("{dot}"),
  }
  Ok(())
}
