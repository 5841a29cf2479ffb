//! Implementation of the `stratus build` command.

use anyhow::{Context, Result};

use crate::cmd::{BuildArgs, load_manifest, provisioner_for, run_workflow};
use crate::output::{format_bytes, format_duration, print_stat, print_success};

/// Compile, package and assemble the template. The stack is never touched.
pub fn cmd_build(s3_bucket: Option<String>, args: &BuildArgs) -> Result<()> {
  let manifest = load_manifest(&args.manifest)?;
  let provisioner = provisioner_for(&manifest, s3_bucket, args);
  let outcome = run_workflow(|ctx| async move { provisioner.build(&ctx).await }).context("Build failed")?;

  println!();
  print_success(&format!("Built {}", manifest.service.name));
  let artifacts = &outcome.artifacts;
  for (label, path) in [
    ("Code archive", &artifacts.code_archive),
    ("Site archive", &artifacts.site_archive),
    ("Template", &artifacts.template_path),
  ] {
    let Some(path) = path else { continue };
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    print_stat(label, &format!("{} ({})", path.display(), format_bytes(size)));
  }
  if let Some(sha) = &artifacts.code_sha256 {
    print_stat("Code sha256", &sha.0);
  }
  print_stat("Resources", &outcome.template.resources.len().to_string());
  print_stat("Elapsed", &format_duration(outcome.report.elapsed));

  Ok(())
}
