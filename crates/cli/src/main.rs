mod cmd;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::BuildArgs;
use crate::output::print_error;

/// stratus - build and provision function-based services
#[derive(Parser)]
#[command(name = "stratus")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Log level used when RUST_LOG is not set [default: warn]. Also the
  /// function log level when the manifest sets none.
  #[arg(long, global = true)]
  level: Option<String>,

  /// Shorthand for --level debug
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the service and apply its stack
  Provision {
    /// Bucket the code archive is uploaded to
    #[arg(long = "s3-bucket")]
    s3_bucket: Option<String>,

    #[command(flatten)]
    args: BuildArgs,
  },

  /// Build the binary, archives and template without touching the stack
  Build {
    /// Bucket recorded in the template parameters
    #[arg(long = "s3-bucket")]
    s3_bucket: Option<String>,

    #[command(flatten)]
    args: BuildArgs,
  },

  /// Show the current stack state
  Status {
    /// Mask the account id in every reported value
    #[arg(long)]
    redact: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    #[arg(short, long, default_value = stratus_lib::service::manifest::DEFAULT_MANIFEST)]
    manifest: PathBuf,
  },

  /// Render the resource graph as Graphviz DOT
  Describe {
    /// Write the graph here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    args: BuildArgs,
  },

  /// Delete the service stack
  Delete {
    #[arg(short, long, default_value = stratus_lib::service::manifest::DEFAULT_MANIFEST)]
    manifest: PathBuf,
  },
}

fn main() {
  let cli = Cli::parse();

  let requested = if cli.verbose { Some("debug".to_string()) } else { cli.level };
  let level = requested.as_deref().unwrap_or("warn");
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Provision { s3_bucket, args } => cmd::cmd_provision(s3_bucket, &args.with_log_level(requested)),
    Commands::Build { s3_bucket, args } => cmd::cmd_build(s3_bucket, &args.with_log_level(requested)),
    Commands::Status { redact, json, manifest } => cmd::cmd_status(&manifest, redact, json),
    Commands::Describe { out, args } => cmd::cmd_describe(out.as_deref(), &args.with_log_level(requested)),
    Commands::Delete { manifest } => cmd::cmd_delete(&manifest),
  };

  if let Err(err) = result {
    print_error(&format!("{err:#}"));
    std::process::exit(1);
  }
}
