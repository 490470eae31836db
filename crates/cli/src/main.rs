mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use packbox_lib::consts::STUB_ENV_VAR;

use cmd::{BuildOptions, LinkerChoice, cmd_build, cmd_check, cmd_inspect};

/// Bundle modules and files into one self-contained executable
#[derive(Parser)]
#[command(name = "packbox")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the executable described by a manifest
  Build {
    /// Path to the build manifest
    manifest: PathBuf,

    /// Loader stub to append the payload to
    #[arg(long, env = STUB_ENV_VAR)]
    stub: Option<PathBuf>,

    /// External link command; takes precedence over --stub
    #[arg(long)]
    link_cmd: Option<String>,

    /// Shell used to run --link-cmd
    #[arg(long, requires = "link_cmd")]
    shell: Option<String>,

    /// Override the manifest's output path (may contain path variables)
    #[arg(short, long)]
    output: Option<String>,
  },

  /// Validate a manifest without building
  Check {
    /// Path to the build manifest
    manifest: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Show the payload of a produced executable
  Inspect {
    /// Path to the executable
    executable: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match cli.command {
    Commands::Build {
      manifest,
      stub,
      link_cmd,
      shell,
      output,
    } => {
      let linker = match (link_cmd, stub) {
        (Some(template), _) => Some(LinkerChoice::Command { template, shell }),
        (None, Some(stub)) => Some(LinkerChoice::Stub(stub)),
        (None, None) => None,
      };
      Ok(cmd_build(&BuildOptions {
        manifest,
        linker,
        output,
        verbose: cli.verbose,
      }))
    }
    Commands::Check { manifest, json } => cmd_check(&manifest, json).map(|()| ExitCode::SUCCESS),
    Commands::Inspect { executable, json } => cmd_inspect(&executable, json).map(|()| ExitCode::SUCCESS),
  }
}

/// Logs go to stderr; `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
