mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use usebuild_lib::consts::SCRIPT_FILENAME;

use crate::cmd::{Invocation, cmd_build, cmd_configure, cmd_status};
use crate::output::{OutputFormat, print_command_output, print_error};

/// use - incremental builds driven by a Lua build script
#[derive(Parser)]
#[command(name = "use")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Build script
  #[arg(short, long, global = true, default_value = SCRIPT_FILENAME)]
  file: PathBuf,

  /// Number of builders to run at once (default: number of CPUs)
  #[arg(short, long, global = true)]
  jobs: Option<usize>,

  /// Run builders one at a time, depth-first
  #[arg(long, global = true)]
  sequential: bool,

  /// Set a script argument, `name=value` or `name`
  #[arg(short = 'D', long = "define", global = true, value_name = "NAME=VALUE")]
  defines: Vec<String>,

  /// Search for packages even if the last configuration could be reused
  #[arg(long, global = true)]
  reconfigure: bool,

  /// Shell used to run builder commands
  #[arg(long, global = true)]
  shell: Option<String>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Bring targets up to date (the default)
  Build {
    /// Targets to build; defaults to every final product
    targets: Vec<String>,
  },

  /// Search for packages and resolve uses without building
  Configure,

  /// Show which targets are out of date
  Status {
    targets: Vec<String>,

    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("usebuild_lib=debug,usebuild_cli=debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let invocation = Invocation {
    file: cli.file,
    jobs: cli.jobs,
    sequential: cli.sequential,
    defines: cli.defines,
    reconfigure: cli.reconfigure,
    shell: cli.shell,
    verbose: cli.verbose,
  };

  let result = match cli.command {
    None => cmd_build(&invocation, &[]),
    Some(Commands::Build { targets }) => cmd_build(&invocation, &targets),
    Some(Commands::Configure) => cmd_configure(&invocation),
    Some(Commands::Status { targets, output }) => cmd_status(&invocation, &targets, output),
  };

  if let Err(e) = result {
    if let Some((stdout, stderr)) = cmd::command_output(&e) {
      print_command_output(stdout, stderr);
    }
    print_error(&format!("{:#}", e));
    std::process::exit(cmd::exit_code(&e));
  }
  Ok(())
}
