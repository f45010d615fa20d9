mod build;
mod configure;
mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use usebuild_lib::context::{BuildContext, BuildError, ContextConfig};
use usebuild_lib::schedule::{ExecuteConfig, Strategy};
use usebuild_lib::script::evaluate_script;
use usebuild_lib::usetree::Arguments;

pub use build::cmd_build;
pub use configure::cmd_configure;
pub use status::cmd_status;

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct Invocation {
  pub file: PathBuf,
  pub jobs: Option<usize>,
  pub sequential: bool,
  pub defines: Vec<String>,
  pub reconfigure: bool,
  pub shell: Option<String>,
  pub verbose: bool,
}

impl Invocation {
  /// Directory holding the build script; the build root.
  fn root(&self) -> Result<PathBuf> {
    let script = dunce::canonicalize(&self.file)
      .with_context(|| format!("Build script not found: {}", self.file.display()))?;
    Ok(script.parent().unwrap_or(Path::new(".")).to_path_buf())
  }

  fn arguments(&self) -> Arguments {
    self
      .defines
      .iter()
      .map(|d| Arguments::parse_define(d))
      .collect()
  }

  pub fn execute_config(&self) -> Result<ExecuteConfig> {
    let mut config = ExecuteConfig {
      shell: self.shell.clone(),
      ..Default::default()
    };
    if let Some(jobs) = self.jobs {
      if jobs == 0 {
        bail!("--jobs must be at least 1");
      }
      config.parallelism = jobs;
    }
    if self.sequential {
      config.strategy = Strategy::Sequential;
    }
    Ok(config)
  }

  /// Evaluate the build script into a fresh context.
  pub fn context(&self) -> Result<BuildContext> {
    let root = self.root()?;
    let declarations = evaluate_script(&self.file).context("Failed to evaluate build script")?;

    let mut config = ContextConfig::new(root);
    config.reconfigure = self.reconfigure;
    config.arguments = self.arguments();
    Ok(BuildContext::from_declarations(config, declarations)?)
  }
}

/// Process exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
  err.downcast_ref::<BuildError>().map(BuildError::exit_code).unwrap_or(1)
}

/// Captured `(stdout, stderr)` when the error is a failed builder command.
pub fn command_output(err: &anyhow::Error) -> Option<(&str, &str)> {
  err.downcast_ref::<BuildError>().and_then(BuildError::command_output)
}

/// Run a future on a fresh multi-threaded runtime.
fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  Ok(rt.block_on(future))
}
