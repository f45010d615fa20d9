//! Types shared by the build context and its callers.

use std::path::PathBuf;

use thiserror::Error;

use crate::consts::STATE_DIR;
use crate::scan::ScanError;
use crate::script::ScriptError;
use crate::state::StateError;
use crate::usetree::Arguments;
use crate::util::fs::DiscoverError;

/// Errors that can occur while configuring, expanding or building.
#[derive(Debug, Error)]
pub enum BuildError {
  /// An external command exited non-zero.
  #[error("command failed ({}): {command}", exit_status(.code))]
  CommandFailed {
    command: String,
    code: Option<i32>,
    stdout: String,
    stderr: String,
  },

  /// A use tree could not be satisfied.
  #[error("cannot resolve {root}: missing {}", missing.join(", "))]
  Resolution { root: String, missing: Vec<String> },

  /// Every member of a conflicting selection has run out of candidates.
  #[error("cannot resolve {root}: no compatible installations of {}", packages.join(", "))]
  Conflict { root: String, packages: Vec<String> },

  /// A production lists one of its own sources as a product.
  #[error("{rule} produces its own source {node}")]
  SelfProduction { rule: String, node: String },

  #[error("dependency cycle through {0}")]
  Cycle(String),

  #[error("unknown package: {0}")]
  UnknownPackage(String),

  #[error("unknown rule: {0}")]
  UnknownRule(String),

  #[error("unknown target: {0}")]
  UnknownTarget(String),

  #[error("package {package}: {message}")]
  Package { package: String, message: String },

  #[error("state error: {0}")]
  State(#[from] StateError),

  #[error("script error: {0}")]
  Script(#[from] ScriptError),

  #[error("scan error: {0}")]
  Scan(#[from] ScanError),

  #[error("source discovery failed: {0}")]
  Discover(#[from] DiscoverError),

  #[error("failed to compute builder signature: {0}")]
  Signature(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The job never ran because an earlier job failed.
  #[error("cancelled")]
  Cancelled,
}

impl BuildError {
  /// Process exit code for this error.
  pub fn exit_code(&self) -> i32 {
    1
  }

  /// Captured `(stdout, stderr)` of a failed command.
  pub fn command_output(&self) -> Option<(&str, &str)> {
    match self {
      BuildError::CommandFailed { stdout, stderr, .. } => Some((stdout, stderr)),
      _ => None,
    }
  }
}

fn exit_status(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("exit code {}", code),
    None => "killed by signal".to_string(),
  }
}

/// Where a build lives and how it was invoked.
#[derive(Debug, Clone)]
pub struct ContextConfig {
  /// Build root; sources are discovered and products written below it.
  pub root: PathBuf,
  pub state_dir: PathBuf,
  /// Configure even when the previous configuration could be reused.
  pub reconfigure: bool,
  /// Script arguments from the command line, overriding declared defaults.
  pub arguments: Arguments,
}

impl ContextConfig {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    Self {
      state_dir: root.join(STATE_DIR),
      root,
      reconfigure: false,
      arguments: Arguments::new(),
    }
  }
}

/// Outcome of a completed build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
  /// Whether package search ran, as opposed to reusing the last configuration.
  pub configured: bool,
  pub targets: Vec<String>,
  pub builders_run: usize,
  pub nodes_completed: usize,
}

/// Out-of-date report produced without building anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
  pub needs_configure: bool,
  pub targets: Vec<TargetStatus>,
}

impl Status {
  pub fn out_of_date(&self) -> impl Iterator<Item = &TargetStatus> {
    self.targets.iter().filter(|t| t.out_of_date)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStatus {
  pub name: String,
  pub out_of_date: bool,
}
