use std::sync::Arc;

use crate::builder::{CommandRunner, ShellRunner};
use crate::node::NodeId;

/// How invalid nodes are brought up to date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
  /// Depth-first from each target, one builder at a time.
  Sequential,
  /// Independent builders run in parallel as their prerequisites complete.
  #[default]
  Concurrent,
}

/// Configuration for build execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of builders running at once.
  pub parallelism: usize,

  pub strategy: Strategy,

  /// Shell to use for command execution.
  /// If None, uses /bin/sh (Unix) or cmd.exe (Windows).
  pub shell: Option<String>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      strategy: Strategy::default(),
      shell: None,
    }
  }
}

impl ExecuteConfig {
  /// The command runner this configuration asks for.
  pub fn runner(&self) -> Arc<dyn CommandRunner> {
    Arc::new(ShellRunner::new(self.shell.clone()))
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// What a scheduler run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
  pub builders_run: usize,
  /// Nodes brought up to date and recorded, in completion order.
  pub completed: Vec<NodeId>,
}
