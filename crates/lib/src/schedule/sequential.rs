//! Depth-first execution straight through the node state machine.

use tracing::{debug, info};

use super::ScheduleReport;
use crate::builder::CommandRunner;
use crate::context::BuildError;
use crate::node::{NodeGraph, NodeId};

/// Build each target in turn; the first failure stops the run.
///
/// Nodes completed before a failure keep their fresh records.
pub fn run(graph: &mut NodeGraph, targets: &[NodeId], runner: &dyn CommandRunner) -> Result<ScheduleReport, BuildError> {
  info!(targets = targets.len(), "building sequentially");

  for &target in targets {
    let invalid = graph.build(target, runner)?;
    debug!(target = %graph.key(target), invalid, "target done");
  }

  let completed = graph
    .reachable(targets)
    .into_iter()
    .filter(|id| graph.node(*id).seen)
    .collect();
  Ok(ScheduleReport {
    builders_run: graph.builders_run(),
    completed,
  })
}
