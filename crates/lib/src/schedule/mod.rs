//! Execution of invalid nodes.
//!
//! Two interchangeable strategies share the node state machine:
//!
//! - [`Strategy::Sequential`] walks depth-first from each target through
//!   [`NodeGraph::build`], relying on the once-per-run `seen` guard.
//! - [`Strategy::Concurrent`] decides validity first, then turns the graph
//!   into a self-propagating wavefront of jobs bounded by a semaphore.

mod queue;
mod sequential;
mod types;

use std::sync::Arc;

pub use types::{ExecuteConfig, ScheduleReport, Strategy};

use crate::builder::CommandRunner;
use crate::context::BuildError;
use crate::node::{NodeGraph, NodeId};

/// Bring `targets` up to date with the configured strategy.
pub async fn execute(
  graph: &mut NodeGraph,
  targets: &[NodeId],
  config: &ExecuteConfig,
  runner: Arc<dyn CommandRunner>,
) -> Result<ScheduleReport, BuildError> {
  match config.strategy {
    Strategy::Sequential => sequential::run(graph, targets, runner.as_ref()),
    Strategy::Concurrent => queue::run(graph, targets, config.parallelism, runner).await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builder::{Action, Builder};
  use crate::node::NodeRecord;
  use crate::options::OptionSet;
  use crate::util::testutil::RecordingRunner;
  use std::collections::BTreeMap;
  use std::fs;
  use std::path::Path;
  use tempfile::tempdir;
  use tracing_test::traced_test;

  fn command_builder(template: &str, sources: Vec<NodeId>, products: Vec<NodeId>) -> Builder {
    Builder::new(
      vec![Action::Command {
        template: template.to_string(),
        cwd: None,
      }],
      OptionSet::new(),
      sources,
      products,
    )
  }

  fn produce(graph: &mut NodeGraph, template: &str, sources: &[NodeId], products: &[NodeId]) {
    let b = graph.add_builder(command_builder(template, sources.to_vec(), products.to_vec()));
    for &product in products {
      graph.set_producer(product, b, None);
      for &source in sources {
        graph.add_product(source, product);
      }
    }
  }

  /// `a.txt` and `b.txt` are concatenated into `a.out` and `b.out`, then both into `all.out`.
  fn diamond(root: &Path, records: BTreeMap<String, NodeRecord>) -> (NodeGraph, NodeId) {
    let mut graph = NodeGraph::new(root, records);
    let a = graph.file("a.txt");
    let b = graph.file("b.txt");
    let a_out = graph.file("a.out");
    let b_out = graph.file("b.out");
    let all = graph.file("all.out");
    produce(&mut graph, "concat {product} {sources}", &[a], &[a_out]);
    produce(&mut graph, "concat {product} {sources}", &[b], &[b_out]);
    produce(&mut graph, "concat {product} {sources}", &[a_out, b_out], &[all]);
    (graph, all)
  }

  fn sources(root: &Path) {
    fs::write(root.join("a.txt"), "a").unwrap();
    fs::write(root.join("b.txt"), "b").unwrap();
  }

  fn concurrent(parallelism: usize) -> ExecuteConfig {
    ExecuteConfig {
      parallelism,
      strategy: Strategy::Concurrent,
      shell: None,
    }
  }

  #[test]
  fn default_config_is_concurrent() {
    let config = ExecuteConfig::default();
    assert!(config.parallelism >= 1);
    assert_eq!(config.strategy, Strategy::Concurrent);
    assert!(config.shell.is_none());
  }

  #[tokio::test]
  async fn sequential_builds_in_dependency_order() {
    let temp = tempdir().unwrap();
    sources(temp.path());
    let (mut graph, all) = diamond(temp.path(), BTreeMap::new());
    let runner = Arc::new(RecordingRunner::new());
    let config = ExecuteConfig {
      strategy: Strategy::Sequential,
      ..concurrent(1)
    };

    let report = execute(&mut graph, &[all], &config, runner.clone()).await.unwrap();
    assert_eq!(report.builders_run, 3);
    assert_eq!(report.completed.len(), 5);
    assert_eq!(runner.commands().last().unwrap(), "concat all.out a.out b.out");
    assert_eq!(fs::read_to_string(temp.path().join("all.out")).unwrap(), "ab");
  }

  #[tokio::test]
  async fn concurrent_builds_everything_once() {
    let temp = tempdir().unwrap();
    sources(temp.path());
    let (mut graph, all) = diamond(temp.path(), BTreeMap::new());
    let runner = Arc::new(RecordingRunner::new());

    let report = execute(&mut graph, &[all], &concurrent(4), runner.clone()).await.unwrap();
    assert_eq!(report.builders_run, 3);
    assert_eq!(runner.count(), 3);
    assert_eq!(report.completed.last(), Some(&all));
    assert_eq!(fs::read_to_string(temp.path().join("all.out")).unwrap(), "ab");
  }

  #[tokio::test]
  async fn concurrent_rebuilds_only_what_changed() {
    let temp = tempdir().unwrap();
    sources(temp.path());
    let (mut graph, all) = diamond(temp.path(), BTreeMap::new());
    execute(&mut graph, &[all], &concurrent(2), Arc::new(RecordingRunner::new()))
      .await
      .unwrap();

    fs::write(temp.path().join("b.txt"), "B").unwrap();
    let (mut graph, all) = diamond(temp.path(), graph.records());
    let runner = Arc::new(RecordingRunner::new());
    let report = execute(&mut graph, &[all], &concurrent(2), runner.clone()).await.unwrap();

    assert_eq!(report.builders_run, 2);
    assert_eq!(runner.commands(), vec!["concat b.out b.txt", "concat all.out a.out b.out"]);
    assert_eq!(fs::read_to_string(temp.path().join("all.out")).unwrap(), "aB");

    let (mut graph, all) = diamond(temp.path(), graph.records());
    let runner = Arc::new(RecordingRunner::new());
    let report = execute(&mut graph, &[all], &concurrent(2), runner.clone()).await.unwrap();
    assert_eq!(report.builders_run, 0);
    assert_eq!(runner.count(), 0);
  }

  #[tokio::test]
  async fn shared_builder_runs_once_for_all_products() {
    let temp = tempdir().unwrap();
    sources(temp.path());
    let mut graph = NodeGraph::new(temp.path(), BTreeMap::new());
    let a = graph.file("a.txt");
    let left = graph.file("left.out");
    let right = graph.file("right.out");
    let both = graph.file("both.out");
    produce(&mut graph, "concat left.out {sources}", &[a], &[left, right]);
    graph.builder_mut(crate::builder::BuilderId(0)).actions.push(Action::Command {
      template: "concat right.out {sources}".to_string(),
      cwd: None,
    });
    produce(&mut graph, "concat {product} {sources}", &[left, right], &[both]);
    let runner = Arc::new(RecordingRunner::new());

    let report = execute(&mut graph, &[both], &concurrent(4), runner.clone()).await.unwrap();
    assert_eq!(report.builders_run, 2);
    assert_eq!(
      runner.commands(),
      vec!["concat left.out a.txt", "concat right.out a.txt", "concat both.out left.out right.out"]
    );
    assert!(graph.records().contains_key("right.out"));
  }

  #[tokio::test]
  #[traced_test]
  async fn failure_cancels_and_keeps_completed_records() {
    let temp = tempdir().unwrap();
    sources(temp.path());
    let mut graph = NodeGraph::new(temp.path(), BTreeMap::new());
    let a = graph.file("a.txt");
    let b = graph.file("b.txt");
    let a_out = graph.file("a.out");
    let b_out = graph.file("b.out");
    let all = graph.file("all.out");
    produce(&mut graph, "concat {product} {sources}", &[a], &[a_out]);
    produce(&mut graph, "fail", &[b], &[b_out]);
    produce(&mut graph, "concat {product} {sources}", &[a_out, b_out], &[all]);
    let runner = Arc::new(RecordingRunner::new());

    let err = execute(&mut graph, &[all], &concurrent(1), runner.clone()).await.unwrap_err();
    assert!(matches!(err, BuildError::CommandFailed { ref command, code: Some(1), .. } if command == "fail"));
    assert!(!runner.commands().iter().any(|c| c.contains("all.out")));

    let records = graph.records();
    assert!(records.contains_key("a.txt"));
    assert!(records.contains_key("b.txt"));
    assert!(!records.contains_key("b.out"));
    assert!(!records.contains_key("all.out"));
    assert!(logs_contain("job failed"));
  }

  #[tokio::test]
  async fn concurrent_and_sequential_agree_on_records() {
    let seq_dir = tempdir().unwrap();
    let con_dir = tempdir().unwrap();
    sources(seq_dir.path());
    sources(con_dir.path());

    let (mut seq, seq_all) = diamond(seq_dir.path(), BTreeMap::new());
    let config = ExecuteConfig {
      strategy: Strategy::Sequential,
      ..concurrent(1)
    };
    execute(&mut seq, &[seq_all], &config, Arc::new(RecordingRunner::new()))
      .await
      .unwrap();

    let (mut con, con_all) = diamond(con_dir.path(), BTreeMap::new());
    execute(&mut con, &[con_all], &concurrent(3), Arc::new(RecordingRunner::new()))
      .await
      .unwrap();

    assert_eq!(seq.records(), con.records());
  }
}
