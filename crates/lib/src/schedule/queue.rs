//! Concurrent job queue.
//!
//! Validity is decided up front with [`NodeGraph::check`] and
//! [`NodeGraph::settle`], then every reachable node becomes a job. A job
//! whose node owns an invalid builder runs that builder's commands on the
//! blocking pool; every other job only completes. Completions come back over
//! a channel, and each one triggers a readiness check on the jobs that were
//! waiting for it. A job is submitted once all of its prerequisite jobs are
//! done, and never twice.
//!
//! All graph mutation (marking builders as run, recording nodes) happens on
//! the task driving the queue, so jobs only ever see a [`PreparedBuilder`].

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::ScheduleReport;
use crate::builder::{BuilderId, CommandRunner, PreparedBuilder, run_prepared};
use crate::context::BuildError;
use crate::node::{NodeGraph, NodeId};

#[derive(Debug, Default)]
struct JobState {
  in_queue: bool,
  job_done: bool,
}

#[derive(Debug)]
struct Job {
  node: NodeId,
  prereqs: Vec<usize>,
  dependents: Vec<usize>,
  /// Set on the one job that runs an invalid builder.
  builder: Option<PreparedBuilder>,
  state: Mutex<JobState>,
}

impl Job {
  fn lock(&self) -> MutexGuard<'_, JobState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Build the job table for everything reachable from `targets`.
fn plan(graph: &NodeGraph, targets: &[NodeId]) -> Vec<Job> {
  let order = graph.reachable(targets);
  let index: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
  let mut owners: HashMap<BuilderId, usize> = HashMap::new();
  let mut jobs = Vec::with_capacity(order.len());

  for (i, &id) in order.iter().enumerate() {
    let node = graph.node(id);
    let mut prereqs: Vec<usize> = graph
      .prerequisites(id)
      .iter()
      .filter_map(|p| index.get(p).copied())
      .collect();

    let mut builder = None;
    if node.invalid
      && let Some(b) = node.builder
      && !graph.builder_ran(b)
    {
      match owners.get(&b) {
        // Sibling products wait for the job that runs their builder.
        Some(&owner) => {
          if !prereqs.contains(&owner) {
            prereqs.push(owner);
          }
        }
        None => {
          owners.insert(b, i);
          builder = Some(graph.prepare_builder(b));
        }
      }
    }

    jobs.push(Job {
      node: id,
      prereqs,
      dependents: Vec::new(),
      builder,
      state: Mutex::new(JobState::default()),
    });
  }

  for i in 0..jobs.len() {
    for p in jobs[i].prereqs.clone() {
      jobs[p].dependents.push(i);
    }
  }
  jobs
}

/// Claim job `i` for submission if all of its prerequisites are done.
fn ready_check(jobs: &[Job], i: usize) -> bool {
  let mut state = jobs[i].lock();
  if state.in_queue || state.job_done {
    return false;
  }
  if !jobs[i].prereqs.iter().all(|p| jobs[*p].lock().job_done) {
    return false;
  }
  state.in_queue = true;
  true
}

type Completion = (usize, Result<(), BuildError>);

struct Queue {
  jobs: Arc<Vec<Job>>,
  semaphore: Arc<Semaphore>,
  cancel: CancellationToken,
  runner: Arc<dyn CommandRunner>,
  tx: mpsc::UnboundedSender<Completion>,
  join_set: JoinSet<()>,
  in_flight: usize,
}

impl Queue {
  fn submit(&mut self, i: usize) {
    trace!(job = i, "submitting");
    let prepared = self.jobs[i].builder.clone();
    let semaphore = self.semaphore.clone();
    let cancel = self.cancel.clone();
    let runner = self.runner.clone();
    let tx = self.tx.clone();
    self.in_flight += 1;

    self.join_set.spawn(async move {
      let result = tokio::select! {
        _ = cancel.cancelled() => Err(BuildError::Cancelled),
        permit = semaphore.acquire_owned() => match permit {
          Ok(_permit) if !cancel.is_cancelled() => run_job(prepared, runner).await,
          _ => Err(BuildError::Cancelled),
        },
      };
      // The receiver outlives every job.
      let _ = tx.send((i, result));
    });
  }
}

async fn run_job(prepared: Option<PreparedBuilder>, runner: Arc<dyn CommandRunner>) -> Result<(), BuildError> {
  let Some(prepared) = prepared else {
    return Ok(());
  };
  tokio::task::spawn_blocking(move || run_prepared(&prepared, runner.as_ref()))
    .await
    .map_err(io::Error::from)?
}

/// Run everything reachable from `targets`, up to `parallelism` builders at once.
///
/// On the first failure no further jobs start; jobs already running finish
/// and are recorded before the error is returned.
pub async fn run(
  graph: &mut NodeGraph,
  targets: &[NodeId],
  parallelism: usize,
  runner: Arc<dyn CommandRunner>,
) -> Result<ScheduleReport, BuildError> {
  for &target in targets {
    graph.check(target)?;
  }
  let reachable = graph.reachable(targets);
  graph.settle(&reachable);

  let jobs = Arc::new(plan(graph, targets));
  let builders = jobs.iter().filter(|j| j.builder.is_some()).count();
  info!(jobs = jobs.len(), builders, parallelism, "starting job queue");

  let (tx, mut rx) = mpsc::unbounded_channel();
  let mut queue = Queue {
    jobs: jobs.clone(),
    semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
    cancel: CancellationToken::new(),
    runner,
    tx,
    join_set: JoinSet::new(),
    in_flight: 0,
  };

  for i in 0..jobs.len() {
    if jobs[i].prereqs.is_empty() && ready_check(&jobs, i) {
      queue.submit(i);
    }
  }

  let mut completed = Vec::new();
  let mut failure: Option<BuildError> = None;

  while queue.in_flight > 0 {
    let Some((i, result)) = rx.recv().await else {
      break;
    };
    queue.in_flight -= 1;
    let job = &jobs[i];

    let result = result.and_then(|()| {
      if let Some(prepared) = &job.builder {
        graph.mark_builder_ran(prepared.id);
      }
      graph.record(job.node)
    });

    match result {
      Ok(()) => {
        debug!(node = %graph.key(job.node), "job done");
        completed.push(job.node);
        {
          let mut state = job.lock();
          state.in_queue = false;
          state.job_done = true;
        }
        if queue.cancel.is_cancelled() {
          continue;
        }
        for &d in &job.dependents {
          if ready_check(&jobs, d) {
            queue.submit(d);
          }
        }
      }
      Err(BuildError::Cancelled) => {
        trace!(node = %graph.key(job.node), "job cancelled");
      }
      Err(e) => {
        debug!(node = %graph.key(job.node), error = %e, "job failed");
        if failure.is_none() {
          failure = Some(e);
          queue.cancel.cancel();
        }
      }
    }
  }

  while let Some(joined) = queue.join_set.join_next().await {
    if let Err(e) = joined {
      error!(error = %e, "job task panicked");
    }
  }

  if let Some(e) = failure {
    return Err(e);
  }

  info!(completed = completed.len(), builders_run = graph.builders_run(), "job queue finished");
  Ok(ScheduleReport {
    builders_run: graph.builders_run(),
    completed,
  })
}
