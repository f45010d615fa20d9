//! The node graph and its validity state machine.
//!
//! Every source file, product and non-file value taking part in a build is a
//! [`Node`] in a [`NodeGraph`] arena. Edges are stored as indices in both
//! directions: a node knows the builder (and thus the sources) that produce
//! it, the nodes it is a source of (`products`), its scan-discovered
//! `dependencies` and their back-links (`progenitors`).
//!
//! Each run a node moves from unseen to valid or invalid exactly once. A node
//! is invalid when
//! - any prerequisite (builder source or dependency) is invalid,
//! - nothing was recorded for it by the previous run,
//! - its own checksum, or the checksum of any prerequisite, differs from the
//!   recorded one,
//! - the signature of its builder changed, or its builder already ran this run,
//! - it is a produced file missing on disk, or it is an always-invalid target.

mod types;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use tracing::{debug, trace};

use crate::builder::{Builder, BuilderId, CommandRunner, PreparedBuilder, run_prepared};
use crate::context::BuildError;
use crate::rule::RuleId;
use crate::util::hash::{ContentHash, ObjectHash, checksum_file, hash_bytes};

pub use types::{Node, NodeId, NodeKind, NodeRecord};

pub struct NodeGraph {
  root: PathBuf,
  nodes: Vec<Node>,
  by_key: HashMap<String, NodeId>,
  builders: Vec<Builder>,
  builder_ran: Vec<bool>,
  /// Records from the previous run, updated as nodes complete.
  records: BTreeMap<String, NodeRecord>,
}

impl NodeGraph {
  /// Create an empty graph rooted at `root`, seeded with the previous run's records.
  pub fn new(root: impl Into<PathBuf>, records: BTreeMap<String, NodeRecord>) -> Self {
    Self {
      root: root.into(),
      nodes: Vec::new(),
      by_key: HashMap::new(),
      builders: Vec::new(),
      builder_ran: Vec::new(),
      records,
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
    (0..self.nodes.len()).map(NodeId)
  }

  pub fn node(&self, id: NodeId) -> &Node {
    &self.nodes[id.0]
  }

  pub fn key(&self, id: NodeId) -> &str {
    &self.nodes[id.0].key
  }

  pub fn find(&self, key: &str) -> Option<NodeId> {
    self.by_key.get(key).copied()
  }

  /// Return the node for `kind`, creating it on first use.
  pub fn intern(&mut self, kind: NodeKind) -> NodeId {
    let key = kind.key();
    if let Some(id) = self.by_key.get(&key) {
      return *id;
    }
    let id = NodeId(self.nodes.len());
    trace!(node = %key, "new node");
    self.nodes.push(Node::new(kind));
    self.by_key.insert(key, id);
    id
  }

  /// The node for a file, given relative to the root or as an absolute path below it.
  pub fn file(&mut self, path: impl AsRef<Path>) -> NodeId {
    let path = path.as_ref();
    let relative = path.strip_prefix(&self.root).unwrap_or(path);
    self.intern(NodeKind::File(normalize(relative)))
  }

  pub fn value(&mut self, repr: impl Into<String>) -> NodeId {
    self.intern(NodeKind::Value(repr.into()))
  }

  pub fn always_invalid(&mut self, name: impl Into<String>) -> NodeId {
    self.intern(NodeKind::AlwaysInvalid(name.into()))
  }

  /// Absolute path of a file node.
  pub fn path(&self, id: NodeId) -> Option<PathBuf> {
    match &self.nodes[id.0].kind {
      NodeKind::File(path) => Some(self.root.join(path)),
      _ => None,
    }
  }

  pub fn add_builder(&mut self, builder: Builder) -> BuilderId {
    let id = BuilderId(self.builders.len());
    self.builders.push(builder);
    self.builder_ran.push(false);
    id
  }

  pub fn builder(&self, id: BuilderId) -> &Builder {
    &self.builders[id.0]
  }

  pub fn builder_mut(&mut self, id: BuilderId) -> &mut Builder {
    &mut self.builders[id.0]
  }

  /// Make `builder` (declared by `rule`) the producer of `product`.
  pub fn set_producer(&mut self, product: NodeId, builder: BuilderId, rule: Option<RuleId>) {
    let node = &mut self.nodes[product.0];
    node.builder = Some(builder);
    node.rule = rule;
  }

  /// Record that `product` is built from `source`.
  pub fn add_product(&mut self, source: NodeId, product: NodeId) {
    let products = &mut self.nodes[source.0].products;
    if !products.contains(&product) {
      products.push(product);
    }
  }

  /// Record a scan-discovered dependency of `node` on `dependency`.
  pub fn add_dependency(&mut self, node: NodeId, dependency: NodeId) {
    if node == dependency || self.nodes[node.0].dependencies.contains(&dependency) {
      return;
    }
    self.nodes[node.0].dependencies.push(dependency);
    self.nodes[dependency.0].progenitors.push(node);
  }

  /// Builder sources followed by dependencies, without duplicates.
  pub fn prerequisites(&self, id: NodeId) -> Vec<NodeId> {
    let node = &self.nodes[id.0];
    let mut prereqs: Vec<NodeId> = node
      .builder
      .map(|b| self.builders[b.0].sources.clone())
      .unwrap_or_default();
    for dep in &node.dependencies {
      if !prereqs.contains(dep) {
        prereqs.push(*dep);
      }
    }
    prereqs
  }

  /// Nodes that must wait for `id`: its products and progenitors.
  pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
    let node = &self.nodes[id.0];
    let mut dependents = node.products.clone();
    for p in &node.progenitors {
      if !dependents.contains(p) {
        dependents.push(*p);
      }
    }
    dependents
  }

  /// Every node reachable from `targets` through prerequisites, prerequisites first.
  pub fn reachable(&self, targets: &[NodeId]) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    for &target in targets {
      self.postorder(target, &mut visited, &mut order);
    }
    order
  }

  fn postorder(&self, id: NodeId, visited: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
    if !visited.insert(id) {
      return;
    }
    for p in self.prerequisites(id) {
      self.postorder(p, visited, order);
    }
    order.push(id);
  }

  /// Fail with [`BuildError::Cycle`] if prerequisites form a cycle.
  pub fn verify_acyclic(&self) -> Result<(), BuildError> {
    let mut graph = DiGraph::<NodeId, ()>::with_capacity(self.nodes.len(), 0);
    let indices: Vec<_> = self.ids().map(|id| graph.add_node(id)).collect();
    for id in self.ids() {
      for p in self.prerequisites(id) {
        graph.add_edge(indices[p.0], indices[id.0], ());
      }
    }

    toposort(&graph, None)
      .map(|_| ())
      .map_err(|cycle| BuildError::Cycle(self.nodes[graph[cycle.node_id()].0].key.clone()))
  }

  /// Current content checksum of a node; `None` for a missing file.
  pub fn checksum(&mut self, id: NodeId) -> Result<Option<ContentHash>, BuildError> {
    if let Some(cached) = &self.nodes[id.0].checksum {
      return Ok(cached.clone());
    }
    let checksum = match &self.nodes[id.0].kind {
      NodeKind::File(path) => checksum_file(&self.root.join(path))?,
      NodeKind::Value(repr) => Some(hash_bytes(repr.as_bytes())),
      NodeKind::AlwaysInvalid(_) => None,
    };
    self.nodes[id.0].checksum = Some(checksum.clone());
    Ok(checksum)
  }

  fn keys(&self, ids: &[NodeId]) -> Vec<String> {
    ids.iter().map(|id| self.nodes[id.0].key.clone()).collect()
  }

  pub fn builder_signature(&self, id: BuilderId) -> Result<ObjectHash, BuildError> {
    let builder = &self.builders[id.0];
    Ok(builder.signature(&self.keys(&builder.sources), &self.keys(&builder.products))?)
  }

  /// Render a builder's commands so it can run away from the graph.
  pub fn prepare_builder(&self, id: BuilderId) -> PreparedBuilder {
    let builder = &self.builders[id.0];
    let commands = builder.render(&self.root, &self.keys(&builder.sources), &self.keys(&builder.products));

    let mut directories: Vec<PathBuf> = Vec::new();
    for product in &builder.products {
      if let Some(dir) = self.path(*product).and_then(|p| p.parent().map(Path::to_path_buf))
        && !directories.contains(&dir)
      {
        directories.push(dir);
      }
    }

    PreparedBuilder {
      id,
      commands,
      directories,
    }
  }

  /// Note that a builder has run, so its products are re-hashed.
  pub fn mark_builder_ran(&mut self, id: BuilderId) {
    self.builder_ran[id.0] = true;
    for product in self.builders[id.0].products.clone() {
      self.nodes[product.0].checksum = None;
    }
  }

  pub fn builder_ran(&self, id: BuilderId) -> bool {
    self.builder_ran[id.0]
  }

  /// Number of builders executed during this run.
  pub fn builders_run(&self) -> usize {
    self.builder_ran.iter().filter(|ran| **ran).count()
  }

  /// Bring `id` up to date, running builders as needed.
  ///
  /// Returns whether the node was invalid. Calling it again in the same run
  /// returns the same answer without doing any work.
  pub fn build(&mut self, id: NodeId, runner: &dyn CommandRunner) -> Result<bool, BuildError> {
    self.evaluate(id, Some(runner))
  }

  /// Decide whether `id` is invalid without running anything or recording it.
  pub fn check(&mut self, id: NodeId) -> Result<bool, BuildError> {
    self.evaluate(id, None)
  }

  fn evaluate(&mut self, id: NodeId, runner: Option<&dyn CommandRunner>) -> Result<bool, BuildError> {
    let node = &self.nodes[id.0];
    if node.seen {
      return Ok(node.invalid);
    }
    if node.visiting {
      return Err(BuildError::Cycle(node.key.clone()));
    }

    self.nodes[id.0].visiting = true;
    let result = self.evaluate_unseen(id, runner);
    self.nodes[id.0].visiting = false;

    let invalid = result?;
    let node = &mut self.nodes[id.0];
    node.seen = true;
    node.invalid = invalid;
    Ok(invalid)
  }

  fn evaluate_unseen(&mut self, id: NodeId, runner: Option<&dyn CommandRunner>) -> Result<bool, BuildError> {
    let mut invalid = false;
    for prereq in self.prerequisites(id) {
      invalid |= self.evaluate(prereq, runner)?;
    }

    let builder = self.nodes[id.0].builder;
    invalid |= match builder {
      Some(b) => self.builder_ran[b.0] || self.builder_stale(b)?,
      None => self.is_stale(id)?,
    };

    if invalid {
      debug!(node = %self.nodes[id.0].key, "node is invalid");
      self.invalidate_progenitors(id);

      if let (Some(runner), Some(b)) = (runner, builder)
        && !self.builder_ran[b.0]
      {
        run_prepared(&self.prepare_builder(b), runner)?;
        self.mark_builder_ran(b);
      }
    }

    if runner.is_some() {
      self.record(id)?;
    }
    Ok(invalid)
  }

  /// A builder is stale when any of its products is.
  fn builder_stale(&mut self, id: BuilderId) -> Result<bool, BuildError> {
    for product in self.builders[id.0].products.clone() {
      if self.is_stale(product)? {
        return Ok(true);
      }
    }
    Ok(false)
  }

  /// Compare a node against its record from the previous run.
  fn is_stale(&mut self, id: NodeId) -> Result<bool, BuildError> {
    let node = &self.nodes[id.0];
    if matches!(node.kind, NodeKind::AlwaysInvalid(_)) {
      return Ok(true);
    }
    let Some(record) = self.records.get(&node.key).cloned() else {
      trace!(node = %node.key, "no stored record");
      return Ok(true);
    };
    let builder = node.builder;
    let is_file = node.is_file();

    let current = self.checksum(id)?;
    if current != record.checksum || (builder.is_some() && is_file && current.is_none()) {
      return Ok(true);
    }

    if let Some(b) = builder
      && record.builder.as_ref() != Some(&self.builder_signature(b)?)
    {
      trace!(node = %self.nodes[id.0].key, "builder changed");
      return Ok(true);
    }

    let prereqs = self.prerequisites(id);
    if prereqs.len() != record.sources.len() {
      return Ok(true);
    }
    for prereq in prereqs {
      let current = self.checksum(prereq)?;
      if record.sources.get(&self.nodes[prereq.0].key) != Some(&current) {
        return Ok(true);
      }
    }
    Ok(false)
  }

  /// Drop the stored records of everything downstream of `id`.
  ///
  /// Walks products and progenitors transitively, so a product whose
  /// declared sources look unchanged is still rechecked when a discovered
  /// dependency changed, and an aborted run never leaves it looking valid.
  pub fn invalidate_progenitors(&mut self, id: NodeId) {
    let mut stack = self.dependents(id);
    let mut visited = HashSet::new();
    while let Some(next) = stack.pop() {
      if !visited.insert(next) {
        continue;
      }
      let key = &self.nodes[next.0].key;
      if self.records.remove(key).is_some() {
        trace!(node = %key, "dropped stored record");
      }
      stack.extend(self.dependents(next));
    }
  }

  /// Propagate invalidity found by [`check`](Self::check) until it is stable.
  ///
  /// A builder that will run rewrites all of its products, so every checked
  /// product of that builder becomes invalid, and so does everything built
  /// from an invalid node.
  pub fn settle(&mut self, ids: &[NodeId]) {
    loop {
      let mut changed = false;
      for &id in ids {
        let node = &self.nodes[id.0];
        if !node.seen || node.invalid {
          continue;
        }
        let prereq_invalid = self.prerequisites(id).iter().any(|p| self.nodes[p.0].invalid);
        let sibling_invalid = node
          .builder
          .map(|b| {
            self.builders[b.0]
              .products
              .iter()
              .any(|p| self.nodes[p.0].seen && self.nodes[p.0].invalid)
          })
          .unwrap_or(false);

        if prereq_invalid || sibling_invalid {
          self.nodes[id.0].invalid = true;
          self.invalidate_progenitors(id);
          changed = true;
        }
      }
      if !changed {
        break;
      }
    }
  }

  /// Store a fresh record for a completed node.
  pub fn record(&mut self, id: NodeId) -> Result<(), BuildError> {
    let checksum = self.checksum(id)?;
    let builder = match self.nodes[id.0].builder {
      Some(b) => Some(self.builder_signature(b)?),
      None => None,
    };
    let mut sources = BTreeMap::new();
    for prereq in self.prerequisites(id) {
      let current = self.checksum(prereq)?;
      sources.insert(self.nodes[prereq.0].key.clone(), current);
    }

    let key = self.nodes[id.0].key.clone();
    trace!(node = %key, "recorded");
    self.records.insert(
      key,
      NodeRecord {
        checksum,
        builder,
        sources,
      },
    );
    Ok(())
  }

  /// Records to persist: those of nodes that still exist in the graph.
  pub fn records(&self) -> BTreeMap<String, NodeRecord> {
    self
      .records
      .iter()
      .filter(|(key, _)| self.by_key.contains_key(*key))
      .map(|(key, record)| (key.clone(), record.clone()))
      .collect()
  }

  pub fn stored(&self, key: &str) -> Option<&NodeRecord> {
    self.records.get(key)
  }
}

/// Lexically normalize a relative path, resolving `.` and `..`.
fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if !out.pop() {
          out.push("..");
        }
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}
