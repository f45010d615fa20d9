//! The build context: one explicit owner for everything a run touches.
//!
//! A [`BuildContext`] holds the node graph, the use arena, the rule set, the
//! package registry, the scanners, the script arguments and the persisted
//! state of the previous run. A run goes through the same steps every time:
//!
//! 1. reuse the previous configuration if the rules still match it, else
//!    search packages and resolve every use tree ([`BuildContext::configure`])
//! 2. expand rules into productions and scan sources ([`BuildContext::expand`])
//! 3. pick targets ([`BuildContext::find_targets`])
//! 4. bring them up to date ([`BuildContext::build`])
//! 5. persist records and declarations ([`BuildContext::save`]), also when the
//!    build failed part way

mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use types::{BuildError, BuildSummary, ContextConfig, Status, TargetStatus};

use crate::builder::CommandRunner;
use crate::consts::CONFIGURE_TARGETS;
use crate::node::{NodeGraph, NodeId};
use crate::package::{PackageRegistry, ToolPackage};
use crate::rule::RuleSet;
use crate::rule::matching::{ReusePlan, RuleGraph, match_rules, plan_reuse, use_existing};
use crate::scan::{IncludeScanner, Scanner};
use crate::schedule::{ExecuteConfig, ScheduleReport, execute};
use crate::script::Declarations;
use crate::state::{PersistedState, StateStore};
use crate::usetree::{Arguments, Resolver, UseArena, UseId};

pub struct BuildContext {
  config: ContextConfig,
  graph: NodeGraph,
  uses: UseArena,
  rules: RuleSet,
  packages: PackageRegistry,
  scanners: Vec<Box<dyn Scanner>>,
  arguments: Arguments,
  previous: Option<PersistedState>,
  store: StateStore,
}

impl BuildContext {
  /// Create a context over declared uses and rules, loading the previous run's state.
  ///
  /// Arguments from `config` override the declared `defaults`.
  pub fn new(
    config: ContextConfig,
    uses: UseArena,
    rules: RuleSet,
    packages: PackageRegistry,
    defaults: &Arguments,
  ) -> Result<Self, BuildError> {
    let store = StateStore::new(&config.state_dir);
    let previous = store.load()?;
    let records = previous.as_ref().map(|s| s.crcs.clone()).unwrap_or_default();

    let mut arguments = config.arguments.clone();
    for (name, value) in defaults.iter() {
      arguments.declare(name, value);
    }

    debug!(
      root = %config.root.display(),
      rules = rules.len(),
      uses = uses.len(),
      records = records.len(),
      "created build context"
    );

    Ok(Self {
      graph: NodeGraph::new(config.root.clone(), records),
      config,
      uses,
      rules,
      packages,
      scanners: vec![Box::new(IncludeScanner::default())],
      arguments,
      previous,
      store,
    })
  }

  /// Create a context from an evaluated build script.
  pub fn from_declarations(config: ContextConfig, declarations: Declarations) -> Result<Self, BuildError> {
    let mut packages = PackageRegistry::new();
    for spec in declarations.packages {
      packages.register(Box::new(ToolPackage::new(spec)))?;
    }
    Self::new(
      config,
      declarations.uses,
      declarations.rules,
      packages,
      &declarations.arguments,
    )
  }

  /// Replace the default scanners.
  pub fn with_scanners(mut self, scanners: Vec<Box<dyn Scanner>>) -> Self {
    self.scanners = scanners;
    self
  }

  pub fn config(&self) -> &ContextConfig {
    &self.config
  }

  pub fn graph(&self) -> &NodeGraph {
    &self.graph
  }

  pub fn uses(&self) -> &UseArena {
    &self.uses
  }

  pub fn rules(&self) -> &RuleSet {
    &self.rules
  }

  pub fn packages(&self) -> &PackageRegistry {
    &self.packages
  }

  pub fn arguments(&self) -> &Arguments {
    &self.arguments
  }

  pub fn store(&self) -> &StateStore {
    &self.store
  }

  /// Use roots of the rules whose conditions hold.
  fn active_roots(&self) -> Vec<UseId> {
    let roots = self
      .rules
      .iter()
      .filter(|(_, rule)| rule.condition.evaluate(&self.arguments))
      .map(|(_, rule)| rule.use_root);
    self.uses.roots_of(roots)
  }

  fn forces_configure(&self, targets: &[String]) -> bool {
    self.config.reconfigure || targets.iter().any(|t| CONFIGURE_TARGETS.contains(&t.as_str()))
  }

  /// Selections to take over from the previous run, if it can be reused.
  fn reuse_plan(&self, targets: &[String]) -> Option<ReusePlan> {
    if self.forces_configure(targets) {
      debug!("reconfiguration requested");
      return None;
    }
    let Some(previous) = &self.previous else {
      debug!("no previous configuration");
      return None;
    };

    let current = PersistedState::capture(&self.rules, &self.uses, BTreeMap::new());
    let (new, old) = (RuleGraph::new(&current), RuleGraph::new(previous));
    let Some(mapping) = match_rules(new.keys(), old.keys(), &new, &old, &self.packages) else {
      info!("rules changed since the last configuration");
      return None;
    };
    plan_reuse(&mapping, &new, &old, &self.packages)
  }

  /// Whether package search and resolution must run before building `targets`.
  pub fn needs_configure(&self, targets: &[String]) -> bool {
    self.reuse_plan(targets).is_none()
  }

  /// Search packages and resolve every active use tree.
  pub fn configure(&mut self) -> Result<(), BuildError> {
    let roots = self.active_roots();
    let mut names: Vec<String> = Vec::new();
    for root in &roots {
      for leaf in self.uses.leaves(*root) {
        if let Some(u) = self.uses.leaf(leaf)
          && !names.contains(&u.package)
        {
          names.push(u.package.clone());
        }
      }
    }

    info!(packages = names.len(), roots = roots.len(), "configuring");
    self.packages.configure(&names)?;

    for id in self.uses.ids().collect::<Vec<_>>() {
      if let Some(leaf) = self.uses.leaf_mut(id) {
        leaf.selected = None;
      }
      self.uses.set_found(id, false);
    }
    Resolver::new().resolve_all(&mut self.uses, &self.packages, &self.arguments, &roots)
  }

  /// Install a reuse plan. Returns `false` if some active use tree is then unsatisfied.
  pub fn reuse_configuration(&mut self, plan: ReusePlan) -> bool {
    use_existing(&mut self.uses, plan);
    let mut satisfied = true;
    for root in self.active_roots() {
      if !self.uses.refresh_found(root, &self.arguments) {
        debug!(root = %self.uses.describe(root), "reused configuration leaves use unsatisfied");
        satisfied = false;
      }
    }
    satisfied
  }

  /// Reuse the previous configuration when possible, configure otherwise.
  ///
  /// Returns whether configuration ran.
  pub fn configure_or_reuse(&mut self, targets: &[String]) -> Result<bool, BuildError> {
    if let Some(plan) = self.reuse_plan(targets)
      && self.reuse_configuration(plan)
    {
      info!("reusing previous configuration");
      return Ok(false);
    }
    self.configure()?;
    Ok(true)
  }

  /// Expand rules into productions, scan sources for dependencies and check for cycles.
  pub fn expand(&mut self) -> Result<(), BuildError> {
    self.rules.expand_all(&mut self.graph, &self.uses, &self.arguments)?;
    self.scan()?;
    self.graph.verify_acyclic()?;
    info!(nodes = self.graph.len(), "expanded build graph");
    Ok(())
  }

  /// Attach scan-discovered dependencies to every existing source file.
  fn scan(&mut self) -> Result<(), BuildError> {
    let root = self.graph.root().to_path_buf();
    let ids: Vec<NodeId> = self.graph.ids().collect();
    let mut found = 0;

    for id in ids {
      let node = self.graph.node(id);
      if node.builder.is_some() || node.products.is_empty() {
        continue;
      }
      let Some(path) = self.graph.path(id) else {
        continue;
      };
      if !path.is_file() {
        continue;
      }
      let relative = path.strip_prefix(&root).unwrap_or(&path).to_path_buf();

      for scanner in &self.scanners {
        if !scanner.accepts(&relative) {
          continue;
        }
        for dependency in scanner.scan(&root, &relative)? {
          let dep = self.graph.file(dependency);
          self.graph.add_dependency(id, dep);
          found += 1;
        }
      }
    }

    debug!(dependencies = found, "scanned sources");
    Ok(())
  }

  /// Resolve target names to nodes.
  ///
  /// Without names, every product nothing else consumes is a target. The
  /// `configure` and `reconfigure` pseudo-targets are skipped.
  pub fn find_targets(&self, names: &[String]) -> Result<Vec<NodeId>, BuildError> {
    let names: Vec<&String> = names
      .iter()
      .filter(|n| !CONFIGURE_TARGETS.contains(&n.as_str()))
      .collect();

    if names.is_empty() {
      let targets: Vec<NodeId> = self
        .graph
        .ids()
        .filter(|id| {
          let node = self.graph.node(*id);
          node.builder.is_some() && self.graph.dependents(*id).is_empty()
        })
        .collect();
      if targets.is_empty() {
        warn!("nothing to build");
      }
      return Ok(targets);
    }

    names
      .into_iter()
      .map(|name| {
        let key = name.trim_start_matches("./");
        self
          .graph
          .find(key)
          .ok_or_else(|| BuildError::UnknownTarget(name.clone()))
      })
      .collect()
  }

  /// Bring `targets` up to date.
  pub async fn build(
    &mut self,
    targets: &[NodeId],
    exec: &ExecuteConfig,
    runner: Arc<dyn CommandRunner>,
  ) -> Result<ScheduleReport, BuildError> {
    execute(&mut self.graph, targets, exec, runner).await
  }

  /// Persist node records and the current declarations.
  pub fn save(&self) -> Result<(), BuildError> {
    let state = PersistedState::capture(&self.rules, &self.uses, self.graph.records());
    self.store.save(&state)?;
    Ok(())
  }

  /// Report which targets are out of date, without building anything.
  pub fn status(&mut self, targets: &[String]) -> Result<Status, BuildError> {
    let needs_configure = self.configure_or_reuse(targets)?;
    self.expand()?;

    let mut status = Status {
      needs_configure,
      targets: Vec::new(),
    };
    for id in self.find_targets(targets)? {
      let out_of_date = self.graph.check(id)?;
      status.targets.push(TargetStatus {
        name: self.graph.key(id).to_string(),
        out_of_date,
      });
    }
    Ok(status)
  }

  /// Configure, expand, build and save.
  ///
  /// State is saved even when the build fails, so completed work is kept.
  /// Only the `configure` / `reconfigure` pseudo-targets means configure
  /// and save without building.
  pub async fn run(
    &mut self,
    targets: &[String],
    exec: &ExecuteConfig,
    runner: Arc<dyn CommandRunner>,
  ) -> Result<BuildSummary, BuildError> {
    let configured = self.configure_or_reuse(targets)?;
    self.expand()?;

    let configure_only = !targets.is_empty() && targets.iter().all(|t| CONFIGURE_TARGETS.contains(&t.as_str()));
    if configure_only {
      self.save()?;
      return Ok(BuildSummary {
        configured,
        ..Default::default()
      });
    }

    let ids = self.find_targets(targets)?;
    let result = self.build(&ids, exec, runner).await;
    let saved = self.save();
    let report = result?;
    saved?;

    let summary = BuildSummary {
      configured,
      targets: ids.iter().map(|id| self.graph.key(*id).to_string()).collect(),
      builders_run: report.builders_run,
      nodes_completed: report.completed.len(),
    };
    info!(
      targets = summary.targets.len(),
      builders_run = summary.builders_run,
      "build finished"
    );
    Ok(summary)
  }
}
