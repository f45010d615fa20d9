//! Rules: "these sources, through this use, with these options, make products".
//!
//! A rule's sources are file patterns or other rules, whose products then
//! become this rule's sources. Rules therefore form a DAG of their own, kept
//! as symmetric `parents` / `children` links in a [`RuleSet`].

pub mod matching;

use std::fmt;

use tracing::{debug, info, warn};

use crate::context::BuildError;
use crate::node::{NodeGraph, NodeId};
use crate::options::OptionSet;
use crate::package::Production;
use crate::usetree::{Arguments, Condition, UseArena, UseId};
use crate::util::fs::find_sources;

/// Index of a rule in its [`RuleSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(pub usize);

impl fmt::Display for RuleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "rule:{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSource {
  /// Files whose root-relative path matches this regular expression.
  File(String),
  /// The products of another rule.
  Rule(RuleId),
}

impl RuleSource {
  /// Persisted form: the pattern, or `rule:<key>`.
  pub fn key(&self) -> String {
    match self {
      RuleSource::File(pattern) => pattern.clone(),
      RuleSource::Rule(id) => id.to_string(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Rule {
  pub sources: Vec<RuleSource>,
  pub use_root: UseId,
  pub condition: Condition,
  pub options: OptionSet,
  pub children: Vec<RuleId>,
  pub parents: Vec<RuleId>,
  pub source_nodes: Vec<NodeId>,
  pub product_nodes: Vec<NodeId>,
  pub productions: Vec<Production>,
  pub expanded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
  rules: Vec<Rule>,
}

impl RuleSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Rule ids in declaration order, which is also dependency order.
  pub fn ids(&self) -> impl Iterator<Item = RuleId> + '_ {
    (0..self.rules.len()).map(RuleId)
  }

  pub fn get(&self, id: RuleId) -> &Rule {
    &self.rules[id.0]
  }

  pub fn iter(&self) -> impl Iterator<Item = (RuleId, &Rule)> {
    self.rules.iter().enumerate().map(|(i, r)| (RuleId(i), r))
  }

  /// Declare a rule. Rule sources must already be declared.
  pub fn add(
    &mut self,
    sources: Vec<RuleSource>,
    use_root: UseId,
    options: OptionSet,
    condition: Condition,
  ) -> Result<RuleId, BuildError> {
    let id = RuleId(self.rules.len());
    let mut parents = Vec::new();
    for source in &sources {
      if let RuleSource::Rule(parent) = source {
        if parent.0 >= self.rules.len() {
          return Err(BuildError::UnknownRule(parent.to_string()));
        }
        if !parents.contains(parent) {
          parents.push(*parent);
        }
      }
    }
    for parent in &parents {
      self.rules[parent.0].children.push(id);
    }

    self.rules.push(Rule {
      sources,
      use_root,
      condition,
      options,
      children: Vec::new(),
      parents,
      source_nodes: Vec::new(),
      product_nodes: Vec::new(),
      productions: Vec::new(),
      expanded: false,
    });
    Ok(id)
  }

  /// Use roots of every rule, in declaration order.
  pub fn use_roots(&self) -> Vec<UseId> {
    self.rules.iter().map(|r| r.use_root).collect()
  }

  /// Materialize a rule's sources as nodes.
  ///
  /// Rule sources contribute their products, so parents must be expanded first.
  pub fn find_sources(&self, id: RuleId, graph: &mut NodeGraph) -> Result<Vec<NodeId>, BuildError> {
    let mut nodes = Vec::new();
    for source in &self.rules[id.0].sources {
      let found = match source {
        RuleSource::File(pattern) => find_sources(graph.root(), pattern)?
          .into_iter()
          .map(|path| graph.file(path))
          .collect(),
        RuleSource::Rule(parent) => self.rules[parent.0].product_nodes.clone(),
      };
      for node in found {
        if !nodes.contains(&node) {
          nodes.push(node);
        }
      }
    }
    Ok(nodes)
  }

  /// Expand one rule into productions and wire them into the graph.
  pub fn expand(
    &mut self,
    id: RuleId,
    graph: &mut NodeGraph,
    uses: &UseArena,
    args: &Arguments,
  ) -> Result<(), BuildError> {
    if self.rules[id.0].expanded {
      return Ok(());
    }
    if !self.rules[id.0].condition.evaluate(args) {
      debug!(rule = id.0, "condition is false, skipping");
      self.rules[id.0].expanded = true;
      return Ok(());
    }

    let sources = self.find_sources(id, graph)?;
    if sources.is_empty() {
      warn!(rule = id.0, "no sources matched");
    }

    let rule = &self.rules[id.0];
    let productions = uses
      .expand(rule.use_root, graph, &sources, &rule.options, args)?
      .unwrap_or_default();

    let mut products = Vec::new();
    for production in &productions {
      for product in &production.products {
        if production.sources.contains(product) {
          return Err(BuildError::SelfProduction {
            rule: id.to_string(),
            node: graph.key(*product).to_string(),
          });
        }
        graph.set_producer(*product, production.builder, Some(id));
        for source in &production.sources {
          graph.add_product(*source, *product);
        }
        if !products.contains(product) {
          products.push(*product);
        }
      }
    }

    info!(rule = id.0, sources = sources.len(), products = products.len(), "expanded rule");
    let rule = &mut self.rules[id.0];
    rule.source_nodes = sources;
    rule.product_nodes = products;
    rule.productions = productions;
    rule.expanded = true;
    Ok(())
  }

  /// Expand every rule, parents before children.
  pub fn expand_all(&mut self, graph: &mut NodeGraph, uses: &UseArena, args: &Arguments) -> Result<(), BuildError> {
    for id in (0..self.rules.len()).map(RuleId) {
      self.expand(id, graph, uses, args)?;
    }
    Ok(())
  }
}
