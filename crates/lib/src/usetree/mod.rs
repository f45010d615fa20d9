//! Package requirements and their `add` / `and` / `or` combinations.
//!
//! A leaf [`Use`] names one package; a [`UseGroup`] combines two operands:
//!
//! - `add` - both sides are required; found only when both are found.
//! - `and` - both sides are wanted; found when either is, and whichever
//!   sides are found take part.
//! - `or` - one side is used; the left one when it is found, else the right.
//!
//! Uses live in a [`UseArena`]. Combining two uses creates a new group and
//! back-links both operands to it; any node without parents is a root.

mod condition;
pub mod resolver;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::context::BuildError;
use crate::node::{NodeGraph, NodeId};
use crate::options::OptionSet;
use crate::package::{InstallationRef, Production};

pub use condition::{Arguments, Condition};
pub use resolver::Resolver;

/// Index of a use or group in the [`UseArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UseId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseOp {
  Add,
  And,
  Or,
}

impl fmt::Display for UseOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let symbol = match self {
      UseOp::Add => "+",
      UseOp::And => "&",
      UseOp::Or => "|",
    };
    write!(f, "{}", symbol)
  }
}

/// A requirement on a single package.
#[derive(Debug, Clone)]
pub struct Use {
  pub package: String,
  pub condition: Condition,
  pub options: OptionSet,
  pub selected: Option<InstallationRef>,
  pub found: bool,
  pub parents: Vec<UseId>,
}

#[derive(Debug, Clone)]
pub struct UseGroup {
  pub op: UseOp,
  pub left: UseId,
  pub right: UseId,
  pub found: bool,
  pub parents: Vec<UseId>,
}

#[derive(Debug, Clone)]
pub enum UseNode {
  Leaf(Use),
  Group(UseGroup),
}

impl UseNode {
  pub fn parents(&self) -> &[UseId] {
    match self {
      UseNode::Leaf(u) => &u.parents,
      UseNode::Group(g) => &g.parents,
    }
  }

  pub fn found(&self) -> bool {
    match self {
      UseNode::Leaf(u) => u.found,
      UseNode::Group(g) => g.found,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct UseArena {
  nodes: Vec<UseNode>,
}

impl UseArena {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn ids(&self) -> impl Iterator<Item = UseId> + '_ {
    (0..self.nodes.len()).map(UseId)
  }

  pub fn get(&self, id: UseId) -> &UseNode {
    &self.nodes[id.0]
  }

  pub fn get_mut(&mut self, id: UseId) -> &mut UseNode {
    &mut self.nodes[id.0]
  }

  /// The leaf at `id`, if it is one.
  pub fn leaf(&self, id: UseId) -> Option<&Use> {
    match &self.nodes[id.0] {
      UseNode::Leaf(u) => Some(u),
      UseNode::Group(_) => None,
    }
  }

  pub fn leaf_mut(&mut self, id: UseId) -> Option<&mut Use> {
    match &mut self.nodes[id.0] {
      UseNode::Leaf(u) => Some(u),
      UseNode::Group(_) => None,
    }
  }

  /// Declare a requirement on `package`.
  pub fn use_package(&mut self, package: impl Into<String>, options: OptionSet, condition: Condition) -> UseId {
    let id = UseId(self.nodes.len());
    self.nodes.push(UseNode::Leaf(Use {
      package: package.into(),
      condition,
      options,
      selected: None,
      found: false,
      parents: Vec::new(),
    }));
    id
  }

  /// Combine two operands under `op`, back-linking both to the new group.
  pub fn combine(&mut self, op: UseOp, left: UseId, right: UseId) -> UseId {
    let id = UseId(self.nodes.len());
    self.nodes.push(UseNode::Group(UseGroup {
      op,
      left,
      right,
      found: false,
      parents: Vec::new(),
    }));
    for operand in [left, right] {
      let parents = match &mut self.nodes[operand.0] {
        UseNode::Leaf(u) => &mut u.parents,
        UseNode::Group(g) => &mut g.parents,
      };
      if !parents.contains(&id) {
        parents.push(id);
      }
    }
    id
  }

  pub fn add(&mut self, left: UseId, right: UseId) -> UseId {
    self.combine(UseOp::Add, left, right)
  }

  pub fn and(&mut self, left: UseId, right: UseId) -> UseId {
    self.combine(UseOp::And, left, right)
  }

  pub fn or(&mut self, left: UseId, right: UseId) -> UseId {
    self.combine(UseOp::Or, left, right)
  }

  pub fn set_found(&mut self, id: UseId, found: bool) {
    match &mut self.nodes[id.0] {
      UseNode::Leaf(u) => u.found = found,
      UseNode::Group(g) => g.found = found,
    }
  }

  pub fn found(&self, id: UseId) -> bool {
    self.nodes[id.0].found()
  }

  /// Roots above the given uses: every node without parents reachable upward.
  pub fn roots_of(&self, ids: impl IntoIterator<Item = UseId>) -> Vec<UseId> {
    let mut roots = Vec::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<UseId> = ids.into_iter().collect();
    stack.reverse();

    while let Some(id) = stack.pop() {
      if !visited.insert(id) {
        continue;
      }
      let parents = self.nodes[id.0].parents();
      if parents.is_empty() {
        roots.push(id);
      } else {
        stack.extend(parents.iter().rev());
      }
    }
    roots
  }

  /// Leaves below `id`, left to right.
  pub fn leaves(&self, id: UseId) -> Vec<UseId> {
    match &self.nodes[id.0] {
      UseNode::Leaf(_) => vec![id],
      UseNode::Group(g) => {
        let mut leaves = self.leaves(g.left);
        leaves.extend(self.leaves(g.right));
        leaves
      }
    }
  }

  /// Human-readable form, e.g. `(gcc | clang) + zlib`.
  pub fn describe(&self, id: UseId) -> String {
    match &self.nodes[id.0] {
      UseNode::Leaf(u) => u.package.clone(),
      UseNode::Group(g) => {
        let side = |side: UseId| match &self.nodes[side.0] {
          UseNode::Leaf(_) => self.describe(side),
          UseNode::Group(_) => format!("({})", self.describe(side)),
        };
        format!("{} {} {}", side(g.left), g.op, side(g.right))
      }
    }
  }

  /// Whether a leaf takes part under the current arguments.
  pub fn enabled(&self, id: UseId, args: &Arguments) -> bool {
    match &self.nodes[id.0] {
      UseNode::Leaf(u) => u.condition.evaluate(args),
      UseNode::Group(_) => true,
    }
  }

  /// Recompute `found` flags from the current selections.
  ///
  /// Used when selections are restored from a previous run instead of being
  /// resolved.
  pub fn refresh_found(&mut self, id: UseId, args: &Arguments) -> bool {
    let found = match self.nodes[id.0].clone() {
      UseNode::Leaf(u) => u.selected.is_some() && u.condition.evaluate(args),
      UseNode::Group(g) => {
        let left = self.refresh_found(g.left, args);
        let right = self.refresh_found(g.right, args);
        match g.op {
          UseOp::Add => left && right,
          UseOp::And | UseOp::Or => left || right,
        }
      }
    };
    self.set_found(id, found);
    found
  }

  /// Expand the tree over a rule's sources into productions.
  ///
  /// Returns `None` when nothing in the tree makes productions.
  pub fn expand(
    &self,
    id: UseId,
    graph: &mut NodeGraph,
    sources: &[NodeId],
    rule_opts: &OptionSet,
    args: &Arguments,
  ) -> Result<Option<Vec<Production>>, BuildError> {
    match &self.nodes[id.0] {
      UseNode::Leaf(u) => {
        if !u.found || !u.condition.evaluate(args) {
          return Ok(None);
        }
        match &u.selected {
          Some(installation) => {
            trace!(package = %u.package, installation = installation.key(), "expanding");
            installation.expand(graph, sources, &u.options, rule_opts)
          }
          None => Ok(None),
        }
      }
      UseNode::Group(g) => match g.op {
        UseOp::Or => {
          if self.found(g.left) {
            self.expand(g.left, graph, sources, rule_opts, args)
          } else if self.found(g.right) {
            self.expand(g.right, graph, sources, rule_opts, args)
          } else {
            Ok(None)
          }
        }
        UseOp::Add | UseOp::And => {
          let only_found = g.op == UseOp::And;
          for (first, other) in [(g.left, g.right), (g.right, g.left)] {
            if only_found && !self.found(first) {
              continue;
            }
            if let Some(productions) = self.expand(first, graph, sources, rule_opts, args)? {
              if !only_found || self.found(other) {
                self.apply(other, graph, &productions, rule_opts, args)?;
              }
              return Ok(Some(productions));
            }
          }
          Ok(None)
        }
      },
    }
  }

  /// Let every selected installation in the tree contribute to `productions`.
  pub fn apply(
    &self,
    id: UseId,
    graph: &mut NodeGraph,
    productions: &[Production],
    rule_opts: &OptionSet,
    args: &Arguments,
  ) -> Result<(), BuildError> {
    match &self.nodes[id.0] {
      UseNode::Leaf(u) => {
        if u.found
          && u.condition.evaluate(args)
          && let Some(installation) = &u.selected
        {
          installation.apply(graph, productions, &u.options, rule_opts)?;
        }
        Ok(())
      }
      UseNode::Group(g) => match g.op {
        UseOp::Or => {
          let side = if self.found(g.left) { g.left } else { g.right };
          self.apply(side, graph, productions, rule_opts, args)
        }
        UseOp::Add | UseOp::And => {
          self.apply(g.left, graph, productions, rule_opts, args)?;
          self.apply(g.right, graph, productions, rule_opts, args)
        }
      },
    }
  }
}
