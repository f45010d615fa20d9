//! Matching freshly declared rules against the rules of the previous run.
//!
//! Both sides are compared in their persisted form, so a [`RuleGraph`] is
//! built over a [`PersistedState`] for the old run and over a capture of the
//! current declarations for the new one. A successful match maps every new
//! rule key onto a distinct, compatible old rule key, with parents mapped onto
//! parents. The mapping then says which installation each new use leaf can
//! take over without searching.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use crate::options::OptionSet;
use crate::package::{InstallationRef, PackageRegistry};
use crate::state::{PersistedState, RuleRecord, UseRecordNode};
use crate::usetree::{UseArena, UseId};

/// Rule and use graphs of one run, indexed by key.
#[derive(Debug)]
pub struct RuleGraph<'a> {
  rules: HashMap<u64, &'a RuleRecord>,
  order: Vec<u64>,
  parents: HashMap<u64, Vec<u64>>,
  uses: HashMap<u64, &'a UseRecordNode>,
  operands: HashMap<u64, [Option<u64>; 2]>,
}

impl<'a> RuleGraph<'a> {
  pub fn new(state: &'a PersistedState) -> Self {
    let mut parents: HashMap<u64, Vec<u64>> = HashMap::new();
    for edge in &state.rule_edges {
      let list = parents.entry(edge.child).or_default();
      if !list.contains(&edge.parent) {
        list.push(edge.parent);
      }
    }

    let mut operands: HashMap<u64, [Option<u64>; 2]> = HashMap::new();
    for edge in &state.use_edges {
      if let Some(slot) = operands.entry(edge.parent).or_default().get_mut(edge.position as usize) {
        *slot = Some(edge.child);
      }
    }

    Self {
      rules: state.rules.iter().map(|r| (r.key, r)).collect(),
      order: state.rules.iter().map(|r| r.key).collect(),
      parents,
      uses: state.uses.iter().map(|u| (u.key, &u.node)).collect(),
      operands,
    }
  }

  /// Rule keys in declaration order.
  pub fn keys(&self) -> &[u64] {
    &self.order
  }

  pub fn rule(&self, key: u64) -> Option<&'a RuleRecord> {
    self.rules.get(&key).copied()
  }

  pub fn parents(&self, key: u64) -> &[u64] {
    self.parents.get(&key).map(Vec::as_slice).unwrap_or(&[])
  }

  fn use_node(&self, key: u64) -> Option<&'a UseRecordNode> {
    self.uses.get(&key).copied()
  }

  fn operands(&self, key: u64) -> Option<(u64, u64)> {
    match self.operands.get(&key) {
      Some([Some(left), Some(right)]) => Some((*left, *right)),
      _ => None,
    }
  }
}

/// Map every new rule onto a distinct compatible old rule.
///
/// Returns `None` if no such one-to-one mapping exists.
pub fn match_rules(
  new_keys: &[u64],
  old_keys: &[u64],
  new: &RuleGraph<'_>,
  old: &RuleGraph<'_>,
  packages: &PackageRegistry,
) -> Option<BTreeMap<u64, u64>> {
  if new_keys.len() != old_keys.len() {
    return None;
  }
  let Some((&first, rest)) = new_keys.split_first() else {
    return Some(BTreeMap::new());
  };

  for (i, &candidate) in old_keys.iter().enumerate() {
    if !is_compatible(first, candidate, new, old, packages) {
      continue;
    }
    trace!(new = first, old = candidate, "trying rule pairing");

    let Some(parent_map) = match_rules(new.parents(first), old.parents(candidate), new, old, packages) else {
      continue;
    };

    let remaining: Vec<u64> = old_keys
      .iter()
      .enumerate()
      .filter(|(j, _)| *j != i)
      .map(|(_, k)| *k)
      .collect();
    let Some(rest_map) = match_rules(rest, &remaining, new, old, packages) else {
      continue;
    };

    let mut mapping = BTreeMap::from([(first, candidate)]);
    if merge(&mut mapping, parent_map) && merge(&mut mapping, rest_map) {
      return Some(mapping);
    }
  }
  None
}

/// Merge `other` into `mapping`; fails if a key or value would map twice.
fn merge(mapping: &mut BTreeMap<u64, u64>, other: BTreeMap<u64, u64>) -> bool {
  for (new_key, old_key) in other {
    match mapping.get(&new_key) {
      Some(existing) if *existing != old_key => return false,
      Some(_) => continue,
      None => {
        if mapping.values().any(|v| *v == old_key) {
          return false;
        }
        mapping.insert(new_key, old_key);
      }
    }
  }
  true
}

/// Whether two rules could share a configuration: same sources, condition
/// and options, and use trees of the same shape whose leaves name the same
/// packages with options those packages accept as compatible.
pub fn is_compatible(
  new_key: u64,
  old_key: u64,
  new: &RuleGraph<'_>,
  old: &RuleGraph<'_>,
  packages: &PackageRegistry,
) -> bool {
  let (Some(n), Some(o)) = (new.rule(new_key), old.rule(old_key)) else {
    return false;
  };

  split_sources(&n.sources) == split_sources(&o.sources)
    && n.condition == o.condition
    && n.options == o.options
    && uses_compatible(n.use_key, o.use_key, new, old, packages)
}

/// Sorted file patterns and the number of rule sources.
fn split_sources(sources: &[String]) -> (Vec<&str>, usize) {
  let (mut patterns, rules): (Vec<&str>, Vec<&str>) =
    sources.iter().map(String::as_str).partition(|s| !s.starts_with("rule:"));
  patterns.sort_unstable();
  (patterns, rules.len())
}

fn uses_compatible(
  new_key: u64,
  old_key: u64,
  new: &RuleGraph<'_>,
  old: &RuleGraph<'_>,
  packages: &PackageRegistry,
) -> bool {
  match (new.use_node(new_key), old.use_node(old_key)) {
    (
      Some(UseRecordNode::Leaf {
        package,
        condition,
        options,
        ..
      }),
      Some(UseRecordNode::Leaf {
        package: old_package,
        condition: old_condition,
        options: old_options,
        ..
      }),
    ) => {
      package == old_package
        && condition == old_condition
        && leaf_options_compatible(package, old_options, options, packages)
    }
    (Some(UseRecordNode::Group { op }), Some(UseRecordNode::Group { op: old_op })) if op == old_op => {
      match (new.operands(new_key), old.operands(old_key)) {
        (Some((nl, nr)), Some((ol, or))) => {
          uses_compatible(nl, ol, new, old, packages) && uses_compatible(nr, or, new, old, packages)
        }
        _ => false,
      }
    }
    _ => false,
  }
}

fn leaf_options_compatible(package: &str, old: &OptionSet, new: &OptionSet, packages: &PackageRegistry) -> bool {
  match packages.get(package) {
    Some(pkg) => pkg.is_compatible(old, new),
    None => old == new,
  }
}

/// Selections to carry over, one entry per new use leaf.
pub type ReusePlan = Vec<(UseId, Option<InstallationRef>)>;

/// Pair the use leaves of matched rules and restore the old selections.
///
/// Returns `None` if an old selection can no longer be restored, or if a
/// shared leaf would receive two different selections.
pub fn plan_reuse(
  mapping: &BTreeMap<u64, u64>,
  new: &RuleGraph<'_>,
  old: &RuleGraph<'_>,
  packages: &PackageRegistry,
) -> Option<ReusePlan> {
  let mut pairs = Vec::new();
  for (&new_key, &old_key) in mapping {
    let (n, o) = (new.rule(new_key)?, old.rule(old_key)?);
    pair_leaves(n.use_key, o.use_key, new, old, &mut pairs)?;
  }

  let mut chosen: BTreeMap<u64, Option<&str>> = BTreeMap::new();
  let mut plan = Vec::new();
  for (new_leaf, old_leaf) in pairs {
    let Some(UseRecordNode::Leaf { package, selected, .. }) = old.use_node(old_leaf) else {
      return None;
    };
    let selected = selected.as_deref();
    match chosen.get(&new_leaf) {
      Some(previous) if *previous == selected => continue,
      Some(_) => return None,
      None => {
        chosen.insert(new_leaf, selected);
      }
    }

    let installation = match selected {
      Some(key) => {
        let restored = packages.get(package)?.restore(key);
        if restored.is_none() {
          debug!(package = %package, installation = key, "previous selection is gone");
        }
        Some(restored?)
      }
      None => None,
    };
    plan.push((UseId(new_leaf as usize), installation));
  }
  Some(plan)
}

fn pair_leaves(
  new_key: u64,
  old_key: u64,
  new: &RuleGraph<'_>,
  old: &RuleGraph<'_>,
  pairs: &mut Vec<(u64, u64)>,
) -> Option<()> {
  match (new.use_node(new_key)?, old.use_node(old_key)?) {
    (UseRecordNode::Leaf { .. }, UseRecordNode::Leaf { .. }) => {
      pairs.push((new_key, old_key));
      Some(())
    }
    (UseRecordNode::Group { .. }, UseRecordNode::Group { .. }) => {
      let (nl, nr) = new.operands(new_key)?;
      let (ol, or) = old.operands(old_key)?;
      pair_leaves(nl, ol, new, old, pairs)?;
      pair_leaves(nr, or, new, old, pairs)
    }
    _ => None,
  }
}

/// Install the planned selections into the arena.
pub fn use_existing(uses: &mut UseArena, plan: ReusePlan) {
  for (id, installation) in plan {
    if let Some(leaf) = uses.leaf_mut(id) {
      leaf.selected = installation;
    }
  }
}
