//! Resolution of use trees to concrete installations.
//!
//! Each root is walked bottom-up. Leaves take the next candidate from their
//! package; groups combine their operands' results into candidate joint
//! selections (`use_sets`). Every set is then checked for mutual
//! compatibility; when members of a set conflict, the cursor of one that
//! still has candidates left advances and the root is walked again. Cursors
//! are cached per use for the whole pass, so a rejected candidate is never
//! offered again. A conflict among members with no candidates left fails
//! the root.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::{Arguments, UseArena, UseId, UseNode, UseOp};
use crate::context::BuildError;
use crate::package::PackageRegistry;

/// Result of walking a use or group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Walk {
  pub found: bool,
  /// Candidate joint selections, each a list of leaves.
  pub use_sets: Vec<Vec<UseId>>,
}

#[derive(Debug, Default)]
pub struct Resolver {
  cursors: HashMap<UseId, usize>,
}

impl Resolver {
  pub fn new() -> Self {
    Self::default()
  }

  /// Resolve every root, failing on the first that cannot be satisfied.
  pub fn resolve_all(
    &mut self,
    uses: &mut UseArena,
    packages: &PackageRegistry,
    args: &Arguments,
    roots: &[UseId],
  ) -> Result<(), BuildError> {
    info!(roots = roots.len(), "resolving uses");
    for &root in roots {
      self.resolve(uses, packages, args, root)?;
    }
    Ok(())
  }

  /// Resolve one root to a compatible selection.
  pub fn resolve(
    &mut self,
    uses: &mut UseArena,
    packages: &PackageRegistry,
    args: &Arguments,
    root: UseId,
  ) -> Result<(), BuildError> {
    loop {
      let walk = self.walk(uses, packages, args, root)?;
      if !walk.found {
        let missing = find_missing(uses, root)
          .into_iter()
          .filter_map(|id| uses.leaf(id).map(|u| u.package.clone()))
          .collect();
        return Err(BuildError::Resolution {
          root: uses.describe(root),
          missing,
        });
      }

      let Some(conflict) = walk
        .use_sets
        .iter()
        .map(|set| resolve_set(uses, set))
        .find(|conflict| !conflict.is_empty())
      else {
        debug!(root = %uses.describe(root), "resolved");
        return Ok(());
      };

      let Some(id) = conflict
        .iter()
        .rev()
        .copied()
        .find(|id| self.has_next(uses, packages, *id))
      else {
        let packages = conflict
          .iter()
          .filter_map(|id| uses.leaf(*id).map(|u| u.package.clone()))
          .collect();
        return Err(BuildError::Conflict {
          root: uses.describe(root),
          packages,
        });
      };
      if let Some(u) = uses.leaf(id) {
        warn!(package = %u.package, "selected installation is incompatible, trying the next one");
      }
      self.reject(uses, id);
    }
  }

  /// Walk a use or group, selecting installations for its leaves.
  pub fn walk(
    &mut self,
    uses: &mut UseArena,
    packages: &PackageRegistry,
    args: &Arguments,
    id: UseId,
  ) -> Result<Walk, BuildError> {
    let walk = match uses.get(id).clone() {
      UseNode::Leaf(_) => Walk {
        found: self.check_package(uses, packages, args, id)?,
        use_sets: vec![vec![id]],
      },
      UseNode::Group(group) => {
        let left = self.walk(uses, packages, args, group.left)?;
        let right = self.walk(uses, packages, args, group.right)?;
        match group.op {
          UseOp::Or => {
            let found = left.found || right.found;
            let use_sets = if left.found { left.use_sets } else { right.use_sets };
            Walk { found, use_sets }
          }
          UseOp::Add => {
            let mut use_sets = Vec::with_capacity(left.use_sets.len() * right.use_sets.len());
            for l in &left.use_sets {
              for r in &right.use_sets {
                let mut set = l.clone();
                set.extend(r.iter().copied());
                use_sets.push(set);
              }
            }
            Walk {
              found: left.found && right.found,
              use_sets,
            }
          }
          UseOp::And => {
            let mut use_sets = left.use_sets;
            use_sets.extend(right.use_sets);
            Walk {
              found: left.found || right.found,
              use_sets,
            }
          }
        }
      }
    };

    uses.set_found(id, walk.found);
    Ok(walk)
  }

  /// Select an installation for a leaf, keeping an existing selection.
  fn check_package(
    &mut self,
    uses: &mut UseArena,
    packages: &PackageRegistry,
    args: &Arguments,
    id: UseId,
  ) -> Result<bool, BuildError> {
    let enabled = uses.enabled(id, args);
    let Some(leaf) = uses.leaf_mut(id) else {
      return Ok(false);
    };
    if !enabled {
      leaf.selected = None;
      return Ok(false);
    }
    if leaf.selected.is_some() {
      return Ok(true);
    }

    let package = packages
      .get(&leaf.package)
      .ok_or_else(|| BuildError::UnknownPackage(leaf.package.clone()))?;
    let cursor = *self.cursors.entry(id).or_insert(0);
    leaf.selected = package.installations().get(cursor).cloned();
    if let Some(installation) = &leaf.selected {
      debug!(package = %leaf.package, installation = installation.key(), "selected installation");
    }
    Ok(leaf.selected.is_some())
  }

  /// Whether the leaf's package offers a candidate after the current one.
  fn has_next(&self, uses: &UseArena, packages: &PackageRegistry, id: UseId) -> bool {
    let Some(leaf) = uses.leaf(id) else {
      return false;
    };
    let cursor = self.cursors.get(&id).copied().unwrap_or(0);
    packages
      .get(&leaf.package)
      .is_some_and(|package| cursor + 1 < package.installations().len())
  }

  /// Drop a leaf's selection and move its cursor to the next candidate.
  fn reject(&mut self, uses: &mut UseArena, id: UseId) {
    if let Some(leaf) = uses.leaf_mut(id) {
      leaf.selected = None;
    }
    *self.cursors.entry(id).or_insert(0) += 1;
  }
}

/// Members of `set` whose installation conflicts with another member's, in
/// set order. Empty when the set is usable as a whole.
pub fn resolve_set(uses: &UseArena, set: &[UseId]) -> Vec<UseId> {
  let selected: Vec<_> = set
    .iter()
    .filter_map(|id| uses.leaf(*id).and_then(|u| u.selected.as_ref()).map(|s| (*id, s)))
    .collect();

  selected
    .iter()
    .filter(|(id, installation)| {
      selected
        .iter()
        .any(|(other, candidate)| other != id && !installation.is_compatible_with(candidate.as_ref()))
    })
    .map(|(id, _)| *id)
    .collect()
}

/// The leaves that keep `id` from being found.
pub fn find_missing(uses: &UseArena, id: UseId) -> Vec<UseId> {
  match uses.get(id) {
    UseNode::Leaf(u) => {
      if u.found {
        Vec::new()
      } else {
        vec![id]
      }
    }
    UseNode::Group(g) => {
      if g.op != UseOp::Add && g.found {
        return Vec::new();
      }
      let mut missing = find_missing(uses, g.left);
      missing.extend(find_missing(uses, g.right));
      missing
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::{NodeGraph, NodeId};
  use crate::options::OptionSet;
  use crate::package::{Installation, InstallationRef, Package, Production};
  use crate::usetree::Condition;
  use std::sync::Arc;

  #[derive(Debug)]
  struct FakeInstallation {
    key: String,
    package: String,
    abi: Option<String>,
  }

  impl Installation for FakeInstallation {
    fn key(&self) -> &str {
      &self.key
    }

    fn package(&self) -> &str {
      &self.package
    }

    fn expand(
      &self,
      _graph: &mut NodeGraph,
      _sources: &[NodeId],
      _use_opts: &OptionSet,
      _rule_opts: &OptionSet,
    ) -> Result<Option<Vec<Production>>, BuildError> {
      Ok(None)
    }

    fn apply(
      &self,
      _graph: &mut NodeGraph,
      _productions: &[Production],
      _use_opts: &OptionSet,
      _rule_opts: &OptionSet,
    ) -> Result<(), BuildError> {
      Ok(())
    }

    fn is_compatible_with(&self, other: &dyn Installation) -> bool {
      match (self.abi(), other.abi()) {
        (Some(a), Some(b)) => a == b,
        _ => true,
      }
    }

    fn abi(&self) -> Option<&str> {
      self.abi.as_deref()
    }
  }

  struct FakePackage {
    name: String,
    found: Vec<InstallationRef>,
  }

  impl Package for FakePackage {
    fn name(&self) -> &str {
      &self.name
    }

    fn search(&mut self) -> Result<bool, BuildError> {
      Ok(true)
    }

    fn check(&mut self) -> Result<(), BuildError> {
      Ok(())
    }

    fn installations(&self) -> Vec<InstallationRef> {
      self.found.clone()
    }

    fn restore(&self, key: &str) -> Option<InstallationRef> {
      self.found.iter().find(|i| i.key() == key).cloned()
    }
  }

  /// Register a package with one installation per ABI tag (`None` = untagged).
  fn package(registry: &mut PackageRegistry, name: &str, abis: &[Option<&str>]) {
    let found = abis
      .iter()
      .enumerate()
      .map(|(i, abi)| {
        Arc::new(FakeInstallation {
          key: format!("{}:{}", name, i),
          package: name.to_string(),
          abi: abi.map(str::to_string),
        }) as InstallationRef
      })
      .collect();
    registry
      .register(Box::new(FakePackage {
        name: name.to_string(),
        found,
      }))
      .unwrap();
  }

  fn leaf(arena: &mut UseArena, name: &str) -> UseId {
    arena.use_package(name, OptionSet::new(), Condition::Always)
  }

  fn selected_key(arena: &UseArena, id: UseId) -> Option<String> {
    arena.leaf(id)?.selected.as_ref().map(|i| i.key().to_string())
  }

  #[test]
  fn leaf_selects_first_candidate() {
    let mut registry = PackageRegistry::new();
    package(&mut registry, "cc", &[None, None]);
    let mut arena = UseArena::new();
    let cc = leaf(&mut arena, "cc");

    let mut resolver = Resolver::new();
    let walk = resolver.walk(&mut arena, &registry, &Arguments::new(), cc).unwrap();
    assert!(walk.found);
    assert_eq!(walk.use_sets, vec![vec![cc]]);
    assert_eq!(selected_key(&arena, cc).as_deref(), Some("cc:0"));
  }

  #[test]
  fn or_prefers_left_and_falls_back_to_right() {
    let mut registry = PackageRegistry::new();
    package(&mut registry, "gcc", &[]);
    package(&mut registry, "clang", &[None]);
    let mut arena = UseArena::new();
    let gcc = leaf(&mut arena, "gcc");
    let clang = leaf(&mut arena, "clang");
    let group = arena.or(gcc, clang);

    let mut resolver = Resolver::new();
    resolver.resolve(&mut arena, &registry, &Arguments::new(), group).unwrap();
    assert!(arena.found(group));
    assert!(!arena.found(gcc));
    assert_eq!(selected_key(&arena, clang).as_deref(), Some("clang:0"));
  }

  #[test]
  fn failed_or_lists_only_missing_leaves() {
    let mut registry = PackageRegistry::new();
    package(&mut registry, "gcc", &[]);
    package(&mut registry, "clang", &[]);
    package(&mut registry, "zlib", &[None]);
    let mut arena = UseArena::new();
    let gcc = leaf(&mut arena, "gcc");
    let clang = leaf(&mut arena, "clang");
    let zlib = leaf(&mut arena, "zlib");
    let compilers = arena.or(gcc, clang);
    let top = arena.add(compilers, zlib);

    let err = Resolver::new()
      .resolve(&mut arena, &registry, &Arguments::new(), top)
      .unwrap_err();
    match err {
      BuildError::Resolution { root, missing } => {
        assert_eq!(root, "(gcc | clang) + zlib");
        assert_eq!(missing, vec!["gcc", "clang"]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn group_algebra_for_found() {
    let mut registry = PackageRegistry::new();
    package(&mut registry, "yes", &[None]);
    package(&mut registry, "no", &[]);
    let args = Arguments::new();

    for (l, r) in [("yes", "yes"), ("yes", "no"), ("no", "yes"), ("no", "no")] {
      let mut arena = UseArena::new();
      let left = leaf(&mut arena, l);
      let right = leaf(&mut arena, r);
      let add = arena.add(left, right);
      let and = arena.and(left, right);
      let or = arena.or(left, right);

      let mut resolver = Resolver::new();
      let lf = resolver.walk(&mut arena, &registry, &args, left).unwrap().found;
      let rf = resolver.walk(&mut arena, &registry, &args, right).unwrap().found;
      let add_walk = resolver.walk(&mut arena, &registry, &args, add).unwrap();
      let and_walk = resolver.walk(&mut arena, &registry, &args, and).unwrap();
      let or_walk = resolver.walk(&mut arena, &registry, &args, or).unwrap();

      assert_eq!(add_walk.found, lf && rf);
      assert_eq!(and_walk.found, lf || rf);
      assert_eq!(or_walk.found, lf || rf);
    }
  }

  #[test]
  fn add_crosses_and_and_concatenates() {
    let mut registry = PackageRegistry::new();
    for name in ["a", "b", "c", "d"] {
      package(&mut registry, name, &[None]);
    }
    let mut arena = UseArena::new();
    let a = leaf(&mut arena, "a");
    let b = leaf(&mut arena, "b");
    let c = leaf(&mut arena, "c");
    let d = leaf(&mut arena, "d");
    let ab = arena.and(a, b);
    let cd = arena.and(c, d);
    let crossed = arena.add(ab, cd);
    let joined = arena.and(ab, cd);

    let mut resolver = Resolver::new();
    let args = Arguments::new();
    assert_eq!(
      resolver.walk(&mut arena, &registry, &args, ab).unwrap().use_sets,
      vec![vec![a], vec![b]]
    );
    assert_eq!(
      resolver.walk(&mut arena, &registry, &args, crossed).unwrap().use_sets,
      vec![vec![a, c], vec![a, d], vec![b, c], vec![b, d]]
    );
    assert_eq!(
      resolver.walk(&mut arena, &registry, &args, joined).unwrap().use_sets,
      vec![vec![a], vec![b], vec![c], vec![d]]
    );
  }

  #[test]
  fn incompatible_selection_advances_the_rejecting_use() {
    let mut registry = PackageRegistry::new();
    package(&mut registry, "cc", &[Some("gnu")]);
    package(&mut registry, "lib", &[Some("msvc"), Some("gnu")]);
    let mut arena = UseArena::new();
    let lib = leaf(&mut arena, "lib");
    let cc = leaf(&mut arena, "cc");
    let top = arena.add(lib, cc);

    Resolver::new()
      .resolve(&mut arena, &registry, &Arguments::new(), top)
      .unwrap();
    assert_eq!(selected_key(&arena, lib).as_deref(), Some("lib:1"));
    assert_eq!(selected_key(&arena, cc).as_deref(), Some("cc:0"));
  }

  #[test]
  fn incompatible_selection_resolves_in_either_order() {
    let mut registry = PackageRegistry::new();
    package(&mut registry, "cc", &[Some("gnu")]);
    package(&mut registry, "lib", &[Some("msvc"), Some("gnu")]);
    let mut arena = UseArena::new();
    let cc = leaf(&mut arena, "cc");
    let lib = leaf(&mut arena, "lib");
    let top = arena.add(cc, lib);

    Resolver::new()
      .resolve(&mut arena, &registry, &Arguments::new(), top)
      .unwrap();
    assert_eq!(selected_key(&arena, cc).as_deref(), Some("cc:0"));
    assert_eq!(selected_key(&arena, lib).as_deref(), Some("lib:1"));
  }

  #[test]
  fn resolve_set_names_every_conflicting_member() {
    let mut registry = PackageRegistry::new();
    package(&mut registry, "cc", &[Some("gnu")]);
    package(&mut registry, "lib", &[Some("msvc")]);
    package(&mut registry, "m", &[None]);
    let mut arena = UseArena::new();
    let cc = leaf(&mut arena, "cc");
    let lib = leaf(&mut arena, "lib");
    let m = leaf(&mut arena, "m");
    let args = Arguments::new();

    let mut resolver = Resolver::new();
    for id in [cc, lib, m] {
      resolver.walk(&mut arena, &registry, &args, id).unwrap();
    }
    assert_eq!(resolve_set(&arena, &[cc, lib, m]), vec![cc, lib]);
    assert!(resolve_set(&arena, &[cc, m]).is_empty());
  }

  #[test]
  fn exhausted_candidates_fail_resolution() {
    let mut registry = PackageRegistry::new();
    package(&mut registry, "cc", &[Some("gnu")]);
    package(&mut registry, "lib", &[Some("msvc")]);
    let mut arena = UseArena::new();
    let lib = leaf(&mut arena, "lib");
    let cc = leaf(&mut arena, "cc");
    let top = arena.add(lib, cc);

    let err = Resolver::new()
      .resolve(&mut arena, &registry, &Arguments::new(), top)
      .unwrap_err();
    match err {
      BuildError::Conflict { root, packages } => {
        assert_eq!(root, "lib + cc");
        assert_eq!(packages, vec!["lib", "cc"]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn resolution_is_idempotent() {
    let mut registry = PackageRegistry::new();
    package(&mut registry, "cc", &[None, None]);
    let mut arena = UseArena::new();
    let cc = leaf(&mut arena, "cc");

    let mut resolver = Resolver::new();
    let args = Arguments::new();
    resolver.resolve(&mut arena, &registry, &args, cc).unwrap();
    let first = selected_key(&arena, cc);
    resolver.resolve(&mut arena, &registry, &args, cc).unwrap();
    assert_eq!(selected_key(&arena, cc), first);
  }

  #[test]
  fn disabled_leaf_is_not_found() {
    let mut registry = PackageRegistry::new();
    package(&mut registry, "cc", &[None]);
    let mut arena = UseArena::new();
    let cc = arena.use_package("cc", OptionSet::new(), Condition::Value(false));

    let walk = Resolver::new()
      .walk(&mut arena, &registry, &Arguments::new(), cc)
      .unwrap();
    assert!(!walk.found);
    assert!(selected_key(&arena, cc).is_none());
  }

  #[test]
  fn unknown_package_is_an_error() {
    let registry = PackageRegistry::new();
    let mut arena = UseArena::new();
    let cc = leaf(&mut arena, "cc");
    let err = Resolver::new()
      .walk(&mut arena, &registry, &Arguments::new(), cc)
      .unwrap_err();
    assert!(matches!(err, BuildError::UnknownPackage(_)));
  }
}
