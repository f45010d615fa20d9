//! Packages and their installations.
//!
//! A [`Package`] knows how to find candidate [`Installation`]s on disk. An
//! installation turns a rule's sources into productions (`expand`) or
//! contributes to productions made by another installation (`apply`).
//! Resolution picks one installation per use; the choice is persisted by
//! installation key and brought back with [`Package::restore`].

mod tool;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::builder::BuilderId;
use crate::context::BuildError;
use crate::node::{NodeGraph, NodeId};
use crate::options::OptionSet;

pub use tool::{FeatureSpec, ToolInstallation, ToolPackage, ToolSpec};

/// Upper bound on search rounds before configuration gives up.
const MAX_SEARCH_ROUNDS: usize = 32;

pub type InstallationRef = Arc<dyn Installation>;

/// One `(sources, builder, products)` triple made by expanding a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Production {
  pub sources: Vec<NodeId>,
  pub builder: BuilderId,
  pub products: Vec<NodeId>,
}

pub trait Package {
  fn name(&self) -> &str;

  /// Look for candidate installations. Returns `true` once nothing new was found.
  fn search(&mut self) -> Result<bool, BuildError>;

  /// Validate the candidates after searching has settled.
  fn check(&mut self) -> Result<(), BuildError>;

  /// Candidates in preference order.
  fn installations(&self) -> Vec<InstallationRef>;

  /// Rebuild a previously selected installation without searching.
  ///
  /// Returns `None` if it no longer passes its footprint.
  fn restore(&self, key: &str) -> Option<InstallationRef>;

  /// Whether a use configured with `old` options may keep its selection under `new`.
  fn is_compatible(&self, old: &OptionSet, new: &OptionSet) -> bool {
    old == new
  }
}

pub trait Installation: fmt::Debug {
  /// Stable identity, persisted between runs.
  fn key(&self) -> &str;

  fn package(&self) -> &str;

  /// Make productions from `sources`; `None` when this installation only applies.
  fn expand(
    &self,
    graph: &mut NodeGraph,
    sources: &[NodeId],
    use_opts: &OptionSet,
    rule_opts: &OptionSet,
  ) -> Result<Option<Vec<Production>>, BuildError>;

  /// Contribute to productions made by another installation.
  fn apply(
    &self,
    graph: &mut NodeGraph,
    productions: &[Production],
    use_opts: &OptionSet,
    rule_opts: &OptionSet,
  ) -> Result<(), BuildError>;

  /// Whether this installation can be used together with `other`.
  fn is_compatible_with(&self, _other: &dyn Installation) -> bool {
    true
  }

  /// ABI tag, if the installation declares one.
  fn abi(&self) -> Option<&str> {
    None
  }
}

/// All packages known to a build, by name.
#[derive(Default)]
pub struct PackageRegistry {
  packages: Vec<Box<dyn Package>>,
  by_name: HashMap<String, usize>,
}

impl PackageRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, package: Box<dyn Package>) -> Result<(), BuildError> {
    let name = package.name().to_string();
    if self.by_name.contains_key(&name) {
      return Err(BuildError::Package {
        package: name,
        message: "declared more than once".to_string(),
      });
    }
    self.by_name.insert(name, self.packages.len());
    self.packages.push(package);
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&dyn Package> {
    self.by_name.get(name).map(|idx| self.packages[*idx].as_ref())
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.packages.iter().map(|p| p.name())
  }

  pub fn len(&self) -> usize {
    self.packages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.packages.is_empty()
  }

  /// Search the named packages until none finds anything new, then check them.
  pub fn configure(&mut self, names: &[String]) -> Result<(), BuildError> {
    let mut indices = Vec::new();
    for name in names {
      let idx = *self
        .by_name
        .get(name)
        .ok_or_else(|| BuildError::UnknownPackage(name.clone()))?;
      if !indices.contains(&idx) {
        indices.push(idx);
      }
    }

    info!(packages = indices.len(), "searching for packages");
    let mut rounds = 0;
    loop {
      rounds += 1;
      let mut settled = true;
      for &idx in &indices {
        settled &= self.packages[idx].search()?;
      }
      if settled {
        break;
      }
      if rounds >= MAX_SEARCH_ROUNDS {
        return Err(BuildError::Package {
          package: names.join(", "),
          message: format!("search did not settle after {} rounds", rounds),
        });
      }
    }
    debug!(rounds, "package search settled");

    for &idx in &indices {
      self.packages[idx].check()?;
    }
    Ok(())
  }
}

impl fmt::Debug for PackageRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.names()).finish()
  }
}
