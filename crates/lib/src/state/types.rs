use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::STATE_VERSION;
use crate::node::NodeRecord;
use crate::options::OptionSet;
use crate::usetree::{Condition, UseOp};

/// Errors reading or writing the persisted state.
#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to create state directory: {0}")]
  CreateDir(#[source] std::io::Error),

  #[error("failed to read state: {0}")]
  Read(#[source] std::io::Error),

  #[error("failed to write state: {0}")]
  Write(#[source] std::io::Error),

  #[error("failed to parse state: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported state version: {0}")]
  UnsupportedVersion(u32),
}

/// Everything a run leaves behind for the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
  pub version: u32,
  /// Node records by node key.
  #[serde(default)]
  pub crcs: BTreeMap<String, NodeRecord>,
  #[serde(default)]
  pub rules: Vec<RuleRecord>,
  #[serde(default)]
  pub rule_edges: Vec<RuleEdge>,
  #[serde(default)]
  pub uses: Vec<UseRecord>,
  #[serde(default)]
  pub use_edges: Vec<UseEdge>,
}

impl Default for PersistedState {
  fn default() -> Self {
    Self {
      version: STATE_VERSION,
      crcs: BTreeMap::new(),
      rules: Vec::new(),
      rule_edges: Vec::new(),
      uses: Vec::new(),
      use_edges: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
  pub key: u64,
  /// File patterns, or `rule:<key>` for rule sources.
  pub sources: Vec<String>,
  pub use_key: u64,
  pub condition: Condition,
  pub options: OptionSet,
}

/// `parent` is a source of `child`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEdge {
  pub parent: u64,
  pub child: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseRecord {
  pub key: u64,
  #[serde(flatten)]
  pub node: UseRecordNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UseRecordNode {
  Leaf {
    package: String,
    condition: Condition,
    options: OptionSet,
    /// Key of the selected installation.
    selected: Option<String>,
  },
  Group {
    op: UseOp,
  },
}

/// `child` is the left (`position` 0) or right (1) operand of `parent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseEdge {
  pub parent: u64,
  pub child: u64,
  pub position: u8,
}
