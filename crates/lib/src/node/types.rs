//! Node data types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::builder::BuilderId;
use crate::rule::RuleId;
use crate::util::hash::{ContentHash, ObjectHash};

/// Index of a node in the [`NodeGraph`](super::NodeGraph) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// What a node stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
  /// A file, relative to the build root.
  File(PathBuf),
  /// A non-file value identified by its representation (e.g. an installation slot).
  Value(String),
  /// A target that is rebuilt on every run.
  AlwaysInvalid(String),
}

impl NodeKind {
  /// Stable string key used to persist records across runs.
  pub fn key(&self) -> String {
    match self {
      NodeKind::File(path) => path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"),
      NodeKind::Value(repr) => format!("value:{}", repr),
      NodeKind::AlwaysInvalid(name) => format!("always:{}", name),
    }
  }
}

/// A vertex of the dependency graph.
#[derive(Debug, Clone)]
pub struct Node {
  pub kind: NodeKind,
  pub key: String,
  /// Evaluated during this run; `invalid` is final once set.
  pub seen: bool,
  pub invalid: bool,
  /// Guards against re-entering a node while its prerequisites are evaluated.
  pub(crate) visiting: bool,
  pub builder: Option<BuilderId>,
  pub rule: Option<RuleId>,
  /// Nodes produced from this one.
  pub products: Vec<NodeId>,
  /// Scan-discovered prerequisites (e.g. included headers).
  pub dependencies: Vec<NodeId>,
  /// Back-links of `dependencies`: nodes that list this one as a dependency.
  pub progenitors: Vec<NodeId>,
  /// Cached content checksum, cleared whenever the node's builder runs.
  pub(crate) checksum: Option<Option<ContentHash>>,
}

impl Node {
  pub fn new(kind: NodeKind) -> Self {
    let key = kind.key();
    Self {
      kind,
      key,
      seen: false,
      invalid: false,
      visiting: false,
      builder: None,
      rule: None,
      products: Vec::new(),
      dependencies: Vec::new(),
      progenitors: Vec::new(),
      checksum: None,
    }
  }

  pub fn is_file(&self) -> bool {
    matches!(self.kind, NodeKind::File(_))
  }
}

/// What is remembered about a node between runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeRecord {
  /// Content checksum when the node was last completed.
  pub checksum: Option<ContentHash>,
  /// Signature of the builder that produced the node.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub builder: Option<ObjectHash>,
  /// Checksum of every prerequisite at that time, by node key.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub sources: BTreeMap<String, Option<ContentHash>>,
}
