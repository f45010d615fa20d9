//! Persisted state: node records plus the rule and use graphs of the last run.
//!
//! The rule and use graphs are saved in a flat, key-based form so that the
//! next run can match its freshly declared rules against them and decide
//! whether the previous configuration can be reused.

mod storage;
mod types;

use std::collections::BTreeMap;

pub use storage::StateStore;
pub use types::{PersistedState, RuleEdge, RuleRecord, StateError, UseEdge, UseRecord, UseRecordNode};

use crate::node::NodeRecord;
use crate::rule::RuleSet;
use crate::usetree::{UseArena, UseNode};

impl PersistedState {
  /// Snapshot the current declarations, keyed by arena index.
  pub fn capture(rules: &RuleSet, uses: &UseArena, crcs: BTreeMap<String, NodeRecord>) -> Self {
    let mut state = PersistedState {
      crcs,
      ..Default::default()
    };

    for (id, rule) in rules.iter() {
      state.rules.push(RuleRecord {
        key: id.0 as u64,
        sources: rule.sources.iter().map(|s| s.key()).collect(),
        use_key: rule.use_root.0 as u64,
        condition: rule.condition.clone(),
        options: rule.options.clone(),
      });
      for child in &rule.children {
        state.rule_edges.push(RuleEdge {
          parent: id.0 as u64,
          child: child.0 as u64,
        });
      }
    }

    for id in uses.ids() {
      let key = id.0 as u64;
      let node = match uses.get(id) {
        UseNode::Leaf(u) => UseRecordNode::Leaf {
          package: u.package.clone(),
          condition: u.condition.clone(),
          options: u.options.clone(),
          selected: u.selected.as_ref().map(|i| i.key().to_string()),
        },
        UseNode::Group(g) => {
          state.use_edges.push(UseEdge {
            parent: key,
            child: g.left.0 as u64,
            position: 0,
          });
          state.use_edges.push(UseEdge {
            parent: key,
            child: g.right.0 as u64,
            position: 1,
          });
          UseRecordNode::Group { op: g.op }
        }
      };
      state.uses.push(UseRecord { key, node });
    }

    state
  }

  /// Selection recorded for a use leaf.
  pub fn selection(&self, use_key: u64) -> Option<&str> {
    self.uses.iter().find(|u| u.key == use_key).and_then(|u| match &u.node {
      UseRecordNode::Leaf { selected, .. } => selected.as_deref(),
      UseRecordNode::Group { .. } => None,
    })
  }
}
