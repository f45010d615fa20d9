//! Conditions on uses and rules, and the script arguments they read.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Script arguments, set with `-D name=value` or declared with a default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments(BTreeMap<String, String>);

impl Arguments {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.0.insert(name.into(), value.into());
  }

  /// Set `name` only if it has no value yet.
  pub fn declare(&mut self, name: impl Into<String>, default: impl Into<String>) {
    self.0.entry(name.into()).or_insert_with(|| default.into());
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(name).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Defined and not one of `0`, `false`, `no`, `off` or empty.
  pub fn is_true(&self, name: &str) -> bool {
    self
      .get(name)
      .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "" | "0" | "false" | "no" | "off"))
      .unwrap_or(false)
  }

  /// Parse `name=value`; a bare `name` means `name=1`.
  pub fn parse_define(define: &str) -> (String, String) {
    match define.split_once('=') {
      Some((name, value)) => (name.trim().to_string(), value.to_string()),
      None => (define.trim().to_string(), "1".to_string()),
    }
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Arguments {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

/// When a use or rule takes part in the build.
///
/// Two `Argument` conditions are equal when they name the same argument,
/// whatever its value in either run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Condition {
  #[default]
  Always,
  Value(bool),
  Argument(String),
}

impl Condition {
  pub fn evaluate(&self, args: &Arguments) -> bool {
    match self {
      Condition::Always => true,
      Condition::Value(value) => *value,
      Condition::Argument(name) => args.is_true(name),
    }
  }
}

impl fmt::Display for Condition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Condition::Always => write!(f, "always"),
      Condition::Value(value) => write!(f, "{}", value),
      Condition::Argument(name) => write!(f, "arg({})", name),
    }
  }
}
