//! Flat option maps attached to rules, uses and builders.
//!
//! Options are a string-keyed map of booleans, strings and string lists.
//! Merging lets later layers override scalar values while list values
//! accumulate, which is how package defaults, use options and rule options
//! stack onto a single builder.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
  Bool(bool),
  Str(String),
  List(Vec<String>),
}

impl OptionValue {
  /// The value as a list of words, as it is substituted into commands.
  pub fn as_list(&self) -> Vec<String> {
    match self {
      OptionValue::Bool(true) => vec!["1".to_string()],
      OptionValue::Bool(false) => Vec::new(),
      OptionValue::Str(s) => vec![s.clone()],
      OptionValue::List(items) => items.clone(),
    }
  }
}

impl fmt::Display for OptionValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_list().join(" "))
  }
}

impl From<bool> for OptionValue {
  fn from(value: bool) -> Self {
    OptionValue::Bool(value)
  }
}

impl From<&str> for OptionValue {
  fn from(value: &str) -> Self {
    OptionValue::Str(value.to_string())
  }
}

impl From<String> for OptionValue {
  fn from(value: String) -> Self {
    OptionValue::Str(value)
  }
}

impl From<Vec<String>> for OptionValue {
  fn from(value: Vec<String>) -> Self {
    OptionValue::List(value)
  }
}

/// An ordered option map, serialized as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionSet(pub BTreeMap<String, OptionValue>);

impl OptionSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn get(&self, key: &str) -> Option<&OptionValue> {
    self.0.get(key)
  }

  pub fn set(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
    self.0.insert(key.into(), value.into());
  }

  /// Builder-style `set`.
  pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
    self.set(key, value);
    self
  }

  /// A string option. Lists yield their first element.
  pub fn get_str(&self, key: &str) -> Option<&str> {
    match self.0.get(key)? {
      OptionValue::Str(s) => Some(s),
      OptionValue::List(items) => items.first().map(String::as_str),
      OptionValue::Bool(_) => None,
    }
  }

  pub fn get_bool(&self, key: &str) -> Option<bool> {
    match self.0.get(key)? {
      OptionValue::Bool(b) => Some(*b),
      OptionValue::Str(s) => Some(!matches!(s.as_str(), "" | "0" | "false" | "no" | "off")),
      OptionValue::List(items) => Some(!items.is_empty()),
    }
  }

  /// A list option; missing keys yield an empty list.
  pub fn get_list(&self, key: &str) -> Vec<String> {
    self.0.get(key).map(OptionValue::as_list).unwrap_or_default()
  }

  /// Append values to a list option, skipping values already present.
  ///
  /// A scalar value already stored under `key` becomes the first element.
  pub fn append(&mut self, key: &str, values: &[String]) {
    if values.is_empty() {
      return;
    }
    let mut list = self.get_list(key);
    for value in values {
      if !list.contains(value) {
        list.push(value.clone());
      }
    }
    self.0.insert(key.to_string(), OptionValue::List(list));
  }

  /// Layer `other` on top of `self`.
  ///
  /// Scalars in `other` replace those in `self`; when both sides hold a
  /// list, the lists are concatenated without duplicates.
  pub fn merge(&self, other: &OptionSet) -> OptionSet {
    let mut merged = self.clone();
    for (key, value) in &other.0 {
      match (merged.0.get(key), value) {
        (Some(OptionValue::List(_)), OptionValue::List(items)) => merged.append(key, items),
        _ => {
          merged.0.insert(key.clone(), value.clone());
        }
      }
    }
    merged
  }
}
