//! Pattern-based source discovery.
//!
//! Rules name their file sources with regular expressions matched against
//! paths relative to the build root. Discovery walks the root once per
//! pattern, skipping the state directory and hidden directories.

use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

use crate::consts::STATE_DIR;

#[derive(Debug, Error)]
pub enum DiscoverError {
  #[error("invalid source pattern '{pattern}': {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: regex::Error,
  },

  #[error("failed to walk '{path}': {message}")]
  Walk { path: PathBuf, message: String },
}

/// Find all files under `root` whose relative path matches `pattern`.
///
/// The pattern is anchored at the start of the relative path (the same way
/// a rule's source expression has always been applied). Paths are returned
/// relative to `root`, using `/` separators, sorted for determinism.
pub fn find_sources(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, DiscoverError> {
  let anchored = if pattern.starts_with('^') {
    pattern.to_string()
  } else {
    format!("^(?:{})", pattern)
  };
  let regex = Regex::new(&anchored).map_err(|source| DiscoverError::Pattern {
    pattern: pattern.to_string(),
    source,
  })?;

  let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|e| {
    if e.depth() == 0 || !e.file_type().is_dir() {
      return true;
    }
    e.file_name()
      .to_str()
      .map(|name| name != STATE_DIR && !name.starts_with('.'))
      .unwrap_or(true)
  });

  let mut found = Vec::new();
  for entry in walker {
    let entry = entry.map_err(|e| DiscoverError::Walk {
      path: root.to_path_buf(),
      message: e.to_string(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let Ok(rel) = entry.path().strip_prefix(root) else {
      continue;
    };
    let rel = rel
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");

    if regex.is_match(&rel) {
      found.push(PathBuf::from(rel));
    }
  }

  found.sort();
  Ok(found)
}
