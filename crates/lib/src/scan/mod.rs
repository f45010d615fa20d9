//! Implicit dependency scanning.
//!
//! A [`Scanner`] reads a source file and reports the files it depends on
//! without naming them in a rule, such as headers pulled in by `#include`.
//! Scanned dependencies become plain dependency edges in the node graph, so
//! editing a header invalidates everything built from sources including it.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum ScanError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid include pattern: {0}")]
  Pattern(#[from] regex::Error),
}

pub trait Scanner: Send + Sync {
  fn name(&self) -> &str;

  /// Whether this scanner understands `path`.
  fn accepts(&self, path: &Path) -> bool;

  /// Root-relative paths of the files `path` depends on, transitively.
  fn scan(&self, root: &Path, path: &Path) -> Result<Vec<PathBuf>, ScanError>;
}

const INCLUDE_PATTERN: &str = r#"(?m)^\s*#\s*include\s*(?:<([^>]*)>|"([^"]*)")"#;

/// Follows C-style `#include` directives.
#[derive(Debug, Clone)]
pub struct IncludeScanner {
  extensions: Vec<String>,
  header_dirs: Vec<PathBuf>,
}

impl Default for IncludeScanner {
  fn default() -> Self {
    Self::new(["c", "cc", "cpp", "cxx", "h", "hh", "hpp"], Vec::new())
  }
}

impl IncludeScanner {
  /// `header_dirs` are searched, relative to the root, after the including file's own directory.
  pub fn new<S: Into<String>>(extensions: impl IntoIterator<Item = S>, header_dirs: Vec<PathBuf>) -> Self {
    Self {
      extensions: extensions.into_iter().map(Into::into).collect(),
      header_dirs,
    }
  }

  /// Resolve one include to a root-relative path of an existing file.
  fn locate(&self, root: &Path, from: &Path, include: &str, quoted: bool) -> Option<PathBuf> {
    let mut dirs = Vec::new();
    if quoted && let Some(parent) = from.parent() {
      dirs.push(parent.to_path_buf());
    }
    dirs.extend(self.header_dirs.iter().cloned());

    dirs
      .into_iter()
      .map(|dir| normalize(&dir.join(include)))
      .find(|candidate| root.join(candidate).is_file())
  }
}

impl Scanner for IncludeScanner {
  fn name(&self) -> &str {
    "include"
  }

  fn accepts(&self, path: &Path) -> bool {
    path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
  }

  fn scan(&self, root: &Path, path: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let include_re = Regex::new(INCLUDE_PATTERN)?;
    let mut found = Vec::new();
    let mut seen = HashSet::from([normalize(path)]);
    let mut stack = vec![normalize(path)];

    while let Some(current) = stack.pop() {
      let full = root.join(&current);
      let content = fs::read_to_string(&full).map_err(|source| ScanError::Read { path: full, source })?;

      for caps in include_re.captures_iter(&content) {
        let (include, quoted) = match (caps.get(1), caps.get(2)) {
          (Some(m), _) => (m.as_str(), false),
          (None, Some(m)) => (m.as_str(), true),
          (None, None) => continue,
        };
        let Some(header) = self.locate(root, &current, include, quoted) else {
          trace!(file = %current.display(), include, "include not found under root");
          continue;
        };
        if seen.insert(header.clone()) {
          found.push(header.clone());
          stack.push(header);
        }
      }
    }

    Ok(found)
  }
}

/// Lexically collapse `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      std::path::Component::CurDir => {}
      std::path::Component::ParentDir => {
        out.pop();
      }
      other => out.push(other),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }

  #[test]
  fn accepts_by_extension() {
    let scanner = IncludeScanner::default();
    assert!(scanner.accepts(Path::new("src/main.c")));
    assert!(scanner.accepts(Path::new("include/util.h")));
    assert!(!scanner.accepts(Path::new("README.md")));
    assert!(!scanner.accepts(Path::new("Makefile")));
  }

  #[test]
  fn finds_transitive_headers() {
    let root = tempdir().unwrap();
    write(root.path(), "src/main.c", "#include \"util.h\"\nint main() {}\n");
    write(root.path(), "src/util.h", "#include \"../include/base.h\"\n");
    write(root.path(), "include/base.h", "#define BASE 1\n");

    let found = IncludeScanner::default().scan(root.path(), Path::new("src/main.c")).unwrap();
    assert_eq!(found, vec![PathBuf::from("src/util.h"), PathBuf::from("include/base.h")]);
  }

  #[test]
  fn angle_includes_search_header_dirs() {
    let root = tempdir().unwrap();
    write(root.path(), "src/main.c", "#include <lib.h>\n#include <stdio.h>\n");
    write(root.path(), "include/lib.h", "");

    let scanner = IncludeScanner::new(["c", "h"], vec![PathBuf::from("include")]);
    let found = scanner.scan(root.path(), Path::new("src/main.c")).unwrap();
    assert_eq!(found, vec![PathBuf::from("include/lib.h")]);
  }

  #[test]
  fn include_cycles_terminate() {
    let root = tempdir().unwrap();
    write(root.path(), "a.h", "#include \"b.h\"\n");
    write(root.path(), "b.h", "#include \"a.h\"\n");
    write(root.path(), "main.c", "  #  include \"a.h\"\n");

    let found = IncludeScanner::default().scan(root.path(), Path::new("main.c")).unwrap();
    assert_eq!(found, vec![PathBuf::from("a.h"), PathBuf::from("b.h")]);
  }

  #[test]
  fn missing_source_is_an_error() {
    let root = tempdir().unwrap();
    let err = IncludeScanner::default().scan(root.path(), Path::new("gone.c")).unwrap_err();
    assert!(matches!(err, ScanError::Read { .. }));
  }
}
