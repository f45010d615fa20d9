//! State storage.
//!
//! # Storage Layout
//!
//! ```text
//! {root}/.use/
//! └── state.json      # PersistedState: node records, rule and use graphs
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::{PersistedState, StateError};
use crate::consts::{STATE_FILENAME, STATE_VERSION};

/// Reads and writes the persisted state of one build root.
#[derive(Debug, Clone)]
pub struct StateStore {
  dir: PathBuf,
}

impl StateStore {
  /// A store keeping its file in `dir`.
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn path(&self) -> PathBuf {
    self.dir.join(STATE_FILENAME)
  }

  /// Load the state of the previous run.
  ///
  /// Returns `Ok(None)` if no run has saved state yet.
  pub fn load(&self) -> Result<Option<PersistedState>, StateError> {
    let path = self.path();
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StateError::Read(e)),
    };

    let state: PersistedState = serde_json::from_str(&content).map_err(StateError::Parse)?;
    if state.version != STATE_VERSION {
      return Err(StateError::UnsupportedVersion(state.version));
    }

    debug!(path = %path.display(), records = state.crcs.len(), rules = state.rules.len(), "loaded state");
    Ok(Some(state))
  }

  /// Save the state.
  ///
  /// Uses atomic write (write to temp, then rename) to prevent corruption.
  pub fn save(&self, state: &PersistedState) -> Result<(), StateError> {
    fs::create_dir_all(&self.dir).map_err(StateError::CreateDir)?;

    let path = self.path();
    let temp_path = self.dir.join(format!("{}.tmp", STATE_FILENAME));

    let content = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;
    fs::write(&temp_path, &content).map_err(StateError::Write)?;
    fs::rename(&temp_path, &path).map_err(StateError::Write)?;

    debug!(path = %path.display(), records = state.crcs.len(), "saved state");
    Ok(())
  }

  /// Remove the saved state, forcing the next run to configure.
  pub fn clear(&self) -> Result<(), StateError> {
    match fs::remove_file(self.path()) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(StateError::Write(e)),
    }
  }
}
