//! Builders: the commands that turn a production's sources into its products.
//!
//! A builder is attached to every product node of a production. Its actions
//! are command templates rendered against the production's node keys and the
//! merged option set at update time:
//!
//! - `{sources}` / `{products}` - all source / product paths
//! - `{source}` / `{product}` - the first source / product path
//! - `{<option>}` - any other option, list values joined by spaces
//!   (`{binary}` and `{flags}` are the common ones)
//!
//! The rendered commands plus the options form the builder signature that is
//! persisted with each product, so a changed command line invalidates its
//! products on the next run.

pub mod cmd;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::BuildError;
use crate::node::NodeId;
use crate::options::OptionSet;
use crate::util::hash::{HashError, Hashable, ObjectHash};

pub use cmd::{CommandOutput, CommandRunner, ShellRunner};

/// Index of a builder in the node graph's builder arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuilderId(pub usize);

/// A single step of a builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
  /// Run a shell command rendered from `template`.
  ///
  /// `cwd` is relative to the build root; the root itself when absent.
  Command { template: String, cwd: Option<PathBuf> },
}

#[derive(Debug, Clone)]
pub struct Builder {
  pub actions: Vec<Action>,
  pub options: OptionSet,
  pub sources: Vec<NodeId>,
  pub products: Vec<NodeId>,
}

impl Builder {
  pub fn new(actions: Vec<Action>, options: OptionSet, sources: Vec<NodeId>, products: Vec<NodeId>) -> Self {
    Self {
      actions,
      options,
      sources,
      products,
    }
  }

  /// Render every action against the given source and product paths.
  pub fn render(&self, root: &Path, sources: &[String], products: &[String]) -> Vec<PreparedCommand> {
    self
      .actions
      .iter()
      .map(|action| match action {
        Action::Command { template, cwd } => PreparedCommand {
          command: render_template(template, sources, products, &self.options),
          cwd: cwd.as_ref().map(|c| root.join(c)).unwrap_or_else(|| root.to_path_buf()),
        },
      })
      .collect()
  }

  /// The value-identity of this builder, stable across runs.
  pub fn signature(&self, sources: &[String], products: &[String]) -> Result<ObjectHash, HashError> {
    let commands: Vec<String> = self
      .actions
      .iter()
      .map(|action| match action {
        Action::Command { template, cwd } => {
          let rendered = render_template(template, sources, products, &self.options);
          match cwd {
            Some(cwd) => format!("{} (in {})", rendered, cwd.display()),
            None => rendered,
          }
        }
      })
      .collect();

    BuilderSignature {
      commands: &commands,
      options: &self.options,
    }
    .compute_hash()
  }
}

#[derive(Serialize)]
struct BuilderSignature<'a> {
  commands: &'a [String],
  options: &'a OptionSet,
}

impl Hashable for BuilderSignature<'_> {}

/// A rendered command ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
  pub command: String,
  pub cwd: PathBuf,
}

/// Everything needed to run a builder without access to the node graph.
#[derive(Debug, Clone)]
pub struct PreparedBuilder {
  pub id: BuilderId,
  pub commands: Vec<PreparedCommand>,
  /// Parent directories of file products, created before the first command.
  pub directories: Vec<PathBuf>,
}

/// Run a prepared builder, failing on the first command that exits non-zero.
pub fn run_prepared(prepared: &PreparedBuilder, runner: &dyn CommandRunner) -> Result<(), BuildError> {
  for dir in &prepared.directories {
    std::fs::create_dir_all(dir)?;
  }

  for step in &prepared.commands {
    info!(builder = prepared.id.0, cmd = %step.command, "running command");
    let output = runner.run(&step.command, &step.cwd)?;
    if output.code != Some(0) {
      return Err(BuildError::CommandFailed {
        command: step.command.clone(),
        code: output.code,
        stdout: output.stdout,
        stderr: output.stderr,
      });
    }
    if !output.stderr.trim().is_empty() {
      warn!(cmd = %step.command, stderr = %output.stderr.trim_end(), "command wrote to stderr");
    }
    debug!(builder = prepared.id.0, stdout = %output.stdout.trim_end(), "command succeeded");
  }

  Ok(())
}

/// Substitute `{name}` placeholders in a command template.
///
/// Unknown option names render as nothing. A `{` without a matching `}` is
/// kept literally.
pub fn render_template(template: &str, sources: &[String], products: &[String], options: &OptionSet) -> String {
  let mut out = String::with_capacity(template.len());
  let mut rest = template;

  while let Some(start) = rest.find('{') {
    out.push_str(&rest[..start]);
    let after = &rest[start + 1..];
    let Some(end) = after.find('}') else {
      out.push_str(&rest[start..]);
      return out;
    };

    let name = &after[..end];
    let words: Vec<String> = match name {
      "sources" => sources.to_vec(),
      "products" => products.to_vec(),
      "source" => sources.first().cloned().into_iter().collect(),
      "product" => products.first().cloned().into_iter().collect(),
      _ => options.get_list(name),
    };
    out.push_str(&words.iter().map(|w| quote(w)).collect::<Vec<_>>().join(" "));
    rest = &after[end + 1..];
  }

  out.push_str(rest);
  out
}

fn quote(word: &str) -> String {
  let plain = !word.is_empty()
    && word
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "-_./=+:,@%".contains(c));
  if plain {
    word.to_string()
  } else {
    format!("'{}'", word.replace('\'', r"'\''"))
  }
}
