//! Build script evaluation.
//!
//! A build script is a Lua file (`build.lua` by default) that declares tool
//! packages, uses of them and rules over the project's sources. Evaluating it
//! fills a [`Declarations`] value, which [`crate::context::BuildContext`]
//! takes over.
//!
//! ```lua
//! package {
//!   name = "gcc",
//!   binaries = { "gcc" },
//!   command = "{binary} -c {source} -o {product} {flags}",
//!   suffix = ".o",
//! }
//! package { name = "ld", binaries = { "gcc" }, command = "{binary} -o {product} {sources}", single = true }
//!
//! local debug = argument("debug", false)
//! local objects = rule([[src/.*\.c$]], use("gcc", { flags = "-g" }, debug) + use("gcc"))
//! rule(objects, use("ld"), { target = "app" })
//! ```

mod globals;
mod runtime;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::prelude::*;
use tracing::{debug, info};

pub use globals::{LuaCondition, LuaRule, LuaUse};
pub use runtime::{create_runtime, load_file};

use crate::package::ToolSpec;
use crate::rule::RuleSet;
use crate::usetree::{Arguments, UseArena};

/// Lua errors are kept as rendered text: `mlua::Error` is not `Send`, and
/// script errors travel inside [`crate::context::BuildError`] across tasks.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
  #[error("lua error: {0}")]
  Lua(String),

  #[error("cannot read build script '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl From<LuaError> for ScriptError {
  fn from(err: LuaError) -> Self {
    ScriptError::Lua(err.to_string())
  }
}

/// Everything a build script declared.
#[derive(Debug, Default)]
pub struct Declarations {
  pub packages: Vec<ToolSpec>,
  pub uses: UseArena,
  pub rules: RuleSet,
  /// Argument defaults from `argument(name, default)`.
  pub arguments: Arguments,
}

/// Evaluate the build script at `path`.
pub fn evaluate_script(path: &Path) -> Result<Declarations, ScriptError> {
  if !path.is_file() {
    return Err(ScriptError::Read {
      path: path.to_path_buf(),
      source: std::io::Error::from(std::io::ErrorKind::NotFound),
    });
  }
  let script_dir = path.parent().unwrap_or(Path::new("."));
  let decls = Rc::new(RefCell::new(Declarations::default()));

  {
    let lua = runtime::create_runtime(decls.clone(), script_dir)?;
    runtime::load_file(&lua, path)?;
  }

  let decls = std::mem::take(&mut *decls.borrow_mut());
  info!(
    path = %path.display(),
    packages = decls.packages.len(),
    rules = decls.rules.len(),
    "evaluated build script"
  );
  Ok(decls)
}

/// Evaluate script source held in memory; `require` resolves against the
/// current directory.
pub fn evaluate_str(source: &str, name: &str) -> Result<Declarations, ScriptError> {
  let decls = Rc::new(RefCell::new(Declarations::default()));
  {
    let lua = runtime::create_runtime(decls.clone(), Path::new("."))?;
    lua.load(source).set_name(format!("={}", name)).exec()?;
  }
  let decls = std::mem::take(&mut *decls.borrow_mut());
  debug!(name, uses = decls.uses.len(), rules = decls.rules.len(), "evaluated script source");
  Ok(decls)
}
