//! A generic command-line tool package.
//!
//! A tool is found by its footprint: a location in which every declared
//! binary, header and library exists. Candidate locations are the explicit
//! `locations` followed by every `PATH` entry (a `bin` entry stands for its
//! parent prefix). A location is searched the conventional way: binaries in
//! `<dir>` or `<dir>/bin`, headers in `<dir>/include`, libraries in
//! `<dir>/lib` or `<dir>/lib64`.
//!
//! A tool with a `command` turns sources into products, either one product
//! per source or a single combined product. Any tool applied to another
//! tool's productions adds its `flags`, then its header directories to
//! compile steps or its library directories and libraries to link steps.
//!
//! An optional `version` tags installation keys; with a `version_command`
//! only installations whose command output mentions the version survive
//! [`Package::check`]. Optional `features` are extra footprints looked up in
//! each installation's location.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Installation, InstallationRef, Package, Production};
use crate::builder::{Action, Builder, CommandRunner, ShellRunner, render_template};
use crate::context::BuildError;
use crate::node::{NodeGraph, NodeId, NodeKind};
use crate::options::{OptionSet, OptionValue};

/// Declaration of a tool, as written in the build script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
  pub name: String,
  #[serde(default)]
  pub binaries: Vec<String>,
  /// Header files, relative to an include directory.
  #[serde(default)]
  pub headers: Vec<String>,
  /// Library names without platform prefix or extension, e.g. `z`.
  #[serde(default)]
  pub libraries: Vec<String>,
  #[serde(default)]
  pub locations: Vec<PathBuf>,
  /// Also look in every `PATH` entry.
  #[serde(default = "default_true")]
  pub search_path: bool,
  pub command: Option<String>,
  /// Productions of this tool compile: applied tools add header dirs, not libraries.
  #[serde(default)]
  pub compile: bool,
  /// Replaces the source extension, e.g. `.o`.
  pub suffix: Option<String>,
  /// Directory products are placed under.
  pub prefix: Option<String>,
  /// Leading source directories dropped from product paths.
  #[serde(default)]
  pub target_strip_dirs: usize,
  /// Make one product from all sources.
  #[serde(default)]
  pub single: bool,
  pub target: Option<String>,
  #[serde(default)]
  pub flags: Vec<String>,
  pub abi: Option<String>,
  pub version: Option<String>,
  /// Command whose output must mention `version`; `{binary}` is available.
  pub version_command: Option<String>,
  #[serde(default)]
  pub features: Vec<FeatureSpec>,
}

/// An optional part of a package, present when its own footprint is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
  pub name: String,
  #[serde(default)]
  pub binaries: Vec<String>,
  #[serde(default)]
  pub headers: Vec<String>,
  #[serde(default)]
  pub libraries: Vec<String>,
}

fn default_true() -> bool {
  true
}

impl ToolSpec {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      binaries: Vec::new(),
      headers: Vec::new(),
      libraries: Vec::new(),
      locations: Vec::new(),
      search_path: true,
      command: None,
      compile: false,
      suffix: None,
      prefix: None,
      target_strip_dirs: 0,
      single: false,
      target: None,
      flags: Vec::new(),
      abi: None,
      version: None,
      version_command: None,
      features: Vec::new(),
    }
  }

  fn looks_for_files(&self) -> bool {
    !(self.binaries.is_empty() && self.headers.is_empty() && self.libraries.is_empty())
  }

  /// Prefix of installation keys: the name, plus `@version` when tagged.
  fn key_prefix(&self) -> String {
    match &self.version {
      Some(version) => format!("{}@{}", self.name, version),
      None => self.name.clone(),
    }
  }

  /// What `dir` provides of this tool, if it holds every declared file.
  fn footprint(&self, dir: &Path) -> Option<Footprint> {
    Footprint::find(dir, &self.binaries, &self.headers, &self.libraries)
  }
}

/// Files found for one installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Footprint {
  binaries: Vec<PathBuf>,
  header_dirs: Vec<PathBuf>,
  library_dirs: Vec<PathBuf>,
  libraries: Vec<String>,
}

impl Footprint {
  fn find(dir: &Path, binaries: &[String], headers: &[String], libraries: &[String]) -> Option<Self> {
    let mut found = Footprint::default();

    let binary_dirs = [dir.to_path_buf(), dir.join("bin")];
    for bin in binaries {
      let Some(path) = binary_dirs.iter().map(|d| binary_path(d, bin)).find(|p| p.is_file()) else {
        debug!(dir = %dir.display(), binary = %bin, "binary not found");
        return None;
      };
      found.binaries.push(path);
    }

    let header_dirs = [dir.join("include"), dir.to_path_buf()];
    for header in headers {
      let Some(hdr_dir) = header_dirs.iter().find(|d| d.join(header).is_file()) else {
        debug!(dir = %dir.display(), header = %header, "header not found");
        return None;
      };
      push_unique(&mut found.header_dirs, hdr_dir.clone());
    }

    let library_dirs = [dir.join("lib"), dir.join("lib64"), dir.to_path_buf()];
    for lib in libraries {
      let Some(lib_dir) = library_dirs
        .iter()
        .find(|d| library_files(lib).iter().any(|f| d.join(f).is_file()))
      else {
        debug!(dir = %dir.display(), library = %lib, "library not found");
        return None;
      };
      push_unique(&mut found.library_dirs, lib_dir.clone());
      push_unique(&mut found.libraries, lib.clone());
    }

    Some(found)
  }

  fn extend(&mut self, other: Footprint) {
    for dir in other.header_dirs {
      push_unique(&mut self.header_dirs, dir);
    }
    for dir in other.library_dirs {
      push_unique(&mut self.library_dirs, dir);
    }
    for lib in other.libraries {
      push_unique(&mut self.libraries, lib);
    }
  }
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
  if !list.contains(&item) {
    list.push(item);
  }
}

#[cfg(windows)]
fn binary_path(dir: &Path, bin: &str) -> PathBuf {
  let plain = dir.join(bin);
  if plain.is_file() { plain } else { dir.join(format!("{}.exe", bin)) }
}

#[cfg(not(windows))]
fn binary_path(dir: &Path, bin: &str) -> PathBuf {
  dir.join(bin)
}

/// File names a library may have, shared before static.
#[cfg(windows)]
fn library_files(lib: &str) -> Vec<String> {
  vec![format!("{}.lib", lib), format!("{}.dll", lib), format!("lib{}.a", lib)]
}

#[cfg(target_os = "macos")]
fn library_files(lib: &str) -> Vec<String> {
  vec![format!("lib{}.dylib", lib), format!("lib{}.a", lib)]
}

#[cfg(not(any(windows, target_os = "macos")))]
fn library_files(lib: &str) -> Vec<String> {
  vec![format!("lib{}.so", lib), format!("lib{}.a", lib)]
}

/// The prefix a `PATH` entry stands for: `/usr/bin` is searched as `/usr`.
fn path_entry_location(entry: PathBuf) -> PathBuf {
  match (entry.file_name(), entry.parent()) {
    (Some(name), Some(parent)) if name == "bin" && !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => entry,
  }
}

#[derive(Debug)]
pub struct ToolPackage {
  spec: Arc<ToolSpec>,
  found: Vec<Arc<ToolInstallation>>,
}

impl ToolPackage {
  pub fn new(spec: ToolSpec) -> Self {
    Self {
      spec: Arc::new(spec),
      found: Vec::new(),
    }
  }

  pub fn spec(&self) -> &ToolSpec {
    &self.spec
  }

  fn candidates(&self) -> Vec<PathBuf> {
    let mut dirs = self.spec.locations.clone();
    if self.spec.search_path
      && self.spec.looks_for_files()
      && let Some(path) = std::env::var_os("PATH")
    {
      for entry in std::env::split_paths(&path) {
        push_unique(&mut dirs, path_entry_location(entry));
      }
    }
    if dirs.is_empty() && !self.spec.looks_for_files() {
      // Nothing to look for: a flags-only tool has exactly one installation.
      dirs.push(PathBuf::new());
    }
    dirs
  }

  /// An installation at `dir`, if `dir` passes the footprint.
  fn installation(&self, dir: PathBuf) -> Option<ToolInstallation> {
    let footprint = self.spec.footprint(&dir)?;
    let mut installation = ToolInstallation {
      key: format!("{}:{}", self.spec.key_prefix(), dir.display()),
      spec: self.spec.clone(),
      dir,
      footprint,
      features: Vec::new(),
    };
    installation.find_features();
    Some(installation)
  }
}

impl Package for ToolPackage {
  fn name(&self) -> &str {
    &self.spec.name
  }

  fn search(&mut self) -> Result<bool, BuildError> {
    let mut added = 0;
    for dir in self.candidates() {
      let key = format!("{}:{}", self.spec.key_prefix(), dir.display());
      if self.found.iter().any(|i| i.key == key) {
        continue;
      }
      let Some(installation) = self.installation(dir) else {
        continue;
      };
      debug!(package = %self.spec.name, installation = %installation.key, "found installation");
      self.found.push(Arc::new(installation));
      added += 1;
    }
    Ok(added == 0)
  }

  fn check(&mut self) -> Result<(), BuildError> {
    if let (Some(version), Some(command)) = (&self.spec.version, &self.spec.version_command) {
      let runner = ShellRunner::default();
      self
        .found
        .retain(|installation| installation.check_version(&runner, command, version));
    }
    if self.found.is_empty() {
      warn!(package = %self.spec.name, "no installation found");
    }
    Ok(())
  }

  fn installations(&self) -> Vec<InstallationRef> {
    self.found.iter().map(|i| i.clone() as InstallationRef).collect()
  }

  fn restore(&self, key: &str) -> Option<InstallationRef> {
    let dir = key.strip_prefix(&format!("{}:", self.spec.key_prefix()))?;
    let installation = self.installation(PathBuf::from(dir))?;
    Some(Arc::new(installation))
  }
}

#[derive(Debug, Clone)]
pub struct ToolInstallation {
  key: String,
  spec: Arc<ToolSpec>,
  dir: PathBuf,
  footprint: Footprint,
  features: Vec<String>,
}

impl ToolInstallation {
  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Names of the optional features present in this installation.
  pub fn features(&self) -> &[String] {
    &self.features
  }

  pub fn header_dirs(&self) -> &[PathBuf] {
    &self.footprint.header_dirs
  }

  pub fn library_dirs(&self) -> &[PathBuf] {
    &self.footprint.library_dirs
  }

  pub fn libraries(&self) -> &[String] {
    &self.footprint.libraries
  }

  fn find_features(&mut self) {
    for feature in &self.spec.features {
      if let Some(found) = Footprint::find(&self.dir, &feature.binaries, &feature.headers, &feature.libraries) {
        debug!(installation = %self.key, feature = %feature.name, "found feature");
        self.footprint.extend(found);
        self.features.push(feature.name.clone());
      }
    }
  }

  fn check_version(&self, runner: &dyn CommandRunner, template: &str, version: &str) -> bool {
    let command = render_template(template, &[], &[], &self.base_options());
    let cwd = if self.dir.as_os_str().is_empty() {
      Path::new(".")
    } else {
      self.dir.as_path()
    };
    match runner.run(&command, cwd) {
      Ok(out) if out.code == Some(0) => {
        let matches = out.stdout.contains(version) || out.stderr.contains(version);
        if !matches {
          debug!(installation = %self.key, version, "version does not match");
        }
        matches
      }
      Ok(out) => {
        debug!(installation = %self.key, code = ?out.code, "version command failed");
        false
      }
      Err(e) => {
        debug!(installation = %self.key, error = %e, "version command could not run");
        false
      }
    }
  }

  /// Options every builder of this installation starts from.
  fn base_options(&self) -> OptionSet {
    let mut opts = OptionSet::new();
    if let Some(bin) = self.footprint.binaries.first() {
      opts.set("binary", bin.to_string_lossy().into_owned());
    }
    if !self.spec.flags.is_empty() {
      opts.set("flags", OptionValue::List(self.spec.flags.clone()));
    }
    if let Some(target) = &self.spec.target {
      opts.set("target", target.clone());
    }
    if self.spec.compile {
      opts.set("compile", true);
    }
    if !self.features.is_empty() {
      opts.set("features", OptionValue::List(self.features.clone()));
    }
    opts
  }

  /// Add header dirs (compile steps) or library dirs and libraries (other steps).
  fn append_search_paths(&self, opts: &mut OptionSet) {
    let display = |dirs: &[PathBuf]| -> Vec<String> { dirs.iter().map(|d| d.to_string_lossy().into_owned()).collect() };

    if opts.get_bool("compile").unwrap_or(false) {
      let dirs = display(&self.footprint.header_dirs);
      opts.append("header_dirs", &dirs);
      let flags: Vec<_> = dirs.iter().map(|d| format!("-I{}", d)).collect();
      opts.append("flags", &flags);
    } else {
      let dirs = display(&self.footprint.library_dirs);
      opts.append("library_dirs", &dirs);
      opts.append("libraries", &self.footprint.libraries);
      let flags: Vec<_> = dirs
        .iter()
        .map(|d| format!("-L{}", d))
        .chain(self.footprint.libraries.iter().map(|l| format!("-l{}", l)))
        .collect();
      opts.append("flags", &flags);
    }
  }

  /// Product path for one source.
  fn product_path(&self, source: &Path) -> PathBuf {
    let dirs: Vec<_> = source
      .parent()
      .map(|p| p.components().skip(self.spec.target_strip_dirs).collect())
      .unwrap_or_default();

    let mut name = match &self.spec.suffix {
      Some(suffix) => source
        .file_stem()
        .map(|s| format!("{}{}", s.to_string_lossy(), suffix))
        .unwrap_or_default(),
      None => source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default(),
    };
    if name.is_empty() {
      name = self.spec.name.clone();
    }

    let mut path = self.spec.prefix.as_ref().map(PathBuf::from).unwrap_or_default();
    for dir in dirs {
      path.push(dir.as_os_str());
    }
    path.push(name);
    path
  }
}

impl Installation for ToolInstallation {
  fn key(&self) -> &str {
    &self.key
  }

  fn package(&self) -> &str {
    &self.spec.name
  }

  fn expand(
    &self,
    graph: &mut NodeGraph,
    sources: &[NodeId],
    use_opts: &OptionSet,
    rule_opts: &OptionSet,
  ) -> Result<Option<Vec<Production>>, BuildError> {
    let Some(command) = &self.spec.command else {
      return Ok(None);
    };
    let options = self.base_options().merge(use_opts).merge(rule_opts);
    let action = Action::Command {
      template: command.clone(),
      cwd: None,
    };

    let mut productions = Vec::new();
    if self.spec.single || options.get_str("target").is_some() {
      let target = options.get_str("target").ok_or_else(|| BuildError::Package {
        package: self.spec.name.clone(),
        message: "a single production needs a 'target'".to_string(),
      })?;
      let mut path = self.spec.prefix.as_ref().map(PathBuf::from).unwrap_or_default();
      path.push(target);

      let product = graph.file(path);
      let builder = graph.add_builder(Builder::new(vec![action], options, sources.to_vec(), vec![product]));
      productions.push(Production {
        sources: sources.to_vec(),
        builder,
        products: vec![product],
      });
    } else {
      for &source in sources {
        let NodeKind::File(path) = graph.node(source).kind.clone() else {
          continue;
        };
        let product = graph.file(self.product_path(&path));
        let builder = graph.add_builder(Builder::new(
          vec![action.clone()],
          options.clone(),
          vec![source],
          vec![product],
        ));
        productions.push(Production {
          sources: vec![source],
          builder,
          products: vec![product],
        });
      }
    }

    Ok(Some(productions))
  }

  fn apply(
    &self,
    graph: &mut NodeGraph,
    productions: &[Production],
    use_opts: &OptionSet,
    _rule_opts: &OptionSet,
  ) -> Result<(), BuildError> {
    let mut flags = self.spec.flags.clone();
    for flag in use_opts.get_list("flags") {
      push_unique(&mut flags, flag);
    }
    for production in productions {
      let options = &mut graph.builder_mut(production.builder).options;
      options.append("flags", &flags);
      self.append_search_paths(options);
    }
    Ok(())
  }

  fn is_compatible_with(&self, other: &dyn Installation) -> bool {
    match (self.abi(), other.abi()) {
      (Some(a), Some(b)) => a == b,
      _ => true,
    }
  }

  fn abi(&self) -> Option<&str> {
    self.spec.abi.as_deref()
  }
}
