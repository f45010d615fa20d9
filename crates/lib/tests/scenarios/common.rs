//! Shared helpers for build scenarios.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use usebuild_lib::builder::{CommandOutput, CommandRunner};
use usebuild_lib::context::{BuildContext, BuildError, BuildSummary, ContextConfig};
use usebuild_lib::schedule::{ExecuteConfig, Strategy};
use usebuild_lib::script::evaluate_str;

/// Runs a two-word command language instead of a shell.
///
/// - `concat <out> <inputs...>` writes the concatenation of the inputs
/// - `fail` exits with code 1
#[derive(Debug, Default)]
pub struct FakeShell {
  commands: Mutex<Vec<String>>,
}

impl FakeShell {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn commands(&self) -> Vec<String> {
    self.commands.lock().unwrap().clone()
  }
}

impl CommandRunner for FakeShell {
  fn run(&self, command: &str, cwd: &Path) -> io::Result<CommandOutput> {
    self.commands.lock().unwrap().push(command.to_string());
    let mut words = command.split_whitespace();
    match words.next() {
      Some("concat") => {
        let out = words
          .next()
          .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "concat needs an output"))?;
        let mut content = String::new();
        for input in words {
          content.push_str(&fs::read_to_string(cwd.join(input))?);
        }
        if let Some(parent) = cwd.join(out).parent() {
          fs::create_dir_all(parent)?;
        }
        fs::write(cwd.join(out), content)?;
        Ok(CommandOutput::success())
      }
      Some("fail") => Ok(CommandOutput {
        code: Some(1),
        stdout: String::new(),
        stderr: "failed on purpose".to_string(),
      }),
      _ => Ok(CommandOutput::success()),
    }
  }
}

/// Compiles every `.c` file to `.o`, then links all objects into `app`.
pub const C_PROJECT: &str = r#"
  package { name = "cc", search_path = false, command = "concat {product} {sources}", suffix = ".o" }
  package { name = "ld", search_path = false, command = "concat {product} {sources}", single = true, target = "app" }

  local objects = rule([[.*\.c$]], use("cc"))
  rule(objects, use("ld"))
"#;

/// A project directory with a build script.
pub struct Project {
  pub temp: TempDir,
  pub script: String,
}

impl Project {
  pub fn new(script: &str) -> Self {
    Self {
      temp: TempDir::new().unwrap(),
      script: script.to_string(),
    }
  }

  /// The C project with `main.c` including `util.h`.
  pub fn c_project() -> Self {
    let project = Self::new(C_PROJECT);
    project.write("main.c", "#include \"util.h\"\nmain\n");
    project.write("util.c", "util\n");
    project.write("util.h", "header\n");
    project
  }

  pub fn root(&self) -> PathBuf {
    self.temp.path().to_path_buf()
  }

  pub fn write(&self, relative: &str, content: &str) {
    let path = self.temp.path().join(relative);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
  }

  pub fn read(&self, relative: &str) -> String {
    fs::read_to_string(self.temp.path().join(relative)).unwrap()
  }

  pub fn exists(&self, relative: &str) -> bool {
    self.temp.path().join(relative).exists()
  }

  /// A fresh context, as a new invocation of the tool would create.
  pub fn context(&self) -> BuildContext {
    self.context_with(ContextConfig::new(self.root()))
  }

  pub fn context_with(&self, config: ContextConfig) -> BuildContext {
    let declarations = evaluate_str(&self.script, "build.lua").unwrap();
    BuildContext::from_declarations(config, declarations).unwrap()
  }

  /// Run a whole build in a fresh context.
  pub async fn run(&self, targets: &[&str], exec: &ExecuteConfig) -> (Result<BuildSummary, BuildError>, Arc<FakeShell>) {
    let shell = FakeShell::new();
    let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
    let result = self.context().run(&targets, exec, shell.clone()).await;
    (result, shell)
  }
}

pub fn sequential() -> ExecuteConfig {
  ExecuteConfig {
    parallelism: 1,
    strategy: Strategy::Sequential,
    shell: None,
  }
}

pub fn concurrent(parallelism: usize) -> ExecuteConfig {
  ExecuteConfig {
    parallelism,
    strategy: Strategy::Concurrent,
    shell: None,
  }
}
