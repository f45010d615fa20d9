//! Test utilities for usebuild-lib.
//!
//! Provides a command runner that understands a tiny command language so
//! graph and scheduler tests can produce real files without a shell:
//!
//! - `concat <out> <inputs...>` writes the concatenation of the inputs to `out`
//! - `fail` exits with code 1
//!
//! Every command is recorded, in execution order.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use crate::builder::{CommandOutput, CommandRunner};

#[derive(Debug, Default)]
pub struct RecordingRunner {
  commands: Mutex<Vec<String>>,
}

impl RecordingRunner {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn commands(&self) -> Vec<String> {
    self.commands.lock().unwrap().clone()
  }

  pub fn count(&self) -> usize {
    self.commands.lock().unwrap().len()
  }

  pub fn clear(&self) {
    self.commands.lock().unwrap().clear();
  }
}

impl CommandRunner for RecordingRunner {
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
