//! Command execution for builders.
//!
//! Builders never spawn processes themselves; they go through a
//! [`CommandRunner`] so the scheduler can run them on blocking threads and
//! tests can substitute an in-memory runner.

use std::io;
use std::path::Path;
use std::process::Command;

use tracing::debug;

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
  /// Exit code; `None` when the process was killed by a signal.
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn success() -> Self {
    Self {
      code: Some(0),
      ..Default::default()
    }
  }
}

pub trait CommandRunner: Send + Sync {
  fn run(&self, command: &str, cwd: &Path) -> io::Result<CommandOutput>;
}

/// Runs commands through the system shell.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
  shell: Option<String>,
}

impl ShellRunner {
  pub fn new(shell: Option<String>) -> Self {
    Self { shell }
  }
}

impl CommandRunner for ShellRunner {
  fn run(&self, command: &str, cwd: &Path) -> io::Result<CommandOutput> {
    let (shell, args) = get_shell(self.shell.as_deref());
    debug!(shell = %shell, cwd = %cwd.display(), "spawning command");

    let output = Command::new(&shell).args(&args).arg(command).current_dir(cwd).output()?;

    Ok(CommandOutput {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
  }
}

/// Pick the shell executable and the argument that introduces a command string.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    ("cmd.exe".to_string(), vec!["/C".to_string()])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn get_shell_with_override() {
    let (shell, args) = get_shell(Some("/usr/bin/bash"));
    assert_eq!(shell, "/usr/bin/bash");
    assert_eq!(args, vec!["-c"]);
  }

  #[test]
  fn get_shell_with_cmd_override() {
    let (shell, args) = get_shell(Some("cmd.exe"));
    assert_eq!(shell, "cmd.exe");
    assert_eq!(args, vec!["/C"]);
  }

  #[test]
  fn get_shell_with_pwsh_override() {
    let (_, args) = get_shell(Some("pwsh"));
    assert_eq!(args, vec!["-NoProfile", "-Command"]);
  }

  #[test]
  #[cfg(unix)]
  fn get_shell_default() {
    let (shell, args) = get_shell(None);
    assert_eq!(shell, "/bin/sh");
    assert_eq!(args, vec!["-c"]);
  }

  #[test]
  #[cfg(unix)]
  fn shell_runner_captures_output() {
    let temp = tempdir().unwrap();
    let out = ShellRunner::default().run("echo hello; echo oops >&2", temp.path()).unwrap();
    assert_eq!(out.code, Some(0));
    assert_eq!(out.stdout.trim(), "hello");
    assert_eq!(out.stderr.trim(), "oops");
  }

  #[test]
  #[cfg(unix)]
  fn shell_runner_reports_exit_code() {
    let temp = tempdir().unwrap();
    let out = ShellRunner::default().run("exit 3", temp.path()).unwrap();
    assert_eq!(out.code, Some(3));
  }

  #[test]
  #[cfg(unix)]
  fn shell_runner_uses_cwd() {
    let temp = tempdir().unwrap();
    std::fs::write(temp.path().join("marker.txt"), "x").unwrap();
    let out = ShellRunner::default().run("ls", temp.path()).unwrap();
    assert!(out.stdout.contains("marker.txt"));
  }
}
