//! Implementation of the `use configure` command.

use anyhow::Result;

use usebuild_lib::consts::CONFIGURE_TARGETS;

use super::{Invocation, block_on};
use crate::output::{print_stat, print_success};

/// Search for packages, resolve every active use and save the configuration.
pub fn cmd_configure(inv: &Invocation) -> Result<()> {
  let exec = inv.execute_config()?;
  let mut ctx = inv.context()?;
  let runner = exec.runner();

  let targets = vec![CONFIGURE_TARGETS[0].to_string()];
  block_on(ctx.run(&targets, &exec, runner))??;

  print_success("Configuration saved");
  print_stat("Packages", &ctx.packages().len().to_string());
  print_stat("State", &ctx.store().path().display().to_string());
  Ok(())
}
