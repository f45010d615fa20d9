//! Implementation of the `use build` command.
//!
//! Evaluates the build script, reuses or redoes the package configuration,
//! brings the requested targets up to date and saves the state for the next
//! run.

use std::time::Instant;

use anyhow::Result;
use tracing::info;

use super::{Invocation, block_on};
use crate::output::{format_elapsed, print_info, print_stat, print_success, symbols};

pub fn cmd_build(inv: &Invocation, targets: &[String]) -> Result<()> {
  let exec = inv.execute_config()?;
  let mut ctx = inv.context()?;
  let runner = exec.runner();

  let started = Instant::now();
  let summary = block_on(ctx.run(targets, &exec, runner))??;
  let elapsed = started.elapsed();
  info!(state = %ctx.store().path().display(), "state saved");

  if summary.configured {
    print_info("Configured packages");
  }
  if summary.builders_run == 0 {
    print_success("Everything is up to date");
  } else {
    print_success(&format!(
      "Built {} target(s) in {}",
      summary.targets.len(),
      format_elapsed(elapsed)
    ));
    print_stat("Builders run", &summary.builders_run.to_string());
    print_stat("Nodes checked", &summary.nodes_completed.to_string());
  }

  if inv.verbose {
    for target in &summary.targets {
      println!("  {} {}", symbols::ARROW, target);
    }
  }
  Ok(())
}
