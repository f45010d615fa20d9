//! Status command implementation.
//!
//! Reports whether configuration would run and which targets are out of
//! date, without building or saving anything.

use anyhow::Result;

use super::Invocation;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_status(inv: &Invocation, targets: &[String], output: OutputFormat) -> Result<()> {
  let mut ctx = inv.context()?;
  let status = ctx.status(targets)?;

  if output.is_json() {
    let items: Vec<_> = status
      .targets
      .iter()
      .map(|t| serde_json::json!({ "name": t.name, "out_of_date": t.out_of_date }))
      .collect();
    print_json(&serde_json::json!({
      "needs_configure": status.needs_configure,
      "targets": items,
    }))?;
    return Ok(());
  }

  if status.needs_configure {
    print_warning("Packages will be searched again on the next build");
  }

  let stale: Vec<_> = status.out_of_date().collect();
  if stale.is_empty() {
    print_success("Everything is up to date");
  } else {
    print_info(&format!("{} of {} target(s) out of date", stale.len(), status.targets.len()));
    for target in &stale {
      println!("  {} {}", symbols::MODIFY, target.name);
    }
  }

  if inv.verbose {
    println!();
    print_stat("Root", &ctx.config().root.display().to_string());
    print_stat("State", &ctx.store().path().display().to_string());
    for target in status.targets.iter().filter(|t| !t.out_of_date) {
      println!("  {} {}", symbols::SUCCESS, target.name);
    }
  }
  Ok(())
}
