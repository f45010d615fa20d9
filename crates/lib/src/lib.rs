//! usebuild-lib: build graph, package resolution and incremental reconciliation.
//!
//! This crate provides the engine behind the `use` build tool:
//! - `Node`: vertices of the production graph with checksum-based validity
//! - `Rule`: declarative source -> production mappings, matched across runs
//! - `Use` / `UseGroup`: package requirement trees resolved to installations
//! - `Scheduler`: sequential or concurrent execution of invalidated nodes
//! - `BuildContext`: the explicit per-run owner of all of the above

pub mod builder;
pub mod consts;
pub mod context;
pub mod node;
pub mod options;
pub mod package;
pub mod rule;
pub mod scan;
pub mod schedule;
pub mod script;
pub mod state;
pub mod usetree;
pub mod util;
