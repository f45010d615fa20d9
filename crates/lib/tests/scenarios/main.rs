//! End-to-end build scenarios: script evaluation, configuration, expansion,
//! scheduling and persistence across runs.

mod build_tests;
mod common;
mod configure_tests;
mod usetree_tests;
