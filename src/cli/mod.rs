//! Command-line interface for fanout.
//!
//! Provides synthetic `run` and `dispatch` workloads and a `config` dump.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
