//! Adapters module - user-facing channels.
//!
//! A channel feeds user messages into an [`Orchestrator`](crate::agent::Orchestrator)
//! and shows what comes back. The interactive terminal is the only one today.

pub mod cli;

pub use cli::{is_exit_command, CliChannel, ConsoleObserver};
