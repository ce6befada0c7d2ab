//! Agent module - the conversation side of a session.
//!
//! This module contains:
//! - Turn types (Turn, ToolCallRequest, ToolCallResult)
//! - The append-only transcript with rollback
//! - The model gateway trait and backends
//! - The orchestrator loop that ties them to the tool registry
//!
//! # Adding a New Model Backend
//!
//! See [`llm::GatewayRegistry`] for instructions.

mod loop_impl;
mod message;
mod transcript;

// Model backends in submodule
pub mod llm;

// Re-exports for convenience
pub use llm::{GatewayRegistry, LlmClient, LlmResponse, Reply, Usage};
pub use loop_impl::{Orchestrator, SessionState, TurnObserver, TurnOutcome};
pub use message::{Role, ToolCallRequest, ToolCallResult, Turn};
pub use transcript::{Checkpoint, Transcript};
