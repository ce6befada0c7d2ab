//! Switchboard - interactive chat client for tool-using language models
//!
//! This library connects a hosted language model to a set of external tool
//! providers, keeps the conversation transcript, and dispatches the model's
//! tool calls for one interactive session.

pub mod adapters;
pub mod agent;
pub mod config;
pub mod error;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
