//! JSON-RPC tool provider client (Model Context Protocol).
//!
//! - `types`: protocol messages and tool payloads
//! - `transport`: stdio subprocess and HTTP transports behind [`McpTransport`]
//! - `client`: initialize / tools-list / tools-call over any transport

mod client;
mod transport;
pub mod types;

pub use client::McpClient;
pub use transport::{HttpTransport, LineChannel, McpSession, McpTransport, StdioTransport};
