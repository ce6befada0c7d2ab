//! Tools module - external tool providers
//!
//! A tool provider is anything that exposes named, schema-described
//! operations: a subprocess or HTTP endpoint speaking JSON-RPC, or one of the
//! in-process providers shipped with the binary. All of them are reached
//! through the [`ToolProvider`] trait and wrapped in a
//! [`connection::ProviderConnection`] that owns their lifecycle.

pub mod builtin;
pub mod connection;
pub mod mcp;
pub mod registry;

pub use connection::{connect_all, ConnectionState, ProviderConnection, Startup};
pub use registry::{CollisionPolicy, RegisteredTool, ToolRegistry};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ProviderConfig, TransportConfig};
use crate::Result;

/// Tool definition for the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments
    pub parameters: Value,
}

/// Transport-agnostic tool provider protocol.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Establish the session with the provider
    async fn connect(&self) -> Result<()>;

    /// Discover the provider's tools
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Call one tool and return its text output
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String>;

    /// Tear the session down
    async fn disconnect(&self) -> Result<()>;
}

/// Tool trait - interface for in-process tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given parameters
    async fn execute(&self, params: Value) -> Result<String>;

    /// Convert to tool definition for the model
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Something worth telling the user that did not stop the session.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub source: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.recorded_at.format("%H:%M:%S"),
            self.source,
            self.message
        )
    }
}

/// Build an unconnected provider from its config entry.
pub fn create_provider(config: &ProviderConfig, timeout: Duration) -> Result<Box<dyn ToolProvider>> {
    use mcp::{HttpTransport, McpClient, StdioTransport};

    let provider: Box<dyn ToolProvider> = match &config.transport {
        TransportConfig::Stdio { command, args, env } => Box::new(McpClient::new(
            &config.name,
            StdioTransport::new(command, args.clone(), env.clone()),
            timeout,
        )),
        TransportConfig::Http { url } => Box::new(McpClient::new(
            &config.name,
            HttpTransport::new(url, timeout)?,
            timeout,
        )),
        TransportConfig::Builtin { server } => Box::new(builtin::create(server)?),
    };

    Ok(provider)
}

/// In-memory provider for tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    pub struct FakeProvider {
        tools: Vec<ToolDefinition>,
        outputs: HashMap<String, std::result::Result<String, String>>,
        refuse_connect: bool,
        hanging: Vec<String>,
        pub disconnects: Arc<AtomicUsize>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn unreachable() -> Self {
            Self {
                refuse_connect: true,
                ..Self::default()
            }
        }

        pub fn with_tool(mut self, name: &str, output: &str) -> Self {
            self.tools.push(definition(name));
            self.outputs.insert(name.to_string(), Ok(output.to_string()));
            self
        }

        pub fn with_failing_tool(mut self, name: &str, message: &str) -> Self {
            self.tools.push(definition(name));
            self.outputs.insert(name.to_string(), Err(message.to_string()));
            self
        }

        /// A tool whose calls never complete
        pub fn with_hanging_tool(mut self, name: &str) -> Self {
            self.tools.push(definition(name));
            self.hanging.push(name.to_string());
            self
        }
    }

    pub fn definition(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: format!("{name} tool"),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[async_trait]
    impl ToolProvider for FakeProvider {
        async fn connect(&self) -> Result<()> {
            if self.refuse_connect {
                return Err(Error::connection("fake", "connection refused"));
            }
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, name: &str, _arguments: Value) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hanging.iter().any(|h| h == name) {
                return std::future::pending().await;
            }
            match self.outputs.get(name) {
                Some(Ok(output)) => Ok(output.clone()),
                Some(Err(message)) => Err(Error::Tool(message.clone())),
                None => Err(Error::Tool(format!("Unknown tool: {name}"))),
            }
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_diagnostic_display_carries_time() {
        let mut diagnostic = Diagnostic::new("glpi", "connection refused");
        diagnostic.recorded_at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 5).unwrap();
        assert_eq!(diagnostic.to_string(), "09:30:05 [glpi] connection refused");
    }
}
