//! In-process tool providers shipped with the binary.
//!
//! Each provider is a set of [`Tool`] implementations behind the
//! [`ToolProvider`] protocol, so it is connected, discovered and invoked
//! exactly like a remote one. State such as catalog stock belongs to the
//! provider instance, so it lives and dies with one connection.

mod catalog;
mod demo;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::Error;
use crate::Result;

use super::{Tool, ToolDefinition, ToolProvider};

pub use catalog::{SparePart, SPARE_PARTS};

/// Provider serving a fixed set of local tools
pub struct BuiltinProvider {
    name: String,
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
}

impl BuiltinProvider {
    /// Create an empty provider
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Box::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl ToolProvider for BuiltinProvider {
    async fn connect(&self) -> Result<()> {
        debug!("Builtin provider {} ready", self.name);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        Ok(self
            .order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.to_definition())
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::Tool(format!("Unknown tool: {}", name)))?;

        tool.execute(arguments).await
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Create a builtin provider by server name
pub fn create(server: &str) -> Result<BuiltinProvider> {
    match server {
        "spare-parts" => Ok(catalog::provider()),
        "sample-demo" => Ok(demo::provider()),
        other => Err(Error::Config(format!("Unknown builtin server: {other}"))),
    }
}

/// Read a required string argument
pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Tool(format!("Missing '{}' parameter", key)))
}
