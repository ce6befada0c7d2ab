//! Tool registry - one namespace over every connected provider

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, ToolInvocationError};
use crate::Result;

use super::{Diagnostic, ProviderConnection, ToolDefinition};

/// How to resolve two providers exposing the same tool name.
///
/// Resolution only depends on provider connection order, so the outcome is
/// the same on every run with the same configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Keep the tool from the provider registered first
    #[default]
    FirstWins,
    /// Replace with the tool from the provider registered last
    LastWins,
    /// Keep the first, expose later ones as `<provider>__<tool>`
    Qualify,
    /// Refuse to start
    Reject,
}

/// A tool resolved to the connection that serves it
#[derive(Clone)]
pub struct RegisteredTool {
    connection: Arc<ProviderConnection>,
    definition: ToolDefinition,
    /// Name the provider knows the tool by
    remote_name: String,
}

impl RegisteredTool {
    pub fn provider(&self) -> &Arc<ProviderConnection> {
        &self.connection
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub async fn invoke(&self, arguments: Value) -> std::result::Result<String, ToolInvocationError> {
        self.connection
            .invoke(&self.remote_name, arguments)
            .await
            .map_err(|e| ToolInvocationError::new(&self.definition.name, e.message))
    }
}

/// Registry keyed by tool name
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from connections, in their given order.
    ///
    /// Returns a diagnostic for every collision that was resolved.
    pub fn build(
        connections: &[Arc<ProviderConnection>],
        policy: CollisionPolicy,
    ) -> Result<(Self, Vec<Diagnostic>)> {
        let mut registry = Self::new();
        let mut diagnostics = Vec::new();

        for connection in connections {
            for definition in connection.list_tools() {
                if let Some(diagnostic) = registry.register(connection, definition.clone(), policy)? {
                    warn!("{}", diagnostic);
                    diagnostics.push(diagnostic);
                }
            }
        }

        Ok((registry, diagnostics))
    }

    /// Register a tool under the given policy
    pub fn register(
        &mut self,
        connection: &Arc<ProviderConnection>,
        definition: ToolDefinition,
        policy: CollisionPolicy,
    ) -> Result<Option<Diagnostic>> {
        let name = definition.name.clone();
        let Some(&slot) = self.index.get(&name) else {
            self.insert(connection, definition, name);
            return Ok(None);
        };

        let owner = self.entries[slot].connection.identity().to_string();
        let source = connection.identity();

        match policy {
            CollisionPolicy::FirstWins => Ok(Some(Diagnostic::new(
                source,
                format!("tool '{name}' ignored, already provided by '{owner}'"),
            ))),
            CollisionPolicy::LastWins => {
                self.entries[slot] = RegisteredTool {
                    connection: connection.clone(),
                    definition,
                    remote_name: name.clone(),
                };
                Ok(Some(Diagnostic::new(
                    source,
                    format!("tool '{name}' replaces the one from '{owner}'"),
                )))
            }
            CollisionPolicy::Qualify => {
                let qualified = format!("{source}__{name}");
                if self.index.contains_key(&qualified) {
                    return Ok(Some(Diagnostic::new(
                        source,
                        format!("tool '{name}' ignored, '{qualified}' is taken"),
                    )));
                }
                self.insert(
                    connection,
                    ToolDefinition {
                        name: qualified.clone(),
                        ..definition
                    },
                    name.clone(),
                );
                Ok(Some(Diagnostic::new(
                    source,
                    format!("tool '{name}' exposed as '{qualified}'"),
                )))
            }
            CollisionPolicy::Reject => Err(Error::Config(format!(
                "tool '{name}' is provided by both '{owner}' and '{source}'"
            ))),
        }
    }

    fn insert(&mut self, connection: &Arc<ProviderConnection>, definition: ToolDefinition, remote_name: String) {
        self.index.insert(definition.name.clone(), self.entries.len());
        self.entries.push(RegisteredTool {
            connection: connection.clone(),
            definition,
            remote_name,
        });
    }

    /// Resolve a tool name
    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&slot| &self.entries[slot])
    }

    /// Tool definitions for the model, in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    /// Check if a tool exists
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// List registered tool names
    pub fn tool_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.definition.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
