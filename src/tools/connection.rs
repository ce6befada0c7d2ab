//! Provider connection - lifecycle of one tool provider.
//!
//! A connection moves `Disconnected -> Connected -> Closed` and never goes
//! back. Connect failures are reported to the caller; invocation failures
//! are turned into [`ToolInvocationError`] data and never raised.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, ToolInvocationError};
use crate::Result;

use super::{Diagnostic, ToolDefinition, ToolProvider};

/// Lifecycle state of a provider connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Closed,
}

/// One tool provider and the tools it exposed at connect time.
pub struct ProviderConnection {
    identity: String,
    provider: Box<dyn ToolProvider>,
    state: Mutex<ConnectionState>,
    tools: Vec<ToolDefinition>,
}

impl ProviderConnection {
    /// Wrap a provider that has not been connected yet.
    pub fn new(identity: impl Into<String>, provider: Box<dyn ToolProvider>) -> Self {
        Self {
            identity: identity.into(),
            provider,
            state: Mutex::new(ConnectionState::Disconnected),
            tools: Vec::new(),
        }
    }

    /// Connect and discover tools. Only valid from `Disconnected`.
    pub async fn connect(&mut self) -> Result<()> {
        let state = *self.state.get_mut();
        if state != ConnectionState::Disconnected {
            return Err(Error::connection(
                &self.identity,
                format!("cannot connect from state {state:?}"),
            ));
        }

        self.provider
            .connect()
            .await
            .map_err(|e| Error::connection(&self.identity, e.to_string()))?;

        let tools = match self.provider.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                if let Err(close_err) = self.provider.disconnect().await {
                    debug!("Disconnect after failed discovery on {}: {}", self.identity, close_err);
                }
                *self.state.get_mut() = ConnectionState::Closed;
                return Err(Error::connection(
                    &self.identity,
                    format!("tool discovery failed: {e}"),
                ));
            }
        };

        info!("Connected to {} ({} tools)", self.identity, tools.len());
        self.tools = tools;
        *self.state.get_mut() = ConnectionState::Connected;
        Ok(())
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Tools discovered at connect time
    pub fn list_tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Call a tool on this provider. Failures come back as data.
    pub async fn invoke(&self, name: &str, arguments: Value) -> std::result::Result<String, ToolInvocationError> {
        if self.state().await != ConnectionState::Connected {
            return Err(ToolInvocationError::new(
                name,
                format!("provider '{}' is not connected", self.identity),
            ));
        }

        debug!("Invoking {}::{} with args: {}", self.identity, name, arguments);
        self.provider
            .call_tool(name, arguments)
            .await
            .map_err(|e| ToolInvocationError::new(name, e.to_string()))
    }

    /// Close the connection. Closing twice is a no-op; returns whether this
    /// call did the closing.
    pub async fn close(&self) -> bool {
        {
            let mut state = self.state.lock().await;
            if *state == ConnectionState::Closed {
                return false;
            }
            *state = ConnectionState::Closed;
        }

        if let Err(e) = self.provider.disconnect().await {
            warn!("Error while disconnecting {}: {}", self.identity, e);
        }
        debug!("Closed provider {}", self.identity);
        true
    }
}

/// Outcome of connecting every configured provider.
pub struct Startup {
    /// Live connections, in configuration order
    pub connections: Vec<Arc<ProviderConnection>>,
    /// One entry per provider that could not be reached
    pub diagnostics: Vec<Diagnostic>,
}

/// Connect all providers concurrently and keep the ones that succeed.
pub async fn connect_all(providers: Vec<(String, Box<dyn ToolProvider>)>) -> Startup {
    let attempts = providers.into_iter().map(|(identity, provider)| async move {
        let mut connection = ProviderConnection::new(identity, provider);
        match connection.connect().await {
            Ok(()) => Ok(connection),
            Err(e) => Err(Diagnostic::new(connection.identity(), e.to_string())),
        }
    });

    let mut startup = Startup {
        connections: Vec::new(),
        diagnostics: Vec::new(),
    };

    for attempt in join_all(attempts).await {
        match attempt {
            Ok(connection) => startup.connections.push(Arc::new(connection)),
            Err(diagnostic) => {
                warn!("Provider unavailable: {}", diagnostic);
                startup.diagnostics.push(diagnostic);
            }
        }
    }

    startup
}
