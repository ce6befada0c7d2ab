//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::Error;
use crate::tools::registry::CollisionPolicy;
use crate::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tool providers, connected in this order
    pub providers: Vec<ProviderConfig>,

    /// Language model settings
    pub model: ModelConfig,

    /// What to do when two providers expose the same tool name
    #[serde(default)]
    pub collision_policy: CollisionPolicy,

    /// Instructions prepended to every model request
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Upper bound for one provider request or one model call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// One tool provider entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    #[serde(flatten)]
    pub transport: TransportConfig,
}

/// How a tool provider is reached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Local subprocess speaking newline-delimited JSON-RPC
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },

    /// Remote endpoint speaking JSON-RPC over HTTP POST
    Http { url: String },

    /// In-process provider shipped with the binary
    Builtin { server: String },
}

/// Hosted model backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelProvider {
    AzureOpenai,
    Openai,
    Gemini,
}

impl ModelProvider {
    /// Environment variable consulted when no key is configured.
    pub fn default_key_env(&self) -> &'static str {
        match self {
            ModelProvider::AzureOpenai => "AZURE_OPENAI_API_KEY",
            ModelProvider::Openai => "OPENAI_API_KEY",
            ModelProvider::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelProvider::AzureOpenai => "azure-openai",
            ModelProvider::Openai => "openai",
            ModelProvider::Gemini => "gemini",
        };
        f.write_str(name)
    }
}

/// Model deployment and sampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ModelProvider,

    /// Base URL; required for Azure (or `AZURE_OPENAI_ENDPOINT`)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Azure deployment name, or the model id for the other backends
    #[serde(alias = "model")]
    pub deployment: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Name of the environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_api_version() -> String {
    "2024-02-01".to_string()
}

const BUILTIN_SERVERS: [&str; 2] = ["spare-parts", "sample-demo"];

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(Error::Config("no tool providers configured".to_string()));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }

        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        self.model.validate()
    }
}

impl ProviderConfig {
    fn validate(&self) -> Result<()> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid_name {
            return Err(Error::Config(format!(
                "provider name '{}' must be non-empty and use only letters, digits, '-' or '_'",
                self.name
            )));
        }

        match &self.transport {
            TransportConfig::Stdio { command, .. } if command.trim().is_empty() => Err(
                Error::Config(format!("provider '{}' has an empty command", self.name)),
            ),
            TransportConfig::Http { url } => {
                Url::parse(url).map_err(|e| {
                    Error::Config(format!("provider '{}' has an invalid url: {e}", self.name))
                })?;
                Ok(())
            }
            TransportConfig::Builtin { server } if !BUILTIN_SERVERS.contains(&server.as_str()) => {
                Err(Error::Config(format!(
                    "provider '{}' names unknown builtin server '{}' (available: {})",
                    self.name,
                    server,
                    BUILTIN_SERVERS.join(", ")
                )))
            }
            _ => Ok(()),
        }
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        if self.deployment.trim().is_empty() {
            return Err(Error::Config("model deployment must not be empty".to_string()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Config(format!(
                "temperature {} is outside [0, 2]",
                self.temperature
            )));
        }

        if let Some(endpoint) = &self.endpoint {
            Url::parse(endpoint)
                .map_err(|e| Error::Config(format!("invalid model endpoint: {e}")))?;
        }

        Ok(())
    }

    /// Resolve the API key from the config or the process environment.
    pub fn api_key(&self) -> Result<String> {
        self.api_key_with(|name| std::env::var(name).ok())
    }

    /// Resolve the endpoint from the config or the process environment.
    pub fn endpoint(&self) -> Result<Option<String>> {
        self.endpoint_with(|name| std::env::var(name).ok())
    }

    fn api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }

        let var = self
            .api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.default_key_env());

        lookup(var).filter(|k| !k.is_empty()).ok_or_else(|| {
            Error::Config(format!(
                "no API key for {}: set 'api_key' or the {} environment variable",
                self.provider, var
            ))
        })
    }

    fn endpoint_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<Option<String>> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(Some(endpoint.clone()));
        }

        match self.provider {
            ModelProvider::AzureOpenai => lookup("AZURE_OPENAI_ENDPOINT")
                .filter(|e| !e.is_empty())
                .map(Some)
                .ok_or_else(|| {
                    Error::Config(
                        "azure-openai needs 'endpoint' or AZURE_OPENAI_ENDPOINT".to_string(),
                    )
                }),
            _ => Ok(None),
        }
    }
}

/// Load and validate configuration from a JSON file
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::Config(format!("Config not found at {:?}", path)));
    }

    let content = std::fs::read_to_string(path)?;
    parse(&content).map_err(|e| match e {
        Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Parse and validate configuration from JSON text
pub fn parse(content: &str) -> Result<Config> {
    let config: Config =
        serde_json::from_str(content).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
    config.validate()?;
    Ok(config)
}
