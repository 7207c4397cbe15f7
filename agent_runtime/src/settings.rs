//! Process configuration with environment variable support and validation.

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::orchestrator::OrchestratorOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    pub stream_timeout_seconds: u64,
    pub cors_origins: Vec<String>,
    pub max_request_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            request_timeout_seconds: 120,
            stream_timeout_seconds: 600,
            cors_origins: vec!["*".to_string()],
            max_request_body_bytes: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// OpenAI-compatible completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub timeout_seconds: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self { timeout_seconds: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub cache_kernels: bool,
    pub max_function_rounds: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache_kernels: false,
            max_function_rounds: 8,
        }
    }
}

impl From<&OrchestratorConfig> for OrchestratorOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            cache_kernels: config.cache_kernels,
            max_function_rounds: config.max_function_rounds,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub completion: CompletionConfig,
    pub remote: RemoteConfig,
    pub orchestrator: OrchestratorConfig,
    pub manifest_path: PathBuf,
    /// Remote plugin catalog; empty disables remote plugins
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the embedded defaults, `agent_runtime.toml` and
    /// `AGENT_RUNTIME__*` environment variables
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(include_str!("../config.toml"), FileFormat::Toml))
            .add_source(File::with_name("agent_runtime").required(false))
            .add_source(
                Environment::with_prefix("AGENT_RUNTIME")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()
            .context("failed to assemble configuration")?;

        let mut settings: Settings = config
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if self.completion.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                self.completion.api_key = key;
            }
        }
        if self
            .catalog_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            self.catalog_path = None;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.request_timeout_seconds == 0 || self.server.stream_timeout_seconds == 0 {
            return Err(anyhow!("Server timeouts must be positive"));
        }
        if self.server.max_request_body_bytes == 0 {
            return Err(anyhow!("Max request body cannot be 0"));
        }
        if !matches!(self.logging.format.as_str(), "json" | "text") {
            return Err(anyhow!("Unknown logging format: {}", self.logging.format));
        }
        if self.completion.base_url.trim().is_empty() {
            return Err(anyhow!("Completion base_url cannot be empty"));
        }
        if self.remote.timeout_seconds == 0 {
            return Err(anyhow!("Remote timeout must be positive"));
        }
        if self.orchestrator.max_function_rounds == 0 {
            return Err(anyhow!("max_function_rounds must be at least 1"));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion.timeout_seconds)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_seconds)
    }
}
