//! Remote plugin catalog.
//!
//! The catalog maps plugin names to OpenAPI documents. It is built once and
//! is read-only afterwards; documents are fetched per [`RemotePluginCatalog::load_plugin`]
//! call, so a broken document only fails the request that needed it.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    context::CallContext,
    error::{Error, Result},
};

pub mod openapi;
pub mod remote;

pub use openapi::{OpenApiDocument, OperationSpec};
pub use remote::{PreparedRequest, RemoteFunction, RemotePlugin};

/// Default per-call timeout for remote functions and document fetches
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// One catalog entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemotePluginConfig {
    #[serde(default)]
    pub plugin_name: String,
    pub openapi_json_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
}

impl RemotePluginConfig {
    pub fn new(plugin_name: impl Into<String>, openapi_json_path: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            openapi_json_path: openapi_json_path.into(),
            ..Self::default()
        }
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }
}

/// Read-only mapping of plugin name to OpenAPI source
#[derive(Debug, Clone)]
pub struct RemotePluginCatalog {
    entries: BTreeMap<String, RemotePluginConfig>,
    client: Client,
    timeout: Duration,
}

impl RemotePluginCatalog {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, RemotePluginConfig)>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, mut entry)| {
                if entry.plugin_name.is_empty() {
                    entry.plugin_name = key.clone();
                }
                (key, entry)
            })
            .collect();

        Self {
            entries,
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let entries: BTreeMap<String, RemotePluginConfig> = serde_yaml::from_str(text)?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Per-call timeout applied to every function of plugins loaded from now on
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn list_available(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn plugin_info(&self, name: &str) -> Result<&RemotePluginConfig> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::PluginNotFoundInCatalog(name.to_string()))
    }

    /// Fetch the plugin's document and compile it into a [`RemotePlugin`]
    #[instrument(skip(self, ctx))]
    pub async fn load_plugin(&self, ctx: &CallContext, name: &str) -> Result<RemotePlugin> {
        let entry = self.plugin_info(name)?;
        let document = openapi::fetch_document(&self.client, ctx, &entry.openapi_json_path).await?;

        let server_url = entry
            .server_url
            .clone()
            .filter(|url| !url.is_empty())
            .or_else(|| document.server_url().map(str::to_string));

        let functions: Vec<RemoteFunction> = document
            .operations()
            .into_iter()
            .map(|spec| RemoteFunction::new(spec, server_url.clone(), self.client.clone(), self.timeout))
            .collect();

        let description = document
            .info
            .description
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| entry.description.clone())
            .unwrap_or_else(|| format!("Remote plugin {}", entry.plugin_name));

        info!(
            plugin = %entry.plugin_name,
            functions = functions.len(),
            server_url = server_url.as_deref().unwrap_or("<unresolved>"),
            "Remote plugin compiled"
        );

        Ok(RemotePlugin::new(entry.plugin_name.clone(), description, functions))
    }
}
