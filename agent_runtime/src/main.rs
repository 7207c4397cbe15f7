//! Main entry point for the Agent Runtime CLI.

use std::net::SocketAddr;
use std::sync::Arc;

use agent_runtime::{
    cli::{self, Commands},
    server::{self, AppState},
    settings::Settings,
    telemetry, CallContext, KernelBuilder, KernelFunction, LocalPluginRegistry, OpenAiCompatibleClient,
    OpenAiCompletionFactory, RemotePluginCatalog, SequentialOrchestrator, ServiceManifest,
};
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Map, Value};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let mut settings = Settings::load()?;
    telemetry::init(&settings.logging)?;

    if let Some(manifest) = args.manifest {
        settings.manifest_path = manifest;
    }
    if let Some(catalog) = args.catalog {
        settings.catalog_path = Some(catalog);
    }

    let catalog = load_catalog(&settings)?;

    match args.command {
        Commands::Catalog { plugin } => print_catalog(catalog, plugin.as_deref()).await,
        Commands::Run { input } => {
            let (manifest, orchestrator) = build_orchestrator(&settings, catalog)?;
            let inputs: Map<String, Value> =
                serde_json::from_str(&input).context("--input must be a JSON object")?;
            let ctx = CallContext::new();
            ctx.cancel_after(settings.server.request_timeout());
            let response = orchestrator
                .invoke(&ctx, inputs)
                .await
                .with_context(|| format!("invocation of {} failed", manifest.service_name))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Commands::Serve { addr } => {
            let (manifest, orchestrator) = build_orchestrator(&settings, catalog)?;
            let addr: SocketAddr = match addr {
                Some(addr) => addr,
                None => settings
                    .bind_address()
                    .parse()
                    .with_context(|| format!("invalid bind address {}", settings.bind_address()))?,
            };
            let state = AppState::new(
                Arc::new(orchestrator),
                manifest.service_name,
                manifest.version,
                &settings.server,
            );
            server::serve(state, addr).await
        }
    }
}

fn load_catalog(settings: &Settings) -> Result<Option<Arc<RemotePluginCatalog>>> {
    let Some(path) = settings.catalog_path.as_ref() else {
        return Ok(None);
    };
    let catalog = RemotePluginCatalog::from_path(path)
        .with_context(|| format!("failed to load plugin catalog {}", path.display()))?
        .with_timeout(settings.remote_timeout());
    info!(path = %path.display(), plugins = catalog.list_available().len(), "Plugin catalog loaded");
    Ok(Some(Arc::new(catalog)))
}

fn build_orchestrator(
    settings: &Settings,
    catalog: Option<Arc<RemotePluginCatalog>>,
) -> Result<(ServiceManifest, SequentialOrchestrator)> {
    let manifest = ServiceManifest::load(&settings.manifest_path)
        .with_context(|| format!("failed to load manifest {}", settings.manifest_path.display()))?;

    let mut builder = KernelBuilder::new(LocalPluginRegistry::with_builtins());
    if let Some(catalog) = catalog {
        builder = builder.with_catalog(catalog);
    }

    let api_key = Some(settings.completion.api_key.clone()).filter(|key| !key.is_empty());
    let client = OpenAiCompatibleClient::new(
        settings.completion.base_url.clone(),
        api_key,
        settings.completion_timeout(),
    );
    let completions = Arc::new(OpenAiCompletionFactory::new(client));

    let orchestrator = SequentialOrchestrator::from_manifest(
        &manifest,
        builder,
        completions,
        (&settings.orchestrator).into(),
    )?;
    info!(
        service = %manifest.service_name,
        version = %manifest.version,
        tasks = orchestrator.task_names().len(),
        "Orchestrator ready"
    );
    Ok((manifest, orchestrator))
}

async fn print_catalog(catalog: Option<Arc<RemotePluginCatalog>>, plugin: Option<&str>) -> Result<()> {
    let catalog = catalog.context("no plugin catalog configured (use --catalog)")?;

    let Some(name) = plugin else {
        let entries: Vec<Value> = catalog
            .list_available()
            .iter()
            .filter_map(|name| catalog.plugin_info(name).ok())
            .map(|entry| {
                json!({
                    "plugin_name": entry.plugin_name,
                    "openapi_json_path": entry.openapi_json_path,
                    "description": entry.description,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    };

    let ctx = CallContext::new();
    let loaded = catalog.load_plugin(&ctx, name).await?;
    let functions: Vec<Value> = loaded
        .remote_functions()
        .iter()
        .map(|function| {
            json!({
                "name": function.name(),
                "method": function.method().as_str(),
                "path": function.path(),
                "server_url": function.server_url(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&json!({ "plugin": name, "functions": functions }))?);
    Ok(())
}
