//! Per-agent registry of plugins and their callable functions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::{
    catalog::RemotePluginCatalog,
    context::CallContext,
    error::{Error, Result},
    manifest::AgentConfig,
    plugin::{discover_functions, Arguments, FunctionParameter, KernelFunction, LocalPluginRegistry, Plugin},
};

fn function_key(plugin: &str, function: &str) -> String {
    format!("{plugin}.{function}")
}

/// Description of one registered function, as offered to a model
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub plugin: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<FunctionParameter>,
}

impl FunctionDefinition {
    pub fn key(&self) -> String {
        function_key(&self.plugin, &self.name)
    }
}

#[derive(Default)]
struct Registry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    functions: HashMap<String, Registered>,
}

/// A function together with the plugin that owns it
#[derive(Clone)]
struct Registered {
    plugin: String,
    function: Arc<dyn KernelFunction>,
}

/// Plugin and function registry.
///
/// Registration takes the write lock and is all-or-nothing; lookups share
/// the read lock and release it before the function runs.
#[derive(Default)]
pub struct Kernel {
    registry: RwLock<Registry>,
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a plugin and every function it exposes.
    ///
    /// Fails without touching the registry when the plugin name or any
    /// resulting function key is already taken.
    pub fn add_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let plugin_name = plugin.name().to_string();
        let functions = discover_functions(plugin.as_ref());

        let mut staged: HashMap<String, Registered> = HashMap::with_capacity(functions.len());
        for function in functions {
            let key = function_key(&plugin_name, function.name());
            let entry = Registered {
                plugin: plugin_name.clone(),
                function,
            };
            if staged.insert(key.clone(), entry).is_some() {
                return Err(Error::DuplicateFunction(key));
            }
        }

        let mut registry = self.registry.write();
        if registry.plugins.contains_key(&plugin_name) {
            return Err(Error::DuplicatePlugin(plugin_name));
        }
        if let Some(key) = staged.keys().find(|key| registry.functions.contains_key(*key)) {
            return Err(Error::DuplicateFunction(key.clone()));
        }

        registry.functions.extend(staged);
        registry.plugins.insert(plugin_name, plugin);
        Ok(())
    }

    pub fn get_function(&self, plugin: &str, function: &str) -> Result<Arc<dyn KernelFunction>> {
        let key = function_key(plugin, function);
        self.registry
            .read()
            .functions
            .get(&key)
            .map(|entry| entry.function.clone())
            .ok_or(Error::FunctionNotFound(key))
    }

    pub fn get_plugin(&self, name: &str) -> Result<Arc<dyn Plugin>> {
        self.registry
            .read()
            .plugins
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))
    }

    /// Resolve and call a function. The function's own error is returned as is.
    pub async fn invoke_function(
        &self,
        ctx: &CallContext,
        plugin: &str,
        function: &str,
        args: Arguments,
    ) -> Result<Value> {
        let target = self.get_function(plugin, function)?;
        target.invoke(ctx, args).await
    }

    pub fn list_plugins(&self) -> Vec<String> {
        let mut names: Vec<_> = self.registry.read().plugins.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_functions(&self) -> Vec<String> {
        let mut names: Vec<_> = self.registry.read().functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every registered function, sorted by key
    pub fn function_definitions(&self) -> Vec<FunctionDefinition> {
        let registry = self.registry.read();
        let mut definitions: Vec<_> = registry
            .functions
            .values()
            .map(|entry| FunctionDefinition {
                plugin: entry.plugin.clone(),
                name: entry.function.name().to_string(),
                description: entry.function.description().to_string(),
                parameters: entry.function.parameters().to_vec(),
            })
            .collect();
        definitions.sort_by_key(FunctionDefinition::key);
        definitions
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("plugins", &self.list_plugins())
            .field("functions", &self.list_functions())
            .finish()
    }
}

/// Builds one kernel per agent from local factories and the remote catalog
#[derive(Debug, Clone, Default)]
pub struct KernelBuilder {
    local: LocalPluginRegistry,
    catalog: Option<Arc<RemotePluginCatalog>>,
}

impl KernelBuilder {
    pub fn new(local: LocalPluginRegistry) -> Self {
        Self { local, catalog: None }
    }

    pub fn with_catalog(mut self, catalog: Arc<RemotePluginCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn catalog(&self) -> Option<&Arc<RemotePluginCatalog>> {
        self.catalog.as_ref()
    }

    /// Build a kernel holding every plugin the agent declares.
    ///
    /// The first plugin that fails to load aborts the build.
    #[instrument(skip(self, ctx, agent), fields(agent = %agent.name))]
    pub async fn build_kernel(&self, ctx: &CallContext, agent: &AgentConfig) -> Result<Kernel> {
        let kernel = Kernel::new();

        for name in &agent.plugins {
            let loaded = self
                .local
                .create(name)
                .and_then(|plugin| kernel.add_plugin(plugin));
            log_plugin_load(name, &loaded);
            loaded?;
        }

        if !agent.remote_plugins.is_empty() {
            let catalog = self.catalog.as_ref().ok_or_else(|| {
                Error::Configuration(format!(
                    "agent {} declares remote plugins but no plugin catalog is configured",
                    agent.name
                ))
            })?;

            for name in &agent.remote_plugins {
                let loaded = match catalog.load_plugin(ctx, name).await {
                    Ok(plugin) => kernel.add_plugin(Arc::new(plugin)),
                    Err(e) => Err(e),
                };
                log_plugin_load(name, &loaded);
                loaded?;
            }
        }

        info!(
            plugins = agent.plugins.len(),
            remote_plugins = agent.remote_plugins.len(),
            functions = kernel.list_functions().len(),
            "Kernel built"
        );
        Ok(kernel)
    }
}

fn log_plugin_load(name: &str, outcome: &Result<()>) {
    match outcome {
        Ok(()) => info!(plugin = name, "Plugin loaded"),
        Err(e) => error!(plugin = name, error = %e, "Plugin load failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{NativeFunction, Operation};
    use serde_json::json;
    use tracing_test::traced_test;

    struct Fixed {
        name: &'static str,
        functions: Vec<&'static str>,
    }

    impl Plugin for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn functions(&self) -> Option<Vec<Arc<dyn KernelFunction>>> {
            Some(
                self.functions
                    .iter()
                    .map(|name| {
                        let label = name.to_string();
                        NativeFunction::new(*name, "", move |_, _| {
                            let label = label.clone();
                            async move { Ok(json!(label)) }
                        })
                        .into_arc()
                    })
                    .collect(),
            )
        }
    }

    #[tokio::test]
    async fn add_and_invoke() {
        let kernel = Kernel::new();
        kernel
            .add_plugin(Arc::new(Fixed { name: "p", functions: vec!["a", "b"] }))
            .unwrap();

        assert_eq!(kernel.list_functions(), vec!["p.a", "p.b"]);
        let out = kernel
            .invoke_function(&CallContext::new(), "p", "b", Arguments::new())
            .await
            .unwrap();
        assert_eq!(out, json!("b"));
    }

    #[test]
    fn duplicate_plugin_leaves_registry_unchanged() {
        let kernel = Kernel::new();
        kernel
            .add_plugin(Arc::new(Fixed { name: "p", functions: vec!["a"] }))
            .unwrap();

        let err = kernel
            .add_plugin(Arc::new(Fixed { name: "p", functions: vec!["x", "y"] }))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePlugin(name) if name == "p"));
        assert_eq!(kernel.list_functions(), vec!["p.a"]);
        assert_eq!(kernel.list_plugins(), vec!["p"]);
    }

    #[test]
    fn duplicate_function_within_plugin_is_rejected() {
        let kernel = Kernel::new();
        let err = kernel
            .add_plugin(Arc::new(Fixed { name: "p", functions: vec!["a", "a"] }))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateFunction(key) if key == "p.a"));
        assert!(kernel.list_plugins().is_empty());
        assert!(kernel.list_functions().is_empty());
    }

    #[tokio::test]
    async fn missing_function_is_not_found() {
        let kernel = Kernel::new();
        let err = kernel
            .invoke_function(&CallContext::new(), "p", "a", Arguments::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FunctionNotFound(key) if key == "p.a"));
        assert!(matches!(kernel.get_plugin("p"), Err(Error::PluginNotFound(_))));
    }

    #[tokio::test]
    async fn function_errors_propagate_unwrapped() {
        struct Failing;
        impl Plugin for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            fn operations(&self) -> Vec<Operation> {
                vec![Operation::new("Boom", |_, _| async {
                    Err(Error::Http { status: 503, body: "down".into() })
                })]
            }
        }

        let kernel = Kernel::new();
        kernel.add_plugin(Arc::new(Failing)).unwrap();
        let err = kernel
            .invoke_function(&CallContext::new(), "failing", "boom", Arguments::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn concurrent_registration_is_atomic() {
        let kernel = Arc::new(Kernel::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let kernel = kernel.clone();
            handles.push(tokio::spawn(async move {
                kernel.add_plugin(Arc::new(Fixed { name: "shared", functions: vec!["a", "b", "c"] }))
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(kernel.list_functions(), vec!["shared.a", "shared.b", "shared.c"]);
    }

    #[test]
    fn definitions_keep_dotted_plugin_names() {
        let kernel = Kernel::new();
        kernel
            .add_plugin(Arc::new(Fixed { name: "acme.items", functions: vec!["get"] }))
            .unwrap();

        let definitions = kernel.function_definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].plugin, "acme.items");
        assert_eq!(definitions[0].name, "get");
        assert_eq!(definitions[0].key(), "acme.items.get");
    }

    #[tokio::test]
    async fn builder_loads_local_plugins() {
        let builder = KernelBuilder::new(LocalPluginRegistry::with_builtins());
        let agent = AgentConfig {
            name: "calc".into(),
            plugins: vec!["math".into(), "clock".into()],
            ..AgentConfig::default()
        };
        let kernel = builder.build_kernel(&CallContext::new(), &agent).await.unwrap();
        assert_eq!(kernel.list_functions(), vec!["clock.now", "math.add", "math.multiply"]);

        let definitions = kernel.function_definitions();
        assert_eq!(definitions[1].key(), "math.add");
        assert_eq!(definitions[1].parameters.len(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn builder_fails_on_unknown_plugin() {
        let builder = KernelBuilder::new(LocalPluginRegistry::with_builtins());
        let agent = AgentConfig {
            name: "calc".into(),
            plugins: vec!["math".into(), "missing".into()],
            ..AgentConfig::default()
        };
        let err = builder.build_kernel(&CallContext::new(), &agent).await.unwrap_err();
        assert!(matches!(err, Error::LocalPluginNotFound(name) if name == "missing"));
        assert!(logs_contain("Plugin loaded"));
        assert!(logs_contain("Plugin load failed"));
        assert!(!logs_contain("Kernel built"));
    }

    #[tokio::test]
    async fn builder_requires_catalog_for_remote_plugins() {
        let builder = KernelBuilder::new(LocalPluginRegistry::new());
        let agent = AgentConfig {
            name: "remote".into(),
            remote_plugins: vec!["weather".into()],
            ..AgentConfig::default()
        };
        let err = builder.build_kernel(&CallContext::new(), &agent).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
