//! Factory registry for local (in-process) plugins.

use std::collections::HashMap;
use std::sync::Arc;

use super::{builtin, Plugin};
use crate::error::{Error, Result};

type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Maps local plugin names to factories. Each kernel gets a fresh instance.
#[derive(Clone, Default)]
pub struct LocalPluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl LocalPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the plugins shipped in [`builtin`]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    /// Register a factory, replacing any previous factory of that name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn Plugin>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::LocalPluginNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for LocalPluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}
