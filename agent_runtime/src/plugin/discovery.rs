//! Function discovery for plugins.
//!
//! An explicit [`Plugin::functions`] list always wins. Plugins that only
//! expose [`Operation`]s go through the operation adapter: every operation
//! already has the `(context, argument bag) -> result` shape, lifecycle
//! operations are skipped, and the rest become functions named after the
//! lower-cased operation name with an empty parameter list.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{boxed_handler, Arguments, FunctionHandler, FunctionParameter, KernelFunction, Plugin};
use crate::context::CallContext;
use crate::error::Result;

/// Operation names that describe the plugin itself rather than a capability
const LIFECYCLE_OPERATIONS: &[&str] = &[
    "initialize",
    "getname",
    "getdescription",
    "name",
    "description",
    "tostring",
    "string",
    "error",
];

/// Raw plugin operation with the function-call shape
#[derive(Clone)]
pub struct Operation {
    name: String,
    handler: FunctionHandler,
}

impl Operation {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CallContext, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: boxed_handler(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation").field("name", &self.name).finish_non_exhaustive()
    }
}

fn is_lifecycle_operation(name: &str) -> bool {
    let normalized: String = name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    LIFECYCLE_OPERATIONS.contains(&normalized.as_str())
}

/// Function synthesized from an [`Operation`]
struct OperationFunction {
    name: String,
    description: String,
    handler: FunctionHandler,
}

#[async_trait]
impl KernelFunction for OperationFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &[FunctionParameter] {
        &[]
    }

    async fn invoke(&self, ctx: &CallContext, args: Arguments) -> Result<Value> {
        (self.handler)(ctx.clone(), args).await
    }
}

/// Resolve the functions a plugin contributes to a kernel
pub fn discover_functions(plugin: &dyn Plugin) -> Vec<Arc<dyn KernelFunction>> {
    if let Some(functions) = plugin.functions() {
        return functions;
    }

    let plugin_name = plugin.name();
    plugin
        .operations()
        .into_iter()
        .filter(|op| {
            let skip = is_lifecycle_operation(op.name());
            if skip {
                debug!(plugin = plugin_name, operation = op.name(), "skipping lifecycle operation");
            }
            !skip
        })
        .map(|op| {
            Arc::new(OperationFunction {
                name: op.name.to_lowercase(),
                description: format!("Function {} from plugin {}", op.name, plugin_name),
                handler: op.handler,
            }) as Arc<dyn KernelFunction>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::NativeFunction;
    use serde_json::json;

    struct Explicit;

    impl Plugin for Explicit {
        fn name(&self) -> &str {
            "explicit"
        }

        fn functions(&self) -> Option<Vec<Arc<dyn KernelFunction>>> {
            Some(vec![NativeFunction::new("only", "", |_, _| async { Ok(json!(1)) }).into_arc()])
        }

        fn operations(&self) -> Vec<Operation> {
            vec![Operation::new("Ignored", |_, _| async { Ok(Value::Null) })]
        }
    }

    struct Legacy;

    impl Plugin for Legacy {
        fn name(&self) -> &str {
            "legacy"
        }

        fn operations(&self) -> Vec<Operation> {
            vec![
                Operation::new("Initialize", |_, _| async { Ok(Value::Null) }),
                Operation::new("get_name", |_, _| async { Ok(json!("legacy")) }),
                Operation::new("ToString", |_, _| async { Ok(json!("legacy")) }),
                Operation::new("Lookup", |_, args| async move { Ok(Value::Object(args)) }),
            ]
        }
    }

    #[test]
    fn explicit_list_wins() {
        let functions = discover_functions(&Explicit);
        let names: Vec<_> = functions.iter().map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["only"]);
    }

    #[tokio::test]
    async fn operations_are_adapted_and_lifecycle_skipped() {
        let functions = discover_functions(&Legacy);
        assert_eq!(functions.len(), 1);

        let lookup = &functions[0];
        assert_eq!(lookup.name(), "lookup");
        assert_eq!(lookup.description(), "Function Lookup from plugin legacy");
        assert!(lookup.parameters().is_empty());

        let mut args = Arguments::new();
        args.insert("k".into(), json!("v"));
        let out = lookup.invoke(&CallContext::new(), args).await.unwrap();
        assert_eq!(out, json!({"k": "v"}));
    }

    #[test]
    fn lifecycle_names_are_normalized() {
        assert!(is_lifecycle_operation("GetDescription"));
        assert!(is_lifecycle_operation("get-description"));
        assert!(!is_lifecycle_operation("describe_item"));
    }
}
