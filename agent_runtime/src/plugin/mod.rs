//! Plugins and the functions they expose to a kernel.
//!
//! A plugin is a named bundle of [`KernelFunction`]s. Plugins declare their
//! functions explicitly through [`Plugin::functions`]; plugins that only
//! expose raw [`Operation`]s are adapted by [`discovery`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::CallContext;
use crate::error::Result;

pub mod builtin;
pub mod discovery;
pub mod registry;

pub use discovery::{discover_functions, Operation};
pub use registry::LocalPluginRegistry;

/// Generic key/value argument bag passed to every function
pub type Arguments = serde_json::Map<String, Value>;

/// Boxed future returned by closure-backed functions
pub type FunctionFuture = BoxFuture<'static, Result<Value>>;

/// Closure shape shared by native functions and legacy operations
pub type FunctionHandler = Arc<dyn Fn(CallContext, Arguments) -> FunctionFuture + Send + Sync>;

pub(crate) fn boxed_handler<F, Fut>(handler: F) -> FunctionHandler
where
    F: Fn(CallContext, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |ctx, args| Box::pin(handler(ctx, args)))
}

/// Declared type of a function parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl ParamType {
    /// Map a JSON-schema `type` keyword; unknown keywords become `Any`
    pub fn from_schema(keyword: &str) -> Self {
        match keyword {
            "string" => Self::String,
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            _ => Self::Any,
        }
    }

    /// JSON-schema keyword, `None` for `Any`
    pub const fn schema_keyword(self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Integer => Some("integer"),
            Self::Number => Some("number"),
            Self::Boolean => Some("boolean"),
            Self::Array => Some("array"),
            Self::Object => Some("object"),
            Self::Any => None,
        }
    }

    /// Whether `value` can be sent as this type.
    ///
    /// Scalars given as strings are accepted when they parse, since models
    /// frequently quote numbers.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => !matches!(value, Value::Array(_) | Value::Object(_)),
            Self::Integer => match value {
                Value::Number(n) => n.is_i64() || n.is_u64(),
                Value::String(s) => s.trim().parse::<i64>().is_ok(),
                _ => false,
            },
            Self::Number => match value {
                Value::Number(_) => true,
                Value::String(s) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            },
            Self::Boolean => match value {
                Value::Bool(_) => true,
                Value::String(s) => matches!(s.as_str(), "true" | "false"),
                _ => false,
            },
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// Where a remote parameter travels in the HTTP request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Body,
    #[default]
    Argument,
}

/// One entry of a function's parameter list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub location: ParamLocation,
}

impl FunctionParameter {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: false,
            location: ParamLocation::Argument,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn at(mut self, location: ParamLocation) -> Self {
        self.location = location;
        self
    }
}

/// A single named, invocable operation
#[async_trait]
pub trait KernelFunction: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> &[FunctionParameter];
    async fn invoke(&self, ctx: &CallContext, args: Arguments) -> Result<Value>;
}

/// Named bundle of functions
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Explicit function list. When present it is used as-is and
    /// [`Plugin::operations`] is never consulted.
    fn functions(&self) -> Option<Vec<Arc<dyn KernelFunction>>> {
        None
    }

    /// Raw operations for plugins that do not list functions explicitly.
    fn operations(&self) -> Vec<Operation> {
        Vec::new()
    }
}

/// Closure-backed function with an explicit parameter list
pub struct NativeFunction {
    name: String,
    description: String,
    parameters: Vec<FunctionParameter>,
    handler: FunctionHandler,
}

impl NativeFunction {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CallContext, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            handler: boxed_handler(handler),
        }
    }

    pub fn with_parameter(mut self, parameter: FunctionParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn into_arc(self) -> Arc<dyn KernelFunction> {
        Arc::new(self)
    }
}

#[async_trait]
impl KernelFunction for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &[FunctionParameter] {
        &self.parameters
    }

    async fn invoke(&self, ctx: &CallContext, args: Arguments) -> Result<Value> {
        (self.handler)(ctx.clone(), args).await
    }
}
