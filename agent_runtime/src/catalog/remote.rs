//! Plugins whose functions are HTTP calls described by an OpenAPI document.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::openapi::OperationSpec;
use crate::{
    context::CallContext,
    error::{Error, Result},
    plugin::{Arguments, FunctionParameter, KernelFunction, ParamLocation, Plugin},
};

/// Plugin compiled from an OpenAPI document
#[derive(Clone)]
pub struct RemotePlugin {
    name: String,
    description: String,
    functions: Vec<Arc<RemoteFunction>>,
}

impl RemotePlugin {
    pub fn new(name: impl Into<String>, description: impl Into<String>, functions: Vec<RemoteFunction>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            functions: functions.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn remote_functions(&self) -> &[Arc<RemoteFunction>] {
        &self.functions
    }
}

impl Plugin for RemotePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn functions(&self) -> Option<Vec<Arc<dyn KernelFunction>>> {
        Some(
            self.functions
                .iter()
                .map(|f| f.clone() as Arc<dyn KernelFunction>)
                .collect(),
        )
    }
}

impl std::fmt::Debug for RemotePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePlugin")
            .field("name", &self.name)
            .field(
                "functions",
                &self.functions.iter().map(|f| f.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Fully resolved HTTP request for one function call
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

/// One OpenAPI operation bound to a server
#[derive(Debug, Clone)]
pub struct RemoteFunction {
    spec: OperationSpec,
    server_url: Option<String>,
    client: Client,
    timeout: Duration,
}

enum Route {
    Path,
    Query,
    Body,
}

impl RemoteFunction {
    pub fn new(spec: OperationSpec, server_url: Option<String>, client: Client, timeout: Duration) -> Self {
        Self {
            spec,
            server_url,
            client,
            timeout,
        }
    }

    pub fn method(&self) -> &Method {
        &self.spec.method
    }

    pub fn path(&self) -> &str {
        &self.spec.path
    }

    pub fn server_url(&self) -> Option<&str> {
        self.server_url.as_deref()
    }

    fn declared(&self, name: &str) -> Option<&FunctionParameter> {
        self.spec.parameters.iter().find(|p| p.name == name)
    }

    fn validate(&self, args: &Arguments) -> Result<()> {
        for param in &self.spec.parameters {
            match args.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(Error::invalid_argument(
                        &self.spec.name,
                        format!("missing required parameter {}", param.name),
                    ));
                }
                Some(value) if !value.is_null() && !param.param_type.accepts(value) => {
                    return Err(Error::invalid_argument(
                        &self.spec.name,
                        format!(
                            "parameter {} is not a valid {}",
                            param.name,
                            param.param_type.schema_keyword().unwrap_or("value")
                        ),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn route(&self, name: &str) -> Route {
        match self.declared(name).map(|p| p.location) {
            Some(ParamLocation::Path) => Route::Path,
            Some(ParamLocation::Query) => Route::Query,
            Some(ParamLocation::Body) => Route::Body,
            Some(ParamLocation::Argument) | None => {
                if self.spec.path.contains(&format!("{{{name}}}")) {
                    Route::Path
                } else if matches!(self.spec.method, Method::GET | Method::DELETE) {
                    Route::Query
                } else {
                    Route::Body
                }
            }
        }
    }

    /// Validate `args` and resolve the request they describe.
    ///
    /// Path tokens are substituted, GET/DELETE arguments become query
    /// parameters and everything else is folded into one JSON body.
    /// Declared parameters follow their declared location.
    pub fn build_request(&self, args: &Arguments) -> Result<PreparedRequest> {
        self.validate(args)?;

        let server = self
            .server_url
            .as_deref()
            .ok_or_else(|| Error::UnresolvedServerUrl(self.spec.name.clone()))?;

        let mut path = self.spec.path.clone();
        let mut query = Vec::new();
        let mut body = Map::new();

        for (name, value) in args {
            if value.is_null() {
                continue;
            }
            match self.route(name) {
                Route::Path => {
                    let token = format!("{{{name}}}");
                    path = path.replace(&token, &urlencoding::encode(&scalar_text(value)));
                }
                Route::Query => query.push(format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(&scalar_text(value))
                )),
                Route::Body => {
                    body.insert(name.clone(), value.clone());
                }
            }
        }

        if let Some(start) = path.find('{') {
            let token = path[start..].split('}').next().unwrap_or_default();
            return Err(Error::invalid_argument(
                &self.spec.name,
                format!("missing path parameter {}", token.trim_start_matches('{')),
            ));
        }

        let mut url = format!("{}{}", server.trim_end_matches('/'), path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }

        Ok(PreparedRequest {
            method: self.spec.method.clone(),
            url,
            body: (!body.is_empty()).then_some(Value::Object(body)),
        })
    }

    async fn send(&self, prepared: PreparedRequest) -> Result<Value> {
        let mut request = self
            .client
            .request(prepared.method, &prepared.url)
            .timeout(self.timeout);
        if let Some(body) = &prepared.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| Error::InvalidResponseBody(e.to_string()))
    }
}

/// Text form of a value for a path segment or query string
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl KernelFunction for RemoteFunction {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> &[FunctionParameter] {
        &self.spec.parameters
    }

    #[instrument(skip(self, ctx, args), fields(function = %self.spec.name))]
    async fn invoke(&self, ctx: &CallContext, args: Arguments) -> Result<Value> {
        let prepared = self.build_request(&args)?;
        debug!(method = %prepared.method, url = %prepared.url, "Calling remote function");
        ctx.run(self.send(prepared)).await
    }
}
