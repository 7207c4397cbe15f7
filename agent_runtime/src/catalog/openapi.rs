//! OpenAPI document loading and operation extraction.
//!
//! Only `info`, `servers`, `paths` and the per-operation `operationId`,
//! `description`, `summary`, `parameters` and JSON `requestBody` schema are
//! consulted. Anything else (`$ref`, `oneOf`, security schemes) is ignored.

use std::collections::BTreeMap;
use std::path::Path;

use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    context::CallContext,
    error::{Error, Result},
    plugin::{FunctionParameter, ParamLocation, ParamType},
};

const HTTP_METHODS: &[&str] = &["get", "post", "put", "delete", "patch", "head", "options"];

/// The subset of an OpenAPI document the loader understands
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenApiDocument {
    #[serde(default)]
    pub info: Info,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub paths: BTreeMap<String, BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
struct OperationObject {
    #[serde(rename = "operationId", default)]
    operation_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    parameters: Vec<ParameterObject>,
    #[serde(rename = "requestBody", default)]
    request_body: Option<RequestBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ParameterObject {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "in", default)]
    location: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    schema: Option<SchemaObject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SchemaObject {
    #[serde(rename = "type", default)]
    schema_type: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, SchemaObject>,
    #[serde(default)]
    required: Vec<String>,
}

impl SchemaObject {
    fn param_type(&self) -> ParamType {
        match &self.schema_type {
            Some(Value::String(keyword)) => ParamType::from_schema(keyword),
            _ => ParamType::Any,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RequestBody {
    #[serde(default)]
    content: BTreeMap<String, MediaType>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaType {
    #[serde(default)]
    schema: Option<SchemaObject>,
}

/// One `(path, method)` pair that carries an `operationId`
#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub name: String,
    pub description: String,
    pub method: Method,
    pub path: String,
    pub parameters: Vec<FunctionParameter>,
}

impl OpenApiDocument {
    /// Parse a document, choosing YAML for `.yaml`/`.yml` sources and JSON otherwise
    pub fn parse(source: &str, text: &str) -> Result<Self> {
        let parse_error = |reason: String| Error::DocumentParse {
            source_ref: source.to_string(),
            reason,
        };
        if is_yaml_source(source) {
            serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))
        } else {
            serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))
        }
    }

    /// First declared server URL, if any
    pub fn server_url(&self) -> Option<&str> {
        self.servers
            .first()
            .map(|server| server.url.as_str())
            .filter(|url| !url.is_empty())
    }

    /// Every operation with an `operationId`, in path order.
    ///
    /// Operations without an id and entries that are not objects are skipped.
    pub fn operations(&self) -> Vec<OperationSpec> {
        let mut operations = Vec::new();

        for (path, item) in &self.paths {
            let shared: Vec<ParameterObject> = item
                .get("parameters")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();

            for (method, raw) in item {
                let lowered = method.to_ascii_lowercase();
                if !HTTP_METHODS.contains(&lowered.as_str()) {
                    continue;
                }

                let operation: OperationObject = match serde_json::from_value(raw.clone()) {
                    Ok(operation) => operation,
                    Err(e) => {
                        warn!(%path, %method, error = %e, "Skipping malformed operation");
                        continue;
                    }
                };

                let Some(name) = operation.operation_id.clone().filter(|id| !id.is_empty()) else {
                    debug!(%path, %method, "Skipping operation without operationId");
                    continue;
                };

                let Ok(method) = Method::from_bytes(lowered.to_ascii_uppercase().as_bytes()) else {
                    continue;
                };

                operations.push(OperationSpec {
                    name,
                    description: operation
                        .description
                        .clone()
                        .or_else(|| operation.summary.clone())
                        .unwrap_or_default(),
                    method,
                    path: path.clone(),
                    parameters: collect_parameters(&shared, &operation),
                });
            }
        }

        operations
    }
}

fn collect_parameters(shared: &[ParameterObject], operation: &OperationObject) -> Vec<FunctionParameter> {
    let mut parameters: Vec<FunctionParameter> = Vec::new();

    // operation-level entries override path-level entries of the same name
    let declared = shared
        .iter()
        .filter(|p| {
            !operation
                .parameters
                .iter()
                .any(|own| own.name.is_some() && own.name == p.name)
        })
        .chain(operation.parameters.iter());

    for param in declared {
        let Some(name) = param.name.as_deref() else {
            continue;
        };
        let location = match param.location.as_deref() {
            Some("path") => ParamLocation::Path,
            Some("query") => ParamLocation::Query,
            _ => continue,
        };
        let schema = param.schema.clone().unwrap_or_default();
        parameters.push(FunctionParameter {
            name: name.to_string(),
            param_type: schema.param_type(),
            description: param.description.clone().unwrap_or_default(),
            required: param.required || location == ParamLocation::Path,
            location,
        });
    }

    let body_schema = operation
        .request_body
        .as_ref()
        .and_then(|body| body.content.get("application/json"))
        .and_then(|media| media.schema.as_ref());

    if let Some(schema) = body_schema {
        for (name, property) in &schema.properties {
            parameters.push(FunctionParameter {
                name: name.clone(),
                param_type: property.param_type(),
                description: property.description.clone().unwrap_or_default(),
                required: schema.required.contains(name),
                location: ParamLocation::Body,
            });
        }
    }

    parameters
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn is_yaml_source(source: &str) -> bool {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

/// Fetch and parse a document from a URL or a local path
pub async fn fetch_document(client: &Client, ctx: &CallContext, source: &str) -> Result<OpenApiDocument> {
    let fetch_error = |reason: String| Error::DocumentFetch {
        source_ref: source.to_string(),
        reason,
    };

    let text = if is_url(source) {
        ctx.run(async {
            let response = client
                .get(source)
                .send()
                .await
                .map_err(|e| fetch_error(e.to_string()))?;
            if !response.status().is_success() {
                return Err(fetch_error(format!("status code {}", response.status().as_u16())));
            }
            response.text().await.map_err(|e| fetch_error(e.to_string()))
        })
        .await?
    } else {
        ctx.run(async {
            tokio::fs::read_to_string(source)
                .await
                .map_err(|e| fetch_error(e.to_string()))
        })
        .await?
    };

    OpenApiDocument::parse(source, &text)
}
