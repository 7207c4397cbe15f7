//! Agent Runtime - Core Library
//!
//! Declares a service of agents and ordered tasks in a YAML manifest, gives
//! each agent a kernel of local and OpenAPI-backed plugins, and exposes the
//! pipeline over HTTP, SSE and WebSocket.

pub mod agent;
pub mod catalog;
pub mod cli;
pub mod completion;
pub mod context;
pub mod error;
pub mod kernel;
pub mod manifest;
pub mod middleware;
pub mod orchestrator;
pub mod plugin;
pub mod server;
pub mod settings;
pub mod stream;
pub mod telemetry;
pub mod websocket;

pub use agent::{Agent, KernelAgent, TaskInput, TaskOutput};
pub use catalog::{RemotePluginCatalog, RemotePluginConfig};
pub use completion::{ChatCompletion, CompletionFactory, OpenAiCompatibleClient, OpenAiCompletionFactory};
pub use context::CallContext;
pub use error::{Error, ErrorKind, Result};
pub use kernel::{FunctionDefinition, Kernel, KernelBuilder};
pub use manifest::ServiceManifest;
pub use orchestrator::{InvokeResponse, OrchestratorOptions, SequentialOrchestrator};
pub use plugin::{KernelFunction, LocalPluginRegistry, Plugin};
pub use stream::StreamEvent;
