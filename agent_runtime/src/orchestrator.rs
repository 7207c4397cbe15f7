//! Sequential orchestrator: runs the declared tasks in order, threading each
//! task's result into the context of the tasks after it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    agent::{Agent, KernelAgent, TaskInput, DEFAULT_MAX_FUNCTION_ROUNDS},
    completion::{CompletionFactory, TokenUsage},
    context::CallContext,
    error::{Error, Result},
    kernel::{FunctionDefinition, Kernel, KernelBuilder},
    manifest::{AgentConfig, ServiceManifest, TaskConfig},
    stream::StreamEvent,
};

/// Capacity of the stream channel; the producer waits on every send
const STREAM_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    /// Reuse the first successfully built agent set across invocations
    pub cache_kernels: bool,
    pub max_function_rounds: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            cache_kernels: false,
            max_function_rounds: DEFAULT_MAX_FUNCTION_ROUNDS,
        }
    }
}

/// Unary invocation result
#[derive(Debug, Clone, Serialize)]
pub struct InvokeResponse {
    pub result: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub token_usage: TokenUsage,
}

#[derive(Debug, Clone)]
struct Task {
    name: String,
    task_no: i64,
    instructions: String,
    agent: String,
}

struct AgentInstance {
    agent: Arc<dyn Agent>,
    kernel: Arc<Kernel>,
}

type AgentSet = HashMap<String, AgentInstance>;

pub struct SequentialOrchestrator {
    name: String,
    agents: Vec<AgentConfig>,
    tasks: Vec<Task>,
    builder: KernelBuilder,
    completions: Arc<dyn CompletionFactory>,
    options: OrchestratorOptions,
    cached: OnceCell<Arc<AgentSet>>,
}

impl SequentialOrchestrator {
    /// Validate the task list against the declared agents.
    ///
    /// Fails on an empty task list, a duplicate task name or a task naming an
    /// undeclared agent.
    pub fn new(
        name: impl Into<String>,
        agents: Vec<AgentConfig>,
        tasks: Vec<TaskConfig>,
        builder: KernelBuilder,
        completions: Arc<dyn CompletionFactory>,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let name = name.into();
        if tasks.is_empty() {
            return Err(Error::Configuration(format!("service {name} declares no tasks")));
        }

        let agent_names: HashSet<&str> = agents.iter().map(|a| a.name.as_str()).collect();
        let mut task_names = HashSet::new();
        let mut built = Vec::with_capacity(tasks.len());

        for task in tasks {
            if !agent_names.contains(task.agent.as_str()) {
                return Err(Error::Configuration(format!(
                    "agent {} not found for task {}",
                    task.agent, task.name
                )));
            }
            if !task_names.insert(task.name.clone()) {
                return Err(Error::Configuration(format!("duplicate task name: {}", task.name)));
            }
            built.push(Task {
                name: task.name,
                task_no: task.task_no,
                instructions: task.instructions,
                agent: task.agent,
            });
        }

        Ok(Self {
            name,
            agents,
            tasks: built,
            builder,
            completions,
            options,
            cached: OnceCell::new(),
        })
    }

    pub fn from_manifest(
        manifest: &ServiceManifest,
        builder: KernelBuilder,
        completions: Arc<dyn CompletionFactory>,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        Self::new(
            manifest.service_name.clone(),
            manifest.spec.agents.clone(),
            manifest.spec.tasks.clone(),
            builder,
            completions,
            options,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    async fn build_agents(&self, ctx: &CallContext) -> Result<AgentSet> {
        let mut set = HashMap::with_capacity(self.agents.len());
        for config in &self.agents {
            let kernel = Arc::new(self.builder.build_kernel(ctx, config).await?);
            let client = self.completions.client_for(&config.model)?;
            let agent = KernelAgent::new(config.clone(), kernel.clone(), client)
                .with_max_function_rounds(self.options.max_function_rounds);
            set.insert(
                config.name.clone(),
                AgentInstance {
                    agent: Arc::new(agent),
                    kernel,
                },
            );
        }
        Ok(set)
    }

    /// Agent set for one invocation, fresh unless caching is enabled
    async fn agent_set(&self, ctx: &CallContext) -> Result<Arc<AgentSet>> {
        if !self.options.cache_kernels {
            return self.build_agents(ctx).await.map(Arc::new);
        }
        self.cached
            .get_or_try_init(|| async { self.build_agents(ctx).await.map(Arc::new) })
            .await
            .cloned()
    }

    fn task_input(task: &Task, inputs: &Map<String, Value>, results: &Map<String, Value>) -> TaskInput {
        // earlier task results shadow caller inputs of the same name
        let mut context = inputs.clone();
        context.extend(results.iter().map(|(k, v)| (k.clone(), v.clone())));
        context.insert("task".into(), Value::String(task.name.clone()));
        context.insert("instructions".into(), Value::String(task.instructions.clone()));
        TaskInput {
            task: task.name.clone(),
            instructions: task.instructions.clone(),
            context,
        }
    }

    fn bound_agent<'a>(agents: &'a AgentSet, task: &Task) -> Result<&'a AgentInstance> {
        agents.get(&task.agent).ok_or_else(|| {
            Error::Configuration(format!("agent {} not found for task {}", task.agent, task.name))
        })
    }

    /// Run every task and return all results; the first failure aborts the call
    #[instrument(skip(self, ctx, inputs), fields(service = %self.name, request_id = %ctx.request_id()))]
    pub async fn invoke(&self, ctx: &CallContext, inputs: Map<String, Value>) -> Result<InvokeResponse> {
        let agents = ctx.run(self.agent_set(ctx)).await?;
        let mut results = Map::new();
        let mut usage = TokenUsage::default();

        for task in &self.tasks {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let instance = Self::bound_agent(&agents, task)?;
            let input = Self::task_input(task, &inputs, &results);
            let output = ctx.run(instance.agent.run(ctx, input)).await.map_err(|e| {
                error!(task = %task.name, error = %e, "Task failed");
                e
            })?;
            usage += output.usage;
            results.insert(task.name.clone(), output.result);
        }

        info!(tasks = self.tasks.len(), total_tokens = usage.total_tokens, "Invocation completed");

        let mut metadata = Map::new();
        metadata.insert("agent".into(), Value::String(self.name.clone()));
        Ok(InvokeResponse {
            result: results,
            metadata,
            timestamp: Utc::now(),
            token_usage: usage,
        })
    }

    /// Run the tasks on a spawned producer, emitting a started and a
    /// completed event per task.
    ///
    /// The last completed event carries `done`. A failure produces a single
    /// terminal error event instead. Cancelling `ctx` stops the producer
    /// before the next task and closes the channel without a terminal event.
    pub fn invoke_stream(self: &Arc<Self>, ctx: CallContext, inputs: Map<String, Value>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.produce(ctx, inputs, tx).await;
        });
        rx
    }

    #[instrument(skip_all, fields(service = %self.name, request_id = %ctx.request_id()))]
    async fn produce(&self, ctx: CallContext, inputs: Map<String, Value>, tx: mpsc::Sender<StreamEvent>) {
        let agents = match ctx.run(self.agent_set(&ctx)).await {
            Ok(agents) => agents,
            Err(e) => {
                self.fail(&ctx, &tx, &e, None).await;
                return;
            }
        };

        let mut results = Map::new();
        let last = self.tasks.len() - 1;

        for (i, task) in self.tasks.iter().enumerate() {
            if ctx.is_cancelled() {
                debug!(task = %task.name, "Stream cancelled before task");
                return;
            }

            let instance = match Self::bound_agent(&agents, task) {
                Ok(instance) => instance,
                Err(e) => {
                    self.fail(&ctx, &tx, &e, Some(&task.name)).await;
                    return;
                }
            };

            let started = StreamEvent::new(
                json!(format!("Starting task {}", task.name)),
                task_metadata(task, "started"),
                false,
            );
            if !send(&ctx, &tx, started).await {
                return;
            }

            let input = Self::task_input(task, &inputs, &results);
            let output = match ctx.run(instance.agent.run(&ctx, input)).await {
                Ok(output) => output,
                Err(e) => {
                    self.fail(&ctx, &tx, &e, Some(&task.name)).await;
                    return;
                }
            };

            results.insert(task.name.clone(), output.result.clone());
            let completed = StreamEvent::new(output.result, task_metadata(task, "completed"), i == last);
            if !send(&ctx, &tx, completed).await {
                return;
            }
        }

        info!(tasks = self.tasks.len(), "Stream completed");
    }

    /// Emit the terminal error event unless the failure is a cancellation
    async fn fail(&self, ctx: &CallContext, tx: &mpsc::Sender<StreamEvent>, err: &Error, task: Option<&str>) {
        if ctx.is_cancelled() {
            debug!("Stream cancelled");
            return;
        }
        error!(task = task.unwrap_or("-"), error = %err, "Stream failed");
        send(ctx, tx, StreamEvent::failure(err, task)).await;
    }

    /// Functions available to each agent, keyed by agent name
    pub async fn describe_functions(&self, ctx: &CallContext) -> Result<BTreeMap<String, Vec<FunctionDefinition>>> {
        let agents = ctx.run(self.agent_set(ctx)).await?;
        Ok(agents
            .iter()
            .map(|(name, instance)| (name.clone(), instance.kernel.function_definitions()))
            .collect())
    }
}

impl std::fmt::Debug for SequentialOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialOrchestrator")
            .field("name", &self.name)
            .field("tasks", &self.task_names())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn task_metadata(task: &Task, status: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("task".into(), Value::String(task.name.clone()));
    metadata.insert("task_no".into(), json!(task.task_no));
    metadata.insert("status".into(), Value::String(status.to_string()));
    metadata
}

/// Send unless the consumer is gone or the context is cancelled
async fn send(ctx: &CallContext, tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tokio::select! {
        biased;
        _ = ctx.token().cancelled() => false,
        sent = tx.send(event) => {
            if sent.is_err() {
                warn!("Stream consumer dropped");
            }
            sent.is_ok()
        }
    }
}
