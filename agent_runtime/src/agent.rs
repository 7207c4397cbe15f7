//! Agents: run one task against a kernel and a completion client,
//! executing the function calls the model requests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::{
    completion::{split_tool_name, ChatCompletion, ChatMessage, CompletionRequest, TokenUsage, ToolCall, ToolDefinition},
    context::CallContext,
    error::{Error, Result},
    kernel::Kernel,
    manifest::AgentConfig,
    plugin::Arguments,
};

/// Rounds of tool calls allowed before an agent gives up
pub const DEFAULT_MAX_FUNCTION_ROUNDS: usize = 8;

/// Everything an agent needs to execute one task
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub task: String,
    pub instructions: String,
    /// Accumulated results, caller inputs, `task` and `instructions`
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskOutput {
    pub result: Value,
    pub usage: TokenUsage,
}

/// Something that can produce a result for a task
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: &CallContext, input: TaskInput) -> Result<TaskOutput>;
}

/// Agent backed by a kernel and a chat completion client
pub struct KernelAgent {
    config: AgentConfig,
    kernel: Arc<Kernel>,
    client: Arc<dyn ChatCompletion>,
    max_function_rounds: usize,
}

impl KernelAgent {
    pub fn new(config: AgentConfig, kernel: Arc<Kernel>, client: Arc<dyn ChatCompletion>) -> Self {
        Self {
            config,
            kernel,
            client,
            max_function_rounds: DEFAULT_MAX_FUNCTION_ROUNDS,
        }
    }

    pub fn with_max_function_rounds(mut self, rounds: usize) -> Self {
        self.max_function_rounds = rounds;
        self
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn initial_messages(&self, input: &TaskInput) -> Result<Vec<ChatMessage>> {
        let mut messages = Vec::with_capacity(2);
        if !self.config.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.config.system_prompt.clone()));
        }
        let instructions = render_instructions(&input.instructions, &input.context);
        let context = serde_json::to_string_pretty(&input.context)?;
        messages.push(ChatMessage::user(format!("{instructions}\n\nContext:\n{context}")));
        Ok(messages)
    }

    async fn call_tool(&self, ctx: &CallContext, call: &ToolCall) -> Result<String> {
        let Some((plugin, function)) = split_tool_name(&call.name) else {
            return Ok(tool_error(format!("unknown tool {}", call.name)));
        };

        let args: Arguments = if call.arguments.trim().is_empty() {
            Arguments::new()
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(args) => args,
                Err(e) => return Ok(tool_error(format!("arguments are not a JSON object: {e}"))),
            }
        };

        match self.kernel.invoke_function(ctx, plugin, function, args).await {
            Ok(value) => Ok(value.to_string()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Function call failed");
                Ok(tool_error(e.to_string()))
            }
        }
    }
}

fn tool_error(message: String) -> String {
    serde_json::json!({ "error": message }).to_string()
}

#[async_trait]
impl Agent for KernelAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(skip(self, ctx, input), fields(agent = %self.config.name, task = %input.task))]
    async fn run(&self, ctx: &CallContext, input: TaskInput) -> Result<TaskOutput> {
        let mut request = CompletionRequest {
            model: self.config.model.clone(),
            messages: self.initial_messages(&input)?,
            temperature: self.config.temperature,
            tools: self
                .kernel
                .function_definitions()
                .iter()
                .map(ToolDefinition::from)
                .collect(),
        };
        let mut usage = TokenUsage::default();

        for round in 0..=self.max_function_rounds {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let response = ctx.run(self.client.complete(&request)).await?;
            usage += response.usage;

            if response.tool_calls.is_empty() {
                info!(rounds = round + 1, total_tokens = usage.total_tokens, "Task completed");
                return Ok(TaskOutput {
                    result: Value::String(response.content),
                    usage,
                });
            }

            if round == self.max_function_rounds {
                break;
            }

            debug!(round, calls = response.tool_calls.len(), "Executing function calls");
            let content = Some(response.content).filter(|c| !c.is_empty());
            request
                .messages
                .push(ChatMessage::assistant_tool_calls(content, response.tool_calls.clone()));
            for call in &response.tool_calls {
                let output = self.call_tool(ctx, call).await?;
                request.messages.push(ChatMessage::tool_result(call.id.clone(), output));
            }
        }

        Err(Error::Completion(format!(
            "agent {} still requesting functions after {} rounds",
            self.config.name, self.max_function_rounds
        )))
    }
}

/// Substitute `{{ key }}` placeholders from `context`.
///
/// Strings are inserted as-is, other values as JSON. Unknown placeholders
/// are left untouched.
pub fn render_instructions(template: &str, context: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = after[..end].trim();
        match context.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
