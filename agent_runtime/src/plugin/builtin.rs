//! Local plugins shipped with the runtime.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use super::{
    Arguments, FunctionParameter, KernelFunction, LocalPluginRegistry, NativeFunction, Operation,
    ParamType, Plugin,
};
use crate::error::{Error, Result};

pub fn register(registry: &mut LocalPluginRegistry) {
    registry.register("math", || Arc::new(MathPlugin));
    registry.register("clock", || Arc::new(ClockPlugin));
}

fn number_arg(function: &str, args: &Arguments, name: &str) -> Result<f64> {
    let value = args
        .get(name)
        .ok_or_else(|| Error::invalid_argument(function, format!("missing argument {name}")))?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::invalid_argument(function, format!("{name} is not a number")))
}

fn operands() -> [FunctionParameter; 2] {
    [
        FunctionParameter::new("a", ParamType::Number).required().describe("First operand"),
        FunctionParameter::new("b", ParamType::Number).required().describe("Second operand"),
    ]
}

/// Arithmetic helpers with an explicit function list
pub struct MathPlugin;

impl Plugin for MathPlugin {
    fn name(&self) -> &str {
        "math"
    }

    fn description(&self) -> &str {
        "Basic arithmetic"
    }

    fn functions(&self) -> Option<Vec<Arc<dyn KernelFunction>>> {
        let [a, b] = operands();
        let add = NativeFunction::new("add", "Add two numbers", |_ctx, args| async move {
            Ok(json!(number_arg("add", &args, "a")? + number_arg("add", &args, "b")?))
        })
        .with_parameter(a)
        .with_parameter(b);

        let [a, b] = operands();
        let multiply = NativeFunction::new("multiply", "Multiply two numbers", |_ctx, args| async move {
            Ok(json!(number_arg("multiply", &args, "a")? * number_arg("multiply", &args, "b")?))
        })
        .with_parameter(a)
        .with_parameter(b);

        Some(vec![add.into_arc(), multiply.into_arc()])
    }
}

/// Wall-clock access; declares raw operations only
pub struct ClockPlugin;

impl Plugin for ClockPlugin {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Current date and time"
    }

    fn operations(&self) -> Vec<Operation> {
        vec![
            Operation::new("get_name", |_ctx, _args| async { Ok(json!("clock")) }),
            Operation::new("Now", |_ctx, _args| async {
                Ok(json!({ "utc": Utc::now().to_rfc3339() }))
            }),
        ]
    }
}
