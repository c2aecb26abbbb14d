//! Tool trait and registry
//!
//! Every external capability an agent can call lives behind the `Tool` trait:
//! a declared spec plus an async invoke that returns plain text. Invocation
//! failures never escape the registry — they are converted into an
//! error-marked text result that the loop feeds back to the model.

use crate::error::AssistantError;
use crate::schema::ToolSpec;
use crate::Result;
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub mod calendar;
pub mod ledger;
pub mod market;

/// Sentinel prefix marking a failed tool invocation inside a text result.
/// The loop inspects results for this marker to decide whether to inject a
/// retry nudge.
pub const ERROR_MARKER: &str = "❌ ERROR";

/// Wall-clock ceiling for one tool invocation
const TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// A named external capability with a declared input schema
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn invoke(&self, args: &Value) -> Result<String>;
}

/// Fixed tool set for one agent, assembled once at session start
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|tool| tool.spec().name == name)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function declarations in the model's format, in registration order
    pub fn declarations(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| tool.spec().to_declaration())
            .collect()
    }

    /// Execute one requested call, converting every failure into an
    /// error-marked text result
    pub async fn dispatch(&self, name: &str, args: &Value) -> String {
        let Some(tool) = self.get(name) else {
            warn!(tool = name, "Model requested an unregistered tool");
            return format!("{}: unknown tool '{}'", ERROR_MARKER, name);
        };

        match tokio::time::timeout(TOOL_TIMEOUT, tool.invoke(args)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "Tool execution failed");
                format!("{}: {}", ERROR_MARKER, e)
            }
            Err(_) => {
                warn!(tool = name, "Tool execution timed out");
                format!(
                    "{}: {} timed out after {}s",
                    ERROR_MARKER,
                    name,
                    TOOL_TIMEOUT.as_secs()
                )
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Argument Helpers =================
//

pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AssistantError::InvalidToolInput(format!("missing '{}'", key)))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or("")
}

pub(crate) fn require_date(args: &Value, key: &str) -> Result<NaiveDate> {
    let raw = require_str(args, key)?;
    raw.parse().map_err(|_| {
        AssistantError::InvalidToolInput(format!(
            "'{}' must be a YYYY-MM-DD date, got '{}'",
            key, raw
        ))
    })
}

pub(crate) fn require_str_list(args: &Value, key: &str) -> Result<Vec<String>> {
    let list = args
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| AssistantError::InvalidToolInput(format!("missing '{}'", key)))?;

    let items: Vec<String> = list
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if items.is_empty() {
        return Err(AssistantError::InvalidToolInput(format!(
            "'{}' must be a non-empty list of strings",
            key
        )));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParamSchema, ToolSpec};
    use serde_json::json;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new(
                "echo",
                "Echo the input back",
                Some(ParamSchema::object(
                    vec![("text", ParamSchema::string("Text to echo"))],
                    vec!["text"],
                )),
            )
        }

        async fn invoke(&self, args: &Value) -> Result<String> {
            Ok(require_str(args, "text")?.to_string())
        }
    }

    struct FailingTool;

    #[async_trait::async_trait]
    impl Tool for FailingTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("broken", "Always fails", None)
        }

        async fn invoke(&self, _args: &Value) -> Result<String> {
            Err(AssistantError::Tool("provider unavailable".to_string()))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(FailingTool));
        registry
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let out = registry().dispatch("echo", &json!({"text": "hi"})).await;
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_error_marked() {
        let out = registry().dispatch("broken", &json!({})).await;
        assert!(out.starts_with(ERROR_MARKER));
        assert!(out.contains("provider unavailable"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool_is_error_marked() {
        let out = registry().dispatch("missing", &json!({})).await;
        assert!(out.starts_with(ERROR_MARKER));
        assert!(out.contains("missing"));
    }

    #[tokio::test]
    async fn test_dispatch_invalid_input_is_error_marked() {
        let out = registry().dispatch("echo", &json!({})).await;
        assert!(out.starts_with(ERROR_MARKER));
    }

    #[test]
    fn test_declarations_in_registration_order() {
        let decls = registry().declarations();
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0]["name"], "echo");
        assert_eq!(decls[1]["name"], "broken");
    }
}
