//! Sub-agents and the tool-calling loop
//!
//! Every agent runs the same loop: send the conversation, execute whatever
//! tool calls come back (all of them, in parallel), feed the results in, and
//! repeat until the model answers in plain text or the iteration ceiling
//! cuts it off. Tool failures come back as error-marked text with a retry
//! nudge appended; the model decides whether to retry. Completion failures
//! are not caught here — they abort the turn before any history is written.

use crate::gemini::{CompletionBackend, CompletionRequest, Content, Part};
use crate::history::HistoryStore;
use crate::models::Role;
use crate::schema::{ParamSchema, ToolSpec};
use crate::tools::{require_str, Tool, ToolRegistry, ERROR_MARKER};
use crate::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hard ceiling on reason→act round trips per mission
pub const MAX_TOOL_ITERATIONS: usize = 10;

const TEMPERATURE: f32 = 0.3;

const RETRY_NUDGE: &str = "⚠️ One or more tool calls above returned ❌ ERROR. \
    Do NOT give up or report failure to the user. \
    Analyze the error, fix the issue (re-list events if IDs may be stale, \
    correct the date/time format, etc.), and retry the failed operation.";

/// One specialized agent: a system role, a fixed tool set, and its own
/// persisted history stream
pub struct SubAgent {
    name: &'static str,
    system_prompt: String,
    tools: ToolRegistry,
    /// Derived once at construction; immutable for the session
    declarations: Vec<Value>,
    backend: Arc<dyn CompletionBackend>,
    history: HistoryStore,
}

impl SubAgent {
    pub fn new(
        name: &'static str,
        system_prompt: String,
        tools: ToolRegistry,
        backend: Arc<dyn CompletionBackend>,
        history: HistoryStore,
    ) -> Self {
        let declarations = tools.declarations();
        Self {
            name,
            system_prompt,
            tools,
            declarations,
            backend,
            history,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the mission to a final text answer. The completed exchange is
    /// appended to this agent's history only on success.
    pub async fn solve(&self, mission: &str) -> Result<String> {
        info!(agent = self.name, mission, "Agent solving mission");

        // Seed with persisted turns so follow-ups have context across restarts
        let mut contents: Vec<Content> = self
            .history
            .load(self.name)
            .iter()
            .map(|exchange| match exchange.role {
                Role::User => Content::user_text(&exchange.text),
                Role::Model => Content::model_text(&exchange.text),
            })
            .collect();
        contents.push(Content::user_text(mission));

        let mut step = self.complete(&contents).await?;

        let mut iteration = 0;
        while !step.calls.is_empty() {
            iteration += 1;
            if iteration > MAX_TOOL_ITERATIONS {
                warn!(
                    agent = self.name,
                    "Iteration ceiling hit; returning partial answer"
                );
                break;
            }

            debug!(
                agent = self.name,
                iteration,
                calls = step.calls.len(),
                "Executing requested tool calls"
            );

            // Sibling calls are independent; fan out and wait for all
            let executions = step
                .calls
                .iter()
                .map(|call| self.tools.dispatch(&call.name, &call.args));
            let results = join_all(executions).await;

            let has_errors = results.iter().any(|text| text.contains(ERROR_MARKER));

            // Results go back matched to their calls by position
            let mut parts: Vec<Part> = step
                .calls
                .iter()
                .zip(&results)
                .map(|(call, text)| Part::function_response(&call.name, text))
                .collect();
            if has_errors {
                parts.push(Part::text(RETRY_NUDGE));
            }

            contents.push(step.content.clone());
            contents.push(Content::user_parts(parts));

            step = self.complete(&contents).await?;
        }

        let answer = step.text.as_deref().unwrap_or("").trim().to_string();
        self.history.append_exchange(self.name, mission, &answer)?;

        info!(agent = self.name, rounds = iteration, "Mission solved");
        Ok(answer)
    }

    async fn complete(&self, contents: &[Content]) -> Result<crate::gemini::ModelStep> {
        self.backend
            .complete(CompletionRequest {
                system: &self.system_prompt,
                contents,
                declarations: &self.declarations,
                temperature: TEMPERATURE,
            })
            .await
    }
}

/// Exposes another agent's loop as a tool, so one agent can ask another a
/// question. Wire these one-way only — the target must not hold a delegate
/// back to its caller.
pub struct DelegateTool {
    name: &'static str,
    description: &'static str,
    target: Arc<SubAgent>,
}

impl DelegateTool {
    pub fn new(name: &'static str, description: &'static str, target: Arc<SubAgent>) -> Self {
        Self {
            name,
            description,
            target,
        }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            self.name,
            self.description,
            Some(ParamSchema::object(
                vec![(
                    "question",
                    ParamSchema::string("The question to ask the agent"),
                )],
                vec!["question"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let question = require_str(args, "question")?;
        self.target.solve(question).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use crate::gemini::testing::ScriptedBackend;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct RecordingTool {
        name: &'static str,
        delay: Duration,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Tool for RecordingTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new(self.name, "Test tool", None)
        }

        async fn invoke(&self, _args: &Value) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            self.log.lock().await.push(self.name);
            Ok(format!("{} done", self.name))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Tool for AlwaysFails {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("flaky", "Always fails", None)
        }

        async fn invoke(&self, _args: &Value) -> Result<String> {
            Err(AssistantError::Tool("event not found".to_string()))
        }
    }

    fn agent_with(
        backend: Arc<ScriptedBackend>,
        tools: ToolRegistry,
    ) -> (tempfile::TempDir, SubAgent) {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::new(dir.path().join("memory"));
        let agent = SubAgent::new(
            "schedule",
            "You are a test agent".to_string(),
            tools,
            backend,
            history,
        );
        (dir, agent)
    }

    #[tokio::test]
    async fn test_plain_answer_appends_history() {
        let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::text_step(
            "Your Tuesday is free.",
        )]));
        let (dir, agent) = agent_with(backend.clone(), ToolRegistry::new());

        let answer = agent.solve("What's on Tuesday?").await.unwrap();
        assert_eq!(answer, "Your Tuesday is free.");
        assert_eq!(backend.request_count().await, 1);

        let history = HistoryStore::new(dir.path().join("memory")).load("schedule");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "What's on Tuesday?");
        assert_eq!(history[1].text, "Your Tuesday is free.");
    }

    #[tokio::test]
    async fn test_parallel_fan_out_completes_before_next_round() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(RecordingTool {
            name: "slow",
            delay: Duration::from_millis(50),
            log: log.clone(),
        }));
        tools.register(Arc::new(RecordingTool {
            name: "fast",
            delay: Duration::ZERO,
            log: log.clone(),
        }));

        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedBackend::call_step(vec![("slow", json!({})), ("fast", json!({}))]),
            ScriptedBackend::text_step("Both done."),
        ]));
        let (_dir, agent) = agent_with(backend.clone(), tools);

        let answer = agent.solve("run both").await.unwrap();
        assert_eq!(answer, "Both done.");

        // Both executions finished before the second round trip
        assert_eq!(log.lock().await.len(), 2);

        // Results are matched back to the calls by position, request order
        let requests = backend.requests.lock().await;
        assert_eq!(requests.len(), 2);
        let results_turn = requests[1].last_content.clone().unwrap();
        let names: Vec<String> = results_turn
            .parts
            .iter()
            .filter_map(|p| p.function_response.as_ref().map(|r| r.name.clone()))
            .collect();
        assert_eq!(names, vec!["slow", "fast"]);
        assert_eq!(
            results_turn.parts[0].function_response.as_ref().unwrap().response["result"],
            "slow done"
        );
    }

    #[tokio::test]
    async fn test_error_marked_result_injects_retry_nudge() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(AlwaysFails));

        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedBackend::call_step(vec![("flaky", json!({}))]),
            ScriptedBackend::text_step("Recovered."),
        ]));
        let (_dir, agent) = agent_with(backend.clone(), tools);

        agent.solve("try it").await.unwrap();

        let requests = backend.requests.lock().await;
        let results_turn = requests[1].last_content.clone().unwrap();
        // Error-marked result plus the nudge, in one synthesized turn
        let result = &results_turn.parts[0].function_response.as_ref().unwrap().response["result"];
        assert!(result.as_str().unwrap().contains(ERROR_MARKER));
        let nudge = results_turn.parts.last().unwrap().text.as_deref().unwrap();
        assert!(nudge.contains("Do NOT give up"));
    }

    #[tokio::test]
    async fn test_no_nudge_on_clean_results() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(RecordingTool {
            name: "ok",
            delay: Duration::ZERO,
            log,
        }));

        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedBackend::call_step(vec![("ok", json!({}))]),
            ScriptedBackend::text_step("Done."),
        ]));
        let (_dir, agent) = agent_with(backend.clone(), tools);

        agent.solve("go").await.unwrap();

        let requests = backend.requests.lock().await;
        let results_turn = requests[1].last_content.clone().unwrap();
        assert!(results_turn.parts.iter().all(|p| p.text.is_none()));
    }

    #[tokio::test]
    async fn test_iteration_ceiling_bounds_the_loop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(RecordingTool {
            name: "again",
            delay: Duration::ZERO,
            log: log.clone(),
        }));

        // A model that never stops asking for tools
        let steps = (0..MAX_TOOL_ITERATIONS + 1)
            .map(|_| ScriptedBackend::call_step(vec![("again", json!({}))]))
            .collect();
        let backend = Arc::new(ScriptedBackend::new(steps));
        let (_dir, agent) = agent_with(backend.clone(), tools);

        let answer = agent.solve("loop forever").await.unwrap();
        assert_eq!(answer, "");
        assert_eq!(backend.request_count().await, MAX_TOOL_ITERATIONS + 1);
        assert_eq!(log.lock().await.len(), MAX_TOOL_ITERATIONS);
    }

    #[tokio::test]
    async fn test_completion_failure_propagates_without_history_write() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let (dir, agent) = agent_with(backend, ToolRegistry::new());

        assert!(agent.solve("hello").await.is_err());
        let history = HistoryStore::new(dir.path().join("memory")).load("schedule");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_delegate_tool_runs_target_agent() {
        let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::text_step(
            "Earnings were 1,200 NIS.",
        )]));
        let (_dir, target) = agent_with(backend, ToolRegistry::new());

        let tool = DelegateTool::new(
            "query_schedule",
            "Ask the schedule agent a question.",
            Arc::new(target),
        );
        let out = tool
            .invoke(&json!({"question": "earnings for March?"}))
            .await
            .unwrap();
        assert_eq!(out, "Earnings were 1,200 NIS.");
    }
}
