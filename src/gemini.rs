//! Gemini API client
//!
//! One pooled client serves the router and every sub-agent. Requests carry a
//! system instruction, the running conversation, and optional function
//! declarations; responses come back as either a final text answer or a set
//! of requested function calls. The `CompletionBackend` trait is the seam the
//! loop and router are tested through.

use crate::error::AssistantError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

//
// ================= Wire Types =================
//

/// One conversation turn, `role` is `user` or `model`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::text(text)],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part::text(text)],
        }
    }

    pub fn user_parts(parts: Vec<Part>) -> Self {
        Self {
            role: "user".to_string(),
            parts,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Tool result part fed back to the model
    pub fn function_response(name: &str, result_text: &str) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                name: name.to_string(),
                response: json!({ "result": result_text }),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations<'a>>>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations<'a> {
    function_declarations: &'a [Value],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

//
// ================= Completion Seam =================
//

/// One round-trip request to the completion provider
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub contents: &'a [Content],
    /// Function declarations in the model's format; empty means no tools
    pub declarations: &'a [Value],
    pub temperature: f32,
}

/// What the model returned for one step: its raw turn plus the parsed view
#[derive(Debug, Clone)]
pub struct ModelStep {
    /// The model's turn verbatim, appended to the conversation on tool rounds
    pub content: Content,
    pub calls: Vec<FunctionCall>,
    pub text: Option<String>,
}

/// Black-box completion provider. Transport failures propagate to the caller;
/// nothing here is recovered locally.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<ModelStep>;
}

fn step_from_content(content: Content) -> ModelStep {
    let calls: Vec<FunctionCall> = content
        .parts
        .iter()
        .filter_map(|p| p.function_call.clone())
        .collect();

    let text_parts: Vec<&str> = content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect();
    let text = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join(""))
    };

    ModelStep {
        content,
        calls,
        text,
    }
}

//
// ================= Client =================
//

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: &str) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(90))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                model
            ),
        }
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<ModelStep> {
        if self.api_key.is_empty() {
            return Err(AssistantError::Completion(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let tools = if req.declarations.is_empty() {
            None
        } else {
            Some(vec![ToolDeclarations {
                function_declarations: req.declarations,
            }])
        };

        let request = GenerateRequest {
            contents: req.contents,
            tools,
            generation_config: GenerationConfig {
                temperature: req.temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 4096,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part::text(req.system)],
            },
        };

        debug!(turns = req.contents.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AssistantError::Completion(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(AssistantError::Completion(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AssistantError::Completion(format!("Gemini parse error: {}", e))
        })?;

        let candidate = parsed.candidates.into_iter().next().ok_or_else(|| {
            AssistantError::Completion("No response from Gemini API".to_string())
        })?;

        Ok(step_from_content(candidate.content))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// What one completion round trip looked like, for assertions
    #[derive(Debug, Clone)]
    pub struct CapturedRequest {
        pub turns: usize,
        pub last_user_text: String,
        pub last_content: Option<Content>,
    }

    /// Replays a fixed sequence of model steps and records every request.
    /// Panics if asked for more steps than were scripted.
    pub struct ScriptedBackend {
        steps: Mutex<VecDeque<ModelStep>>,
        pub requests: Mutex<Vec<CapturedRequest>>,
    }

    impl ScriptedBackend {
        pub fn new(steps: Vec<ModelStep>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn text_step(text: &str) -> ModelStep {
            ModelStep {
                content: Content::model_text(text),
                calls: Vec::new(),
                text: Some(text.to_string()),
            }
        }

        pub fn call_step(calls: Vec<(&str, Value)>) -> ModelStep {
            let content = Content {
                role: "model".to_string(),
                parts: calls
                    .iter()
                    .map(|(name, args)| Part {
                        function_call: Some(FunctionCall {
                            name: name.to_string(),
                            args: args.clone(),
                        }),
                        ..Default::default()
                    })
                    .collect(),
            };
            step_from_content(content)
        }

        pub async fn request_count(&self) -> usize {
            self.requests.lock().await.len()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, req: CompletionRequest<'_>) -> Result<ModelStep> {
            let last_user_text = req
                .contents
                .last()
                .map(|c| {
                    c.parts
                        .iter()
                        .filter_map(|p| p.text.as_deref())
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();
            self.requests.lock().await.push(CapturedRequest {
                turns: req.contents.len(),
                last_user_text,
                last_content: req.contents.last().cloned(),
            });

            self.steps
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| AssistantError::Completion("script exhausted".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let contents = vec![Content::user_text("Show my schedule for tomorrow")];
        let declarations = vec![json!({
            "name": "list_events",
            "description": "List calendar events",
            "parameters": {"type": "OBJECT", "properties": {}}
        })];

        let request = GenerateRequest {
            contents: &contents,
            tools: Some(vec![ToolDeclarations {
                function_declarations: &declarations,
            }]),
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 4096,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part::text("You are a calendar assistant")],
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("functionDeclarations"));
        assert!(json.contains("generationConfig"));
        assert!(json.contains("systemInstruction"));
        assert!(json.contains("Show my schedule for tomorrow"));
    }

    #[test]
    fn test_step_extraction_with_function_calls() {
        let raw = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"functionCall": {"name": "list_events", "args": {"start_date": "2025-03-01", "end_date": "2025-03-07"}}},
                        {"functionCall": {"name": "get_all_lessons", "args": {}}}
                    ]
                },
                "finishReason": "STOP"
            }]
        }"#;

        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let step = step_from_content(parsed.candidates.into_iter().next().unwrap().content);

        assert_eq!(step.calls.len(), 2);
        assert_eq!(step.calls[0].name, "list_events");
        assert_eq!(step.calls[0].args["start_date"], "2025-03-01");
        assert_eq!(step.calls[1].name, "get_all_lessons");
        assert!(step.text.is_none());
    }

    #[test]
    fn test_step_extraction_with_text_answer() {
        let raw = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"text": "You earned "}, {"text": "1,200 NIS in March."}]
                }
            }]
        }"#;

        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let step = step_from_content(parsed.candidates.into_iter().next().unwrap().content);

        assert!(step.calls.is_empty());
        assert_eq!(step.text.as_deref(), Some("You earned 1,200 NIS in March."));
    }

    #[test]
    fn test_function_response_part_shape() {
        let part = Part::function_response("list_events", "No events found.");
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["functionResponse"]["name"], "list_events");
        assert_eq!(json["functionResponse"]["response"]["result"], "No events found.");
        assert!(json.get("text").is_none());
    }
}
