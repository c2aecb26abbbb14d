//! Intent router
//!
//! One completion call classifies the message into a category and crafts the
//! mission for the downstream agent. The response is constrained to a single
//! JSON object, but the model is not trusted to comply: the first balanced
//! `{...}` is extracted defensively, and anything unparsable becomes
//! `unknown` rather than an error. An `unknown` result escalates through two
//! strictly additive context retries (recent routed exchanges, then per-agent
//! memory) before the caller gives up.

use crate::gemini::{CompletionBackend, CompletionRequest, Content};
use crate::history::HistoryStore;
use crate::models::{Category, Classification};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

const TEMPERATURE: f32 = 0.0;

/// Routed exchanges shown in the first-retry context
const CONTEXT_EXCHANGES: usize = 5;
/// Recent missions shown per agent in the second-retry context
const CONTEXT_MISSIONS_PER_AGENT: usize = 3;
/// Answer preview length inside the exchange context
const ANSWER_PREVIEW_CHARS: usize = 100;

pub const AGENT_NAMES: [&str; 4] = ["stock", "knowledge", "schedule", "work"];

const ROUTING_PROMPT: &str = r#"You are a routing assistant for a user who works as a private teacher (math, CS, physics) and also invests in the stock exchange. Classify each message into exactly one of the categories below and craft an accurate mission for the downstream agent based on its specific capabilities.

## Categories & Agent Capabilities

### 1. "stock" — Stock market analysis
Route here for: stock prices, market data, company info, investing questions, trading, portfolios, financial instruments.
**Agent capabilities:**
- Get current stock price with daily data (price, change, day range, volume) for any ticker
- Get historical price data for periods: 1d, 5d, 1mo, 3mo, 6mo, 1y, 5y
- Get company fundamentals: sector, industry, market cap, P/E ratio, 52-week range, business summary
**Agent limitations:**
- Cannot execute trades or manage a portfolio
- Cannot access news, analyst ratings, or data beyond the market data provider
- Only publicly traded tickers

### 2. "work" — Teaching business finances & payment tracking
Route here for: who paid, who didn't pay, how much money is owed, mark payments, earnings/salary/income from lessons, syncing lesson records.
**Agent capabilities:**
- Read recorded lessons from the ledger by month (student name, date, time, price, paid status)
- Add lesson records to the ledger
- Update payment status for specific lessons (mark paid/unpaid)
- Get all recorded lessons
- Query the schedule agent internally to calculate earnings from the calendar
- Sync past lessons from calendar to the ledger automatically
**Agent limitations:**
- Only tracks PAST lessons (never future ones)
- For earnings calculations, it internally calls the schedule agent — the mission should clearly state the date range
- Cannot create, modify, or delete calendar events — only reads calendar data via the schedule agent
- Pricing is fixed: Noam=130 NIS, Shoham=200 NIS, all others=150 NIS

### 3. "knowledge" — Math, CS, and physics tutoring
Route here for: solving math/CS/physics problems, explaining concepts, proofs, algorithms, preparing lesson content, homework help.
**Agent capabilities:**
- Answer questions and solve problems step by step in math, computer science, and physics
- Explain concepts clearly for students
- Maintains conversation history within the session for follow-up questions
**Agent limitations:**
- Pure conversational — no access to external tools, files, internet, or any data sources
- Cannot access the calendar, stock data, or lesson records
- Cannot perform calculations that require real-world data

### 4. "schedule" — Calendar management & time planning
Route here for: viewing schedule, scheduling/rescheduling lessons, creating/deleting/updating calendar events, personal trainings, meetups, trips, appointments, time/date planning. NOT for earnings or payment questions.
**Agent capabilities:**
- List calendar events in any date range
- Identify the kind of the event by its color - lessons are lavender or flamingo
- Create events with title, start/end time, description, color, and recurrence (RRULE)
- Delete events by ID (will list events first to find the right one)
- Update event fields (title, time, description, color)
- Calculate earnings from calendar lessons (total, per-day, per-student) — but this is only used internally by the work agent
**Agent limitations:**
- Only accesses the primary calendar
- Can identify an event only with date and time
- Cannot manage payments or the lesson ledger
- Cannot send reminders or notifications
- Timezone is fixed to Asia/Jerusalem
- Event colors: Lavender=private lessons, Flamingo=high school lessons, Grape=trainings, Sage=fun/social

### 5. "unknown" — If the message does not clearly fit any category.

## Follow-up & Context Resolution
- The user's message may include a "[Recent exchanges]" block with info about the last exchanges (which agent handled each, what the mission was, and a preview of the agent's response).
- Use this context to resolve ambiguous follow-ups like "and last month?", "tell me more", "what about Microsoft?", "do the same for Noam", etc.
- When the follow-up continues the same topic, route to the SAME category and craft the mission with the full resolved context (e.g., replace "it" or "that" with the actual subject).
- When the follow-up clearly switches to a new topic, ignore the previous context and classify fresh.
- If an "[Agent memory]" block is provided, it shows each agent's recent missions. Use this to match the user's message to the correct agent when the topic seems ambiguous. For example, if the stock agent recently discussed "Apple stock" and the user says "what about Google?", route to stock.

## Mission Crafting Guidelines
- The mission should be a clear, actionable task description tailored to what the target agent can actually do.
- Include specific details from the user's message (dates, names, tickers, etc.).
- For follow-ups, ALWAYS resolve references and include the full context in the mission — the downstream agent may not have the same conversation history.
- For "work" earnings questions, always include the date range so the agent can query the schedule agent properly.
- For "schedule" questions, specify whether it's a view, create, update, or delete operation when clear from context.
- For "stock" questions, include the ticker symbol if mentioned.

Respond with ONLY a JSON object in this exact format:
{"category": "<stock or work or knowledge or schedule or unknown>", "confidence": <0.0 to 1.0>, "reason": "<brief explanation>", "mission": "<a clear, actionable task description for the downstream agent that will handle this request>"}

Do not include any other text outside the JSON.
"#;

pub struct Router {
    backend: Arc<dyn CompletionBackend>,
    history: HistoryStore,
}

impl Router {
    pub fn new(backend: Arc<dyn CompletionBackend>, history: HistoryStore) -> Self {
        Self { backend, history }
    }

    /// Classify a message, escalating through richer context on `unknown`.
    /// The returned classification may still be `unknown` — surfacing that is
    /// the caller's job.
    pub async fn classify(&self, message: &str) -> Result<Classification> {
        let first = self.classify_once(message, None).await?;
        if first.category != Category::Unknown {
            return Ok(first);
        }
        debug!(reason = %first.reason, "Classification inconclusive; escalating");

        if let Some(context) = self.exchange_context() {
            let retry = self.classify_once(message, Some(&context)).await?;
            if retry.category != Category::Unknown {
                info!("Classified on recent-exchanges retry");
                return Ok(retry);
            }
        }

        if let Some(context) = self.agent_memory_context() {
            let retry = self.classify_once(message, Some(&context)).await?;
            if retry.category != Category::Unknown {
                info!("Classified on agent-memory retry");
                return Ok(retry);
            }
        }

        Ok(first)
    }

    async fn classify_once(
        &self,
        message: &str,
        context: Option<&str>,
    ) -> Result<Classification> {
        let text = match context {
            Some(context) => format!(
                "{}\n\nThe previous classification returned 'unknown'. \
                 Re-examine the user's message using the context above to find \
                 a matching category.\n\n{}",
                context, message
            ),
            None => message.to_string(),
        };

        let contents = [Content::user_text(text)];
        let step = self
            .backend
            .complete(CompletionRequest {
                system: ROUTING_PROMPT,
                contents: &contents,
                declarations: &[],
                temperature: TEMPERATURE,
            })
            .await?;

        Ok(parse_classification(step.text.as_deref().unwrap_or("")))
    }

    /// `[Recent exchanges: ...]` block from the router log; None when empty
    fn exchange_context(&self) -> Option<String> {
        let records = self.history.load_router_log();
        if records.is_empty() {
            return None;
        }

        let lines: Vec<String> = records
            .iter()
            .rev()
            .take(CONTEXT_EXCHANGES)
            .rev()
            .map(|record| {
                let preview: String =
                    record.answer.chars().take(ANSWER_PREVIEW_CHARS).collect();
                format!(
                    "- [{}] mission: {} → {}",
                    record.category, record.mission, preview
                )
            })
            .collect();
        Some(format!("[Recent exchanges:\n{}]", lines.join("\n")))
    }

    /// `[Agent memory: ...]` block from the per-agent streams; None when no
    /// agent has any history
    fn agent_memory_context(&self) -> Option<String> {
        let mut lines = Vec::new();
        for agent in AGENT_NAMES {
            let history = self.history.load(agent);
            let missions: Vec<String> = history
                .iter()
                .filter(|entry| entry.role == crate::models::Role::User)
                .rev()
                .take(CONTEXT_MISSIONS_PER_AGENT)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .map(|entry| format!("\"{}\"", entry.text))
                .collect();
            if !missions.is_empty() {
                lines.push(format!("- {}: {}", agent, missions.join("; ")));
            }
        }
        if lines.is_empty() {
            return None;
        }
        Some(format!(
            "[Agent memory — recent missions per agent:\n{}]",
            lines.join("\n")
        ))
    }
}

/// Parse the model's classification reply. Never fails: anything that is not
/// one JSON object in the expected shape degrades to `unknown` with a
/// diagnostic reason.
fn parse_classification(raw: &str) -> Classification {
    let Some(json) = extract_json_object(raw) else {
        return Classification::unknown(format!(
            "no JSON object in classifier response: {:.80}",
            raw
        ));
    };

    match serde_json::from_str::<Classification>(json) {
        Ok(classification) => classification,
        Err(e) => Classification::unknown(format!("malformed classification: {}", e)),
    }
}

/// First balanced `{...}` substring, brace-counted with JSON string and
/// escape handling so braces inside strings do not close the object
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
