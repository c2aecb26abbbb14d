//! Session wiring and the turn lock
//!
//! One `Session` is built at startup and holds everything mutable: the
//! completion backend, the router, the four sub-agents with their tool
//! registries, and the stores. No module-level state anywhere. Inbound turns
//! are serialized by the turn lock because history streams and the ledger are
//! read-modify-write; tool fan-out inside a turn is the only intra-request
//! parallelism.

use crate::agent::{DelegateTool, SubAgent};
use crate::config::Config;
use crate::gemini::{CompletionBackend, GeminiClient};
use crate::history::HistoryStore;
use crate::models::{Category, RouterRecord, TurnOutcome, TurnReply};
use crate::reconcile::{Reconciler, SyncLedgerTool};
use crate::router::Router;
use crate::tools::calendar::{
    CalculateEarningsTool, CalendarHttpClient, CalendarLessons, CalendarProvider,
    CreateEventTool, DeleteEventsTool, ListEventsTool, UnconfiguredCalendar, UpdateEventTool,
};
use crate::tools::ledger::{
    AddLessonTool, GetAllLessonsTool, LedgerStore, ReadLessonsTool, UpdatePaymentTool,
};
use crate::tools::market::{
    CompanyInfoTool, MarketDataProvider, MarketHttpClient, PriceHistoryTool, StockPriceTool,
    UnconfiguredMarket,
};
use crate::tools::ToolRegistry;
use crate::Result;
use chrono::Local;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

/// Progress notification emitted mid-turn for streaming callers
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Classified { category: Category, confidence: f32 },
}

pub struct Session {
    router: Router,
    stock: Arc<SubAgent>,
    work: Arc<SubAgent>,
    knowledge: Arc<SubAgent>,
    schedule: Arc<SubAgent>,
    history: HistoryStore,
    /// Serializes whole turns; see the module docs
    turn_lock: Mutex<()>,
}

impl Session {
    pub fn new(config: &Config) -> Result<Self> {
        let backend: Arc<dyn CompletionBackend> = Arc::new(GeminiClient::new(
            config.gemini_api_key.clone(),
            &config.model,
        ));
        Self::with_backend(config, backend)
    }

    /// Split out so tests can substitute a scripted backend
    pub fn with_backend(config: &Config, backend: Arc<dyn CompletionBackend>) -> Result<Self> {
        let history = HistoryStore::new(&config.data_dir);
        let ledger = Arc::new(LedgerStore::new(&config.ledger_path));

        let calendar: Arc<dyn CalendarProvider> = match &config.calendar_base_url {
            Some(url) => Arc::new(CalendarHttpClient::new(url)?),
            None => Arc::new(UnconfiguredCalendar),
        };
        let market: Arc<dyn MarketDataProvider> = match &config.market_base_url {
            Some(url) => Arc::new(MarketHttpClient::new(url)?),
            None => Arc::new(UnconfiguredMarket),
        };

        let today = Local::now().date_naive();
        let rules = config.lesson_rules.clone();

        let mut stock_tools = ToolRegistry::new();
        stock_tools.register(Arc::new(StockPriceTool::new(market.clone())));
        stock_tools.register(Arc::new(PriceHistoryTool::new(market.clone())));
        stock_tools.register(Arc::new(CompanyInfoTool::new(market)));
        let stock = Arc::new(SubAgent::new(
            "stock",
            STOCK_PROMPT.to_string(),
            stock_tools,
            backend.clone(),
            history.clone(),
        ));

        let knowledge = Arc::new(SubAgent::new(
            "knowledge",
            KNOWLEDGE_PROMPT.to_string(),
            ToolRegistry::new(),
            backend.clone(),
            history.clone(),
        ));

        let mut schedule_tools = ToolRegistry::new();
        schedule_tools.register(Arc::new(ListEventsTool::new(calendar.clone())));
        schedule_tools.register(Arc::new(CreateEventTool::new(calendar.clone())));
        schedule_tools.register(Arc::new(DeleteEventsTool::new(calendar.clone())));
        schedule_tools.register(Arc::new(UpdateEventTool::new(calendar.clone())));
        schedule_tools.register(Arc::new(CalculateEarningsTool::new(
            calendar.clone(),
            rules.clone(),
        )));
        let schedule = Arc::new(SubAgent::new(
            "schedule",
            schedule_prompt(&today.to_string(), &config.timezone),
            schedule_tools,
            backend.clone(),
            history.clone(),
        ));

        let lessons = Arc::new(CalendarLessons::new(calendar, rules));
        let reconciler = Arc::new(Reconciler::new(lessons, ledger.clone()));

        let mut work_tools = ToolRegistry::new();
        work_tools.register(Arc::new(ReadLessonsTool::new(ledger.clone())));
        work_tools.register(Arc::new(AddLessonTool::new(ledger.clone())));
        work_tools.register(Arc::new(UpdatePaymentTool::new(ledger.clone())));
        work_tools.register(Arc::new(GetAllLessonsTool::new(ledger)));
        // Delegation is one-way: work may ask schedule, never the reverse
        work_tools.register(Arc::new(DelegateTool::new(
            "query_schedule",
            "Ask the schedule agent a question about calendar data \
             (e.g. calculate earnings for a period).",
            schedule.clone(),
        )));
        work_tools.register(Arc::new(SyncLedgerTool::new(reconciler)));
        let work = Arc::new(SubAgent::new(
            "work",
            work_prompt(&today.to_string()),
            work_tools,
            backend.clone(),
            history.clone(),
        ));

        Ok(Self {
            router: Router::new(backend, history.clone()),
            stock,
            work,
            knowledge,
            schedule,
            history,
            turn_lock: Mutex::new(()),
        })
    }

    /// Route one inbound message to its agent and return the outcome.
    /// Blocks the caller for the whole turn.
    pub async fn handle_message(&self, text: &str) -> Result<TurnOutcome> {
        self.handle_message_inner(text, None).await
    }

    /// Same, but emits progress events for streaming transports
    pub async fn handle_message_observed(
        &self,
        text: &str,
        events: mpsc::UnboundedSender<TurnEvent>,
    ) -> Result<TurnOutcome> {
        self.handle_message_inner(text, Some(events)).await
    }

    async fn handle_message_inner(
        &self,
        text: &str,
        events: Option<mpsc::UnboundedSender<TurnEvent>>,
    ) -> Result<TurnOutcome> {
        let _turn = self.turn_lock.lock().await;

        let classification = self.router.classify(text).await?;
        info!(
            category = %classification.category,
            confidence = classification.confidence,
            "Message classified"
        );

        let agent = match classification.category {
            Category::Stock => &self.stock,
            Category::Work => &self.work,
            Category::Knowledge => &self.knowledge,
            Category::Schedule => &self.schedule,
            Category::Unknown => {
                return Ok(TurnOutcome::Unclassified {
                    reason: classification.reason,
                });
            }
        };

        if let Some(events) = &events {
            let _ = events.send(TurnEvent::Classified {
                category: classification.category,
                confidence: classification.confidence,
            });
        }

        let answer = agent.solve(&classification.mission).await?;

        self.history.append_router_record(RouterRecord {
            category: classification.category,
            mission: classification.mission.clone(),
            answer: answer.clone(),
        })?;

        Ok(TurnOutcome::Answered(TurnReply {
            answer,
            category: classification.category,
            confidence: classification.confidence,
            reason: classification.reason,
            mission: classification.mission,
        }))
    }
}

//
// ================= Agent Role Prompts =================
//

const STOCK_PROMPT: &str = "You are a stock market analyst assistant.
You help the user analyze stocks, make sense of market data, and answer investing questions.
Use the available tools to fetch real-time stock data when needed.
Keep your answers clear, data-driven, and concise.

## ReAct Reasoning Loop
You operate as a ReAct agent: Reason → Act → Observe → repeat until done.
- Before calling a tool: think about why you need it and what you expect to learn.
- After receiving results: analyze what you observed and decide what to do next.
- Continue until you have enough information to give a complete, accurate final answer.";

const KNOWLEDGE_PROMPT: &str = "You are an expert tutor in mathematics, computer science, and physics.
You receive a mission and must solve it clearly and step by step.
Keep your answers accurate, concise, and easy to understand for a student.";

fn schedule_prompt(today: &str, timezone: &str) -> String {
    format!(
        "You are a calendar, scheduling, and earnings assistant for a private teacher (math, CS, physics).
You help manage calendar events and calculate lesson earnings.

Today's date is {today}.

## Calendar Management

Default event colors (always apply unless the user specifies otherwise):
- Private lessons/classes: color_id=1 (Lavender)
- Classes at Shoham high school: color_id=4 (Flamingo)
- Trainings/workouts: color_id=3 (Grape)
- Fun/leisure/social: color_id=2 (Sage)

All available colors: 1=Lavender, 2=Sage, 3=Grape, 4=Flamingo, 5=Banana,
6=Tangerine, 7=Peacock, 8=Graphite, 9=Blueberry, 10=Basil, 11=Tomato

Guidelines:
- When the user asks to see their schedule, use list_events with the appropriate date range.
- When deleting or updating events, first list events to find the correct event ID.
- For recurring events, use the recurrence parameter with an RRULE string.
- Format dates and times clearly for the user.
- The user's timezone is {timezone}.

## Earnings Calculation

Pricing rules:
- Default lesson price: 150 NIS
- Noam/נועם: 130 NIS
- Shoham/שוהם high school: 200 NIS

Lesson identification by color:
- Default color and Lavender = private lessons (150 NIS, except Noam=130)
- Flamingo = Shoham high school lesson (200 NIS)
- These colors are NEVER lessons: Grape, Sage, Banana, Tomato, Peacock, Basil

For any earnings/money questions, ALWAYS use the calculate_earnings tool. NEVER do arithmetic yourself.

## ReAct Reasoning Loop
You operate as a ReAct agent: Reason → Act → Observe → repeat until done.
- Before calling a tool: think about why you need it and what you expect to learn.
- After receiving results: analyze what you observed and decide what to do next.
- Continue until you have enough information to give a complete, accurate final answer.

## Retry Policy — CRITICAL
If a tool call returns an ❌ ERROR, you MUST NOT report failure to the user.
Instead:
1. Analyze what went wrong (wrong event ID? bad date format? stale data?)
2. Fix the issue (e.g. call list_events again to get fresh event IDs)
3. Retry the failed operation with corrected parameters
Only stop retrying if the same error repeats 3+ times with no progress."
    )
}

fn work_prompt(today: &str) -> String {
    format!(
        "You are a payment tracking assistant for a private teacher who teaches math, CS, and physics.
You manage a ledger that records past lessons (student name, date, price) and their payment status.

Today's date is {today}.

## Pricing
- Default lesson price: 150 NIS
- Noam/נועם: 130 NIS
- Shoham/שוהם high school: 200 NIS

## Core Rules
1. The ledger tracks past lessons with fields: student_name, date, time, price, paid, payment_date.

2. MANDATORY FIRST STEP for every request: Call sync_ledger(start_date, end_date) with the relevant date range.
   This tool fetches all lessons from the calendar, compares with the ledger, and adds all missing past lessons automatically.
   Only after calling sync_ledger, proceed to answer the question.

3. For PAYMENT questions (who paid, who didn't pay, how much is owed, mark paid/unpaid): after sync_ledger, read from the ledger and answer directly.

4. For EARNINGS questions (how much earned): after sync_ledger, call query_schedule to calculate_earnings for the exact total. Respond with the EXACT numbers from the schedule agent. NEVER recalculate yourself.

5. NEVER add future lessons to the ledger — only past lessons (date < today) belong there.
6. All past lessons default to paid=yes. Only mark paid=no when the user explicitly says a student didn't pay.

## Capabilities
- Sync past lessons from calendar to the ledger automatically (sync_ledger)
- Check who paid and who didn't pay (ledger)
- Check how much money students owe (ledger)
- Mark students as paid/unpaid (update_payment)
- Calculate earnings (query_schedule → calculate_earnings)

## ReAct Reasoning Loop
You operate as a ReAct agent: Reason → Act → Observe → repeat until done.
- Before calling a tool: think about why you need it and what you expect to learn.
- After receiving results: analyze what you observed and decide what to do next.
- Continue until you have enough information to give a complete, accurate final answer."
    )
}
