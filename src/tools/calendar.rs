//! Calendar provider and tools
//!
//! The calendar service is an external HTTP API; `CalendarProvider` is the
//! seam the tools and tests share. `LessonSource` is the structured,
//! non-model path the reconciler reads lesson candidates through: same
//! provider, but filtered by the lesson rules instead of rendered as text.

use crate::config::LessonRules;
use crate::error::AssistantError;
use crate::models::{CalendarEvent, LessonEvent};
use crate::schema::{ParamSchema, ToolSpec};
use crate::tools::{optional_str, require_date, require_str, require_str_list, Tool};
use crate::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use futures_util::future::join_all;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Human-friendly names for provider color IDs
const COLOR_NAMES: [(&str, &str); 11] = [
    ("1", "Lavender"),
    ("2", "Sage"),
    ("3", "Grape"),
    ("4", "Flamingo"),
    ("5", "Banana"),
    ("6", "Tangerine"),
    ("7", "Peacock"),
    ("8", "Graphite"),
    ("9", "Blueberry"),
    ("10", "Basil"),
    ("11", "Tomato"),
];

fn color_name(color_id: &str) -> &'static str {
    COLOR_NAMES
        .iter()
        .find(|(id, _)| *id == color_id)
        .map(|(_, name)| *name)
        .unwrap_or("Default")
}

/// Fields for a new event; empty optional fields are omitted from the request
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub summary: String,
    /// `YYYY-MM-DD HH:MM`, provider-local time
    pub start_time: String,
    pub end_time: String,
    pub description: String,
    pub color_id: String,
    /// RRULE string for recurring events, empty for one-off
    pub recurrence: String,
}

/// Partial update; empty fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub summary: String,
    pub start_time: String,
    pub end_time: String,
    pub description: String,
    pub color_id: String,
}

/// External calendar service
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn list_events(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarEvent>>;
    async fn create_event(&self, event: &NewEvent) -> Result<CalendarEvent>;
    async fn delete_event(&self, event_id: &str) -> Result<()>;
    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> Result<CalendarEvent>;
}

//
// ================= HTTP Client =================
//

/// HTTP-backed calendar provider (pooled client, base URL from config)
pub struct CalendarHttpClient {
    client: Client,
    base_url: String,
}

impl CalendarHttpClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AssistantError::Provider(format!("Calendar client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AssistantError::Provider(format!("Calendar API request failed for {}: {}", path, e))
            })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| AssistantError::Provider(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(AssistantError::Provider(format!(
                "Calendar API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl CalendarProvider for CalendarHttpClient {
    async fn list_events(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarEvent>> {
        let body = self
            .post_json(
                "/api/v1/events/list",
                &json!({
                    "start_date": start.to_string(),
                    "end_date": end.to_string(),
                }),
            )
            .await?;

        let events = body.get("events").cloned().unwrap_or(Value::Array(vec![]));
        Ok(serde_json::from_value(events)?)
    }

    async fn create_event(&self, event: &NewEvent) -> Result<CalendarEvent> {
        let mut body = json!({
            "summary": event.summary,
            "start_time": event.start_time,
            "end_time": event.end_time,
        });
        if !event.description.is_empty() {
            body["description"] = json!(event.description);
        }
        if !event.color_id.is_empty() {
            body["color_id"] = json!(event.color_id);
        }
        if !event.recurrence.is_empty() {
            body["recurrence"] = json!(event.recurrence);
        }

        let response = self.post_json("/api/v1/events/create", &body).await?;
        Ok(serde_json::from_value(
            response.get("event").cloned().unwrap_or(response),
        )?)
    }

    async fn delete_event(&self, event_id: &str) -> Result<()> {
        self.post_json("/api/v1/events/delete", &json!({ "event_id": event_id }))
            .await?;
        Ok(())
    }

    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> Result<CalendarEvent> {
        let mut body = json!({ "event_id": event_id });
        for (key, value) in [
            ("summary", &patch.summary),
            ("start_time", &patch.start_time),
            ("end_time", &patch.end_time),
            ("description", &patch.description),
            ("color_id", &patch.color_id),
        ] {
            if !value.is_empty() {
                body[key] = json!(value);
            }
        }

        let response = self.post_json("/api/v1/events/update", &body).await?;
        Ok(serde_json::from_value(
            response.get("event").cloned().unwrap_or(response),
        )?)
    }
}

/// Stand-in when no calendar endpoint is configured. Every call errors, and
/// the registry turns that into an error-marked result for the model.
pub struct UnconfiguredCalendar;

#[async_trait]
impl CalendarProvider for UnconfiguredCalendar {
    async fn list_events(&self, _start: NaiveDate, _end: NaiveDate) -> Result<Vec<CalendarEvent>> {
        Err(unconfigured())
    }

    async fn create_event(&self, _event: &NewEvent) -> Result<CalendarEvent> {
        Err(unconfigured())
    }

    async fn delete_event(&self, _event_id: &str) -> Result<()> {
        Err(unconfigured())
    }

    async fn update_event(&self, _event_id: &str, _patch: &EventPatch) -> Result<CalendarEvent> {
        Err(unconfigured())
    }
}

fn unconfigured() -> AssistantError {
    AssistantError::Provider("CALENDAR_API_BASE_URL is not configured".to_string())
}

//
// ================= Lesson Source =================
//

/// Structured lesson candidates for the reconciler
#[async_trait]
pub trait LessonSource: Send + Sync {
    async fn list_lessons(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<LessonEvent>>;
}

/// Applies the lesson rules to raw calendar events: drops non-lesson colors
/// and all-day events, prices the rest.
pub struct CalendarLessons {
    provider: Arc<dyn CalendarProvider>,
    rules: LessonRules,
}

impl CalendarLessons {
    pub fn new(provider: Arc<dyn CalendarProvider>, rules: LessonRules) -> Self {
        Self { provider, rules }
    }
}

#[async_trait]
impl LessonSource for CalendarLessons {
    async fn list_lessons(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<LessonEvent>> {
        let events = self.provider.list_events(start, end).await?;

        let mut lessons = Vec::new();
        for event in events {
            if !self.rules.is_lesson(&event.color_id) {
                continue;
            }
            // All-day events carry a bare date; they are never lessons
            let Some((date, time)) = split_start(&event.start) else {
                continue;
            };
            let price = self.rules.lesson_price(&event.title, &event.color_id);
            lessons.push(LessonEvent {
                student_name: event.title,
                date,
                time,
                price,
            });
        }
        Ok(lessons)
    }
}

/// Split `YYYY-MM-DD HH:MM` into date and time; None for date-only starts
fn split_start(start: &str) -> Option<(NaiveDate, String)> {
    if start.len() < 16 {
        return None;
    }
    let date: NaiveDate = start[..10].parse().ok()?;
    Some((date, start[11..16].to_string()))
}

fn validate_datetime(args: &Value, key: &str) -> Result<String> {
    let raw = require_str(args, key)?;
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M").map_err(|_| {
        AssistantError::InvalidToolInput(format!(
            "'{}' must be 'YYYY-MM-DD HH:MM', got '{}'",
            key, raw
        ))
    })?;
    Ok(raw.to_string())
}

//
// ================= Tools =================
//

pub struct ListEventsTool {
    provider: Arc<dyn CalendarProvider>,
}

impl ListEventsTool {
    pub fn new(provider: Arc<dyn CalendarProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for ListEventsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "list_events",
            "List calendar events in a date range.",
            Some(ParamSchema::object(
                vec![
                    (
                        "start_date",
                        ParamSchema::string("Start date in YYYY-MM-DD format"),
                    ),
                    (
                        "end_date",
                        ParamSchema::string("End date in YYYY-MM-DD format"),
                    ),
                ],
                vec!["start_date", "end_date"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let start = require_date(args, "start_date")?;
        let end = require_date(args, "end_date")?;

        let events = self.provider.list_events(start, end).await?;
        if events.is_empty() {
            return Ok(format!("No events found between {} and {}.", start, end));
        }

        let lines: Vec<String> = events
            .iter()
            .map(|event| {
                format!(
                    "ID: {}\n  Title: {}\n  Start: {}\n  End:   {}\n  Color: {}",
                    event.id,
                    event.title,
                    event.start,
                    event.end,
                    color_name(&event.color_id)
                )
            })
            .collect();
        Ok(lines.join("\n\n"))
    }
}

pub struct CreateEventTool {
    provider: Arc<dyn CalendarProvider>,
}

impl CreateEventTool {
    pub fn new(provider: Arc<dyn CalendarProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for CreateEventTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "create_event",
            "Create a calendar event. start_time and end_time in 'YYYY-MM-DD HH:MM' format. \
             color_id is a calendar color ID (1-11). recurrence is an RRULE string like \
             'RRULE:FREQ=WEEKLY;COUNT=10' for recurring events.",
            Some(ParamSchema::object(
                vec![
                    ("summary", ParamSchema::string("Event title")),
                    (
                        "start_time",
                        ParamSchema::string("Start in 'YYYY-MM-DD HH:MM' format"),
                    ),
                    (
                        "end_time",
                        ParamSchema::string("End in 'YYYY-MM-DD HH:MM' format"),
                    ),
                    ("description", ParamSchema::string("Event description")),
                    ("color_id", ParamSchema::string("Calendar color ID (1-11)")),
                    (
                        "recurrence",
                        ParamSchema::string("RRULE string for recurring events"),
                    ),
                ],
                vec!["summary", "start_time", "end_time"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let event = NewEvent {
            summary: require_str(args, "summary")?.to_string(),
            start_time: validate_datetime(args, "start_time")?,
            end_time: validate_datetime(args, "end_time")?,
            description: optional_str(args, "description").to_string(),
            color_id: optional_str(args, "color_id").to_string(),
            recurrence: optional_str(args, "recurrence").to_string(),
        };

        let created = self.provider.create_event(&event).await?;
        Ok(format!(
            "Event created: {} (ID: {})",
            created.title, created.id
        ))
    }
}

pub struct DeleteEventsTool {
    provider: Arc<dyn CalendarProvider>,
}

impl DeleteEventsTool {
    pub fn new(provider: Arc<dyn CalendarProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for DeleteEventsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "delete_events",
            "Delete one or more calendar events by their event IDs. \
             All deletions run in parallel.",
            Some(ParamSchema::object(
                vec![(
                    "event_ids",
                    ParamSchema::array(
                        "IDs of the events to delete",
                        ParamSchema::string("Event ID"),
                    ),
                )],
                vec!["event_ids"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let event_ids = require_str_list(args, "event_ids")?;

        // Per-id failures are embedded as error markers, not surfaced as a
        // tool error, so one bad ID does not roll back the rest
        let deletions = event_ids.iter().map(|id| async move {
            match self.provider.delete_event(id).await {
                Ok(()) => format!("Event {} deleted successfully.", id),
                Err(e) => format!(
                    "{}: Failed to delete {}: {}",
                    crate::tools::ERROR_MARKER,
                    id,
                    e
                ),
            }
        });

        let results = join_all(deletions).await;
        Ok(results.join("\n"))
    }
}

pub struct UpdateEventTool {
    provider: Arc<dyn CalendarProvider>,
}

impl UpdateEventTool {
    pub fn new(provider: Arc<dyn CalendarProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for UpdateEventTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "update_event",
            "Update a calendar event. Only non-empty fields are updated. \
             start_time and end_time in 'YYYY-MM-DD HH:MM' format.",
            Some(ParamSchema::object(
                vec![
                    ("event_id", ParamSchema::string("ID of the event to update")),
                    ("summary", ParamSchema::string("New event title")),
                    (
                        "start_time",
                        ParamSchema::string("New start in 'YYYY-MM-DD HH:MM' format"),
                    ),
                    (
                        "end_time",
                        ParamSchema::string("New end in 'YYYY-MM-DD HH:MM' format"),
                    ),
                    ("description", ParamSchema::string("New description")),
                    ("color_id", ParamSchema::string("New color ID (1-11)")),
                ],
                vec!["event_id"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let event_id = require_str(args, "event_id")?;
        let patch = EventPatch {
            summary: optional_str(args, "summary").to_string(),
            start_time: optional_str(args, "start_time").to_string(),
            end_time: optional_str(args, "end_time").to_string(),
            description: optional_str(args, "description").to_string(),
            color_id: optional_str(args, "color_id").to_string(),
        };

        let updated = self.provider.update_event(event_id, &patch).await?;
        Ok(format!(
            "Event updated: {} (ID: {})",
            updated.title, updated.id
        ))
    }
}

pub struct CalculateEarningsTool {
    provider: Arc<dyn CalendarProvider>,
    rules: LessonRules,
}

impl CalculateEarningsTool {
    pub fn new(provider: Arc<dyn CalendarProvider>, rules: LessonRules) -> Self {
        Self { provider, rules }
    }
}

#[async_trait]
impl Tool for CalculateEarningsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "calculate_earnings",
            "Calculate total and per-day earnings for a date range. Reads lesson \
             events from the calendar, applies pricing rules, and returns total \
             earnings, per-day breakdown, and per-student summary.",
            Some(ParamSchema::object(
                vec![
                    (
                        "start_date",
                        ParamSchema::string("Start date in YYYY-MM-DD format"),
                    ),
                    (
                        "end_date",
                        ParamSchema::string("End date in YYYY-MM-DD format"),
                    ),
                ],
                vec!["start_date", "end_date"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let start = require_date(args, "start_date")?;
        let end = require_date(args, "end_date")?;

        let events = self.provider.list_events(start, end).await?;
        if events.is_empty() {
            return Ok(format!("No events found between {} and {}.", start, end));
        }

        let mut total = 0u32;
        let mut lesson_count = 0u32;
        let mut by_day: BTreeMap<String, u32> = BTreeMap::new();
        let mut by_student: BTreeMap<String, (u32, u32)> = BTreeMap::new();

        for event in &events {
            if !self.rules.is_lesson(&event.color_id) {
                continue;
            }
            let Some((date, _)) = split_start(&event.start) else {
                continue;
            };
            let price = self.rules.lesson_price(&event.title, &event.color_id);
            let day = date.to_string();

            total += price;
            lesson_count += 1;
            *by_day.entry(day).or_insert(0) += price;
            let entry = by_student.entry(event.title.clone()).or_insert((0, 0));
            entry.0 += price;
            entry.1 += 1;
        }

        if lesson_count == 0 {
            return Ok(format!("No lessons found between {} and {}.", start, end));
        }

        let mut lines = vec![format!("=== Earnings for {} to {} ===", start, end)];
        lines.push(format!("Total: {} NIS ({} lessons)", total, lesson_count));
        lines.push("\n--- Per work day ---".to_string());
        for (day, amount) in &by_day {
            lines.push(format!("  {}: {} NIS", day, amount));
        }
        lines.push("\n--- Per student ---".to_string());
        let mut students: Vec<_> = by_student.into_iter().collect();
        students.sort_by(|a, b| b.1 .0.cmp(&a.1 .0));
        for (name, (amount, count)) in students {
            lines.push(format!("  {}: {} NIS ({} lessons)", name, amount, count));
        }

        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;

    /// In-memory provider for tool tests
    pub(crate) struct FakeCalendar {
        pub events: Mutex<Vec<CalendarEvent>>,
        /// IDs whose deletion should fail
        pub failing_ids: Vec<String>,
    }

    impl FakeCalendar {
        pub fn with_events(events: Vec<CalendarEvent>) -> Self {
            Self {
                events: Mutex::new(events),
                failing_ids: Vec::new(),
            }
        }
    }

    pub(crate) fn event(id: &str, title: &str, start: &str, color_id: &str) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            title: title.to_string(),
            start: start.to_string(),
            end: start.to_string(),
            color_id: color_id.to_string(),
        }
    }

    #[async_trait]
    impl CalendarProvider for FakeCalendar {
        async fn list_events(
            &self,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<CalendarEvent>> {
            Ok(self.events.lock().await.clone())
        }

        async fn create_event(&self, event: &NewEvent) -> Result<CalendarEvent> {
            let created = CalendarEvent {
                id: "created-1".to_string(),
                title: event.summary.clone(),
                start: event.start_time.clone(),
                end: event.end_time.clone(),
                color_id: event.color_id.clone(),
            };
            self.events.lock().await.push(created.clone());
            Ok(created)
        }

        async fn delete_event(&self, event_id: &str) -> Result<()> {
            if self.failing_ids.iter().any(|id| id == event_id) {
                return Err(AssistantError::Provider(format!(
                    "event {} not found",
                    event_id
                )));
            }
            self.events.lock().await.retain(|e| e.id != event_id);
            Ok(())
        }

        async fn update_event(&self, event_id: &str, patch: &EventPatch) -> Result<CalendarEvent> {
            let mut events = self.events.lock().await;
            let event = events
                .iter_mut()
                .find(|e| e.id == event_id)
                .ok_or_else(|| AssistantError::Provider(format!("event {} not found", event_id)))?;
            if !patch.summary.is_empty() {
                event.title = patch.summary.clone();
            }
            if !patch.color_id.is_empty() {
                event.color_id = patch.color_id.clone();
            }
            Ok(event.clone())
        }
    }

    fn lesson_fixture() -> Arc<FakeCalendar> {
        Arc::new(FakeCalendar::with_events(vec![
            event("e1", "Noam", "2025-03-03 16:00", "1"),
            event("e2", "Dana", "2025-03-03 17:00", ""),
            event("e3", "Shoham", "2025-03-04 09:00", "4"),
            // Training, never a lesson
            event("e4", "Gym", "2025-03-04 19:00", "3"),
            // All-day event, skipped by the lesson source
            event("e5", "Holiday", "2025-03-05", "1"),
        ]))
    }

    #[tokio::test]
    async fn test_lesson_source_filters_and_prices() {
        let source = CalendarLessons::new(lesson_fixture(), LessonRules::default());
        let lessons = source
            .list_lessons(
                "2025-03-01".parse().unwrap(),
                "2025-03-07".parse().unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(lessons.len(), 3);
        assert_eq!(lessons[0].student_name, "Noam");
        assert_eq!(lessons[0].price, 130);
        assert_eq!(lessons[0].time, "16:00");
        assert_eq!(lessons[1].price, 150);
        assert_eq!(lessons[2].price, 200);
    }

    #[tokio::test]
    async fn test_calculate_earnings_breakdown() {
        let tool = CalculateEarningsTool::new(lesson_fixture(), LessonRules::default());
        let out = tool
            .invoke(&json!({"start_date": "2025-03-01", "end_date": "2025-03-07"}))
            .await
            .unwrap();

        assert!(out.contains("Total: 480 NIS (3 lessons)"));
        assert!(out.contains("2025-03-03: 280 NIS"));
        assert!(out.contains("2025-03-04: 200 NIS"));
        assert!(out.contains("Shoham: 200 NIS (1 lessons)"));
        assert!(!out.contains("Gym"));
    }

    #[tokio::test]
    async fn test_list_events_renders_color_names() {
        let tool = ListEventsTool::new(lesson_fixture());
        let out = tool
            .invoke(&json!({"start_date": "2025-03-01", "end_date": "2025-03-07"}))
            .await
            .unwrap();

        assert!(out.contains("ID: e1"));
        assert!(out.contains("Color: Lavender"));
        assert!(out.contains("Color: Flamingo"));
        assert!(out.contains("Color: Default"));
    }

    #[tokio::test]
    async fn test_delete_events_marks_per_id_failures() {
        let provider = Arc::new(FakeCalendar {
            events: Mutex::new(vec![event("keep", "Keep", "2025-03-03 16:00", "")]),
            failing_ids: vec!["gone".to_string()],
        });
        let tool = DeleteEventsTool::new(provider);

        let out = tool
            .invoke(&json!({"event_ids": ["keep", "gone"]}))
            .await
            .unwrap();

        assert!(out.contains("Event keep deleted successfully."));
        assert!(out.contains(crate::tools::ERROR_MARKER));
        assert!(out.contains("Failed to delete gone"));
    }

    #[tokio::test]
    async fn test_create_event_rejects_bad_datetime() {
        let tool = CreateEventTool::new(lesson_fixture());
        let err = tool
            .invoke(&json!({
                "summary": "Lesson with Dana",
                "start_time": "tomorrow at noon",
                "end_time": "2025-03-08 13:00",
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::InvalidToolInput(_)));
    }
}
