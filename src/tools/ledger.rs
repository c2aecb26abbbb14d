//! Lesson ledger store and tools
//!
//! One JSON file of ledger rows, read then rewritten in full on every
//! mutation. Safe only because the session lock keeps one request in flight;
//! the store itself does no locking. Rows are keyed by `(date, time)` — the
//! same slot is the same lesson regardless of recorded name.

use crate::error::AssistantError;
use crate::models::{LedgerRow, PaidStatus};
use crate::schema::{ParamSchema, ToolSpec};
use crate::tools::{optional_str, require_date, require_str, Tool};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// File-backed row store. Unlike history streams, the ledger is the record
/// of truth — a malformed file is an error, not an empty ledger.
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn rows(&self) -> Result<Vec<LedgerRow>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw)
            .map_err(|e| AssistantError::Ledger(format!("malformed ledger file: {}", e)))
    }

    fn write_all(&self, rows: &[LedgerRow]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(rows)?)?;
        Ok(())
    }

    /// Occupied `(date, time)` slots
    pub fn occupied_slots(&self) -> Result<HashSet<(NaiveDate, String)>> {
        Ok(self.rows()?.iter().map(LedgerRow::slot).collect())
    }

    /// Append rows in one batch without occupancy checks; the caller has
    /// already diffed against the existing slots
    pub fn append_rows(&self, new_rows: &[LedgerRow]) -> Result<()> {
        let mut rows = self.rows()?;
        rows.extend_from_slice(new_rows);
        self.write_all(&rows)
    }

    /// Add one row unless its slot is taken; returns the occupying row on
    /// conflict
    pub fn add_row(&self, row: LedgerRow) -> Result<std::result::Result<(), LedgerRow>> {
        let mut rows = self.rows()?;
        if let Some(existing) = rows.iter().find(|r| r.slot() == row.slot()) {
            return Ok(Err(existing.clone()));
        }
        rows.push(row);
        self.write_all(&rows)?;
        Ok(Ok(()))
    }

    /// Update payment status by natural key; returns the updated row, or
    /// None when no lesson occupies the slot
    pub fn update_payment(
        &self,
        date: NaiveDate,
        time: &str,
        paid: PaidStatus,
        payment_date: &str,
    ) -> Result<Option<LedgerRow>> {
        let mut rows = self.rows()?;
        let Some(row) = rows.iter_mut().find(|r| r.date == date && r.time == time) else {
            return Ok(None);
        };
        row.paid = paid;
        row.payment_date = payment_date.to_string();
        let updated = row.clone();
        self.write_all(&rows)?;
        Ok(Some(updated))
    }
}

fn render_row(row: &LedgerRow) -> String {
    let payment_date = if row.payment_date.is_empty() {
        "N/A"
    } else {
        row.payment_date.as_str()
    };
    format!(
        "Student: {}, Date: {}, Time: {}, Price: {} NIS, Paid: {}, Payment Date: {}",
        row.student_name, row.date, row.time, row.price, row.paid, payment_date
    )
}

fn require_paid(args: &Value) -> Result<PaidStatus> {
    match require_str(args, "paid")? {
        "yes" => Ok(PaidStatus::Yes),
        "no" => Ok(PaidStatus::No),
        other => Err(AssistantError::InvalidToolInput(format!(
            "'paid' must be 'yes' or 'no', got '{}'",
            other
        ))),
    }
}

fn require_price(args: &Value) -> Result<u32> {
    let value = args
        .get("price")
        .ok_or_else(|| AssistantError::InvalidToolInput("missing 'price'".to_string()))?;
    // The model sends prices as either numbers or strings
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|v| v as u32)
            .ok_or_else(|| AssistantError::InvalidToolInput("'price' must be a whole NIS amount".to_string())),
        Value::String(s) => s.parse().map_err(|_| {
            AssistantError::InvalidToolInput(format!("'price' must be a number, got '{}'", s))
        }),
        _ => Err(AssistantError::InvalidToolInput(
            "'price' must be a number".to_string(),
        )),
    }
}

//
// ================= Tools =================
//

pub struct ReadLessonsTool {
    store: Arc<LedgerStore>,
}

impl ReadLessonsTool {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadLessonsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "read_lessons",
            "Read all recorded lessons for a given month. month should be in YYYY-MM format.",
            Some(ParamSchema::object(
                vec![("month", ParamSchema::string("Month in YYYY-MM format"))],
                vec!["month"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let month = require_str(args, "month")?;
        if month.len() != 7 || month.as_bytes()[4] != b'-' {
            return Err(AssistantError::InvalidToolInput(format!(
                "'month' must be YYYY-MM, got '{}'",
                month
            )));
        }

        let rows: Vec<String> = self
            .store
            .rows()?
            .iter()
            .filter(|row| row.date.to_string().starts_with(month))
            .map(render_row)
            .collect();

        if rows.is_empty() {
            return Ok(format!("No lessons found for {}.", month));
        }
        Ok(rows.join("\n"))
    }
}

pub struct AddLessonTool {
    store: Arc<LedgerStore>,
}

impl AddLessonTool {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for AddLessonTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "add_lesson",
            "Add a lesson record. date in YYYY-MM-DD, time in HH:MM (lesson start \
             time), price in NIS. paid is 'yes' or 'no'. payment_date in YYYY-MM-DD \
             or empty.",
            Some(ParamSchema::object(
                vec![
                    ("student_name", ParamSchema::string("Student name")),
                    ("date", ParamSchema::string("Lesson date in YYYY-MM-DD format")),
                    ("time", ParamSchema::string("Lesson start time in HH:MM format")),
                    ("price", ParamSchema::integer("Lesson price in NIS")),
                    ("paid", ParamSchema::string("'yes' or 'no', defaults to 'yes'")),
                    (
                        "payment_date",
                        ParamSchema::string("Payment date in YYYY-MM-DD format, or empty"),
                    ),
                ],
                vec!["student_name", "date", "time", "price"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let row = LedgerRow {
            student_name: require_str(args, "student_name")?.to_string(),
            date: require_date(args, "date")?,
            time: require_str(args, "time")?.to_string(),
            price: require_price(args)?,
            paid: if args.get("paid").and_then(Value::as_str).is_some() {
                require_paid(args)?
            } else {
                PaidStatus::Yes
            },
            payment_date: optional_str(args, "payment_date").to_string(),
        };

        let summary = format!(
            "Lesson added: {} on {} at {}, {} NIS, paid={}.",
            row.student_name, row.date, row.time, row.price, row.paid
        );
        match self.store.add_row(row)? {
            Ok(()) => Ok(summary),
            // Occupied slot is an answer, not a failure
            Err(existing) => Ok(format!(
                "Lesson already exists on {} at {} ({}).",
                existing.date, existing.time, existing.student_name
            )),
        }
    }
}

pub struct UpdatePaymentTool {
    store: Arc<LedgerStore>,
}

impl UpdatePaymentTool {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UpdatePaymentTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "update_payment",
            "Update payment status for a lesson. paid is 'yes' or 'no'. date \
             (YYYY-MM-DD) and time (HH:MM) identify the lesson.",
            Some(ParamSchema::object(
                vec![
                    ("student_name", ParamSchema::string("Student name")),
                    ("date", ParamSchema::string("Lesson date in YYYY-MM-DD format")),
                    ("time", ParamSchema::string("Lesson start time in HH:MM format")),
                    ("paid", ParamSchema::string("'yes' or 'no'")),
                    (
                        "payment_date",
                        ParamSchema::string("Payment date in YYYY-MM-DD format, or empty"),
                    ),
                ],
                vec!["student_name", "date", "time", "paid"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let date = require_date(args, "date")?;
        let time = require_str(args, "time")?;
        let paid = require_paid(args)?;
        let payment_date = optional_str(args, "payment_date");

        match self.store.update_payment(date, time, paid, payment_date)? {
            Some(updated) => Ok(format!(
                "Payment updated: {} on {} → paid={}.",
                updated.student_name, updated.date, updated.paid
            )),
            None => Ok(format!("No lesson found on {} at {}.", date, time)),
        }
    }
}

pub struct GetAllLessonsTool {
    store: Arc<LedgerStore>,
}

impl GetAllLessonsTool {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetAllLessonsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("get_all_lessons", "Read every recorded lesson.", None)
    }

    async fn invoke(&self, _args: &Value) -> Result<String> {
        let rows = self.store.rows()?;
        if rows.is_empty() {
            return Ok("No lessons recorded yet.".to_string());
        }
        Ok(rows.iter().map(render_row).collect::<Vec<_>>().join("\n"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn temp_store() -> (tempfile::TempDir, Arc<LedgerStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LedgerStore::new(dir.path().join("work_ledger.json")));
        (dir, store)
    }

    pub(crate) fn row(name: &str, date: &str, time: &str, price: u32) -> LedgerRow {
        LedgerRow {
            student_name: name.to_string(),
            date: date.parse().unwrap(),
            time: time.to_string(),
            price,
            paid: PaidStatus::Yes,
            payment_date: String::new(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_dir, store) = temp_store();
        assert!(store.rows().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_ledger_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work_ledger.json");
        fs::write(&path, "{not a list").unwrap();
        let store = LedgerStore::new(path);
        assert!(matches!(
            store.rows().unwrap_err(),
            AssistantError::Ledger(_)
        ));
    }

    #[test]
    fn test_add_row_rejects_occupied_slot() {
        let (_dir, store) = temp_store();
        store.add_row(row("Noam", "2025-03-03", "16:00", 130)).unwrap().unwrap();

        // Same slot, different name — same lesson
        let conflict = store
            .add_row(row("Dana", "2025-03-03", "16:00", 150))
            .unwrap()
            .unwrap_err();
        assert_eq!(conflict.student_name, "Noam");
        assert_eq!(store.rows().unwrap().len(), 1);
    }

    #[test]
    fn test_update_payment_by_natural_key() {
        let (_dir, store) = temp_store();
        store.add_row(row("Noam", "2025-03-03", "16:00", 130)).unwrap().unwrap();

        let updated = store
            .update_payment(
                "2025-03-03".parse().unwrap(),
                "16:00",
                PaidStatus::No,
                "",
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.paid, PaidStatus::No);

        let missing = store
            .update_payment("2025-03-04".parse().unwrap(), "16:00", PaidStatus::Yes, "")
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_add_lesson_tool_defaults_paid_yes() {
        let (_dir, store) = temp_store();
        let tool = AddLessonTool::new(store.clone());

        let out = tool
            .invoke(&json!({
                "student_name": "Dana",
                "date": "2025-03-03",
                "time": "17:00",
                "price": 150,
            }))
            .await
            .unwrap();
        assert!(out.contains("paid=yes"));

        let rows = store.rows().unwrap();
        assert_eq!(rows[0].paid, PaidStatus::Yes);
        assert_eq!(rows[0].payment_date, "");
    }

    #[tokio::test]
    async fn test_add_lesson_tool_accepts_string_price() {
        let (_dir, store) = temp_store();
        let tool = AddLessonTool::new(store.clone());
        tool.invoke(&json!({
            "student_name": "Dana",
            "date": "2025-03-03",
            "time": "17:00",
            "price": "150",
        }))
        .await
        .unwrap();
        assert_eq!(store.rows().unwrap()[0].price, 150);
    }

    #[tokio::test]
    async fn test_read_lessons_filters_by_month() {
        let (_dir, store) = temp_store();
        store.add_row(row("Noam", "2025-03-03", "16:00", 130)).unwrap().unwrap();
        store.add_row(row("Dana", "2025-04-01", "17:00", 150)).unwrap().unwrap();

        let tool = ReadLessonsTool::new(store);
        let march = tool.invoke(&json!({"month": "2025-03"})).await.unwrap();
        assert!(march.contains("Noam"));
        assert!(!march.contains("Dana"));

        let may = tool.invoke(&json!({"month": "2025-05"})).await.unwrap();
        assert_eq!(may, "No lessons found for 2025-05.");
    }

    #[tokio::test]
    async fn test_update_payment_tool_reports_missing_slot() {
        let (_dir, store) = temp_store();
        let tool = UpdatePaymentTool::new(store);
        let out = tool
            .invoke(&json!({
                "student_name": "Noam",
                "date": "2025-03-03",
                "time": "16:00",
                "paid": "no",
            }))
            .await
            .unwrap();
        assert_eq!(out, "No lesson found on 2025-03-03 at 16:00.");
    }
}
