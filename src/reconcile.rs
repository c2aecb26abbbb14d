//! Calendar-to-ledger reconciliation
//!
//! Merges the authoritative lesson events from the calendar into the ledger:
//! past lessons only, diffed by the `(date, time)` slot, appended in one
//! batch. Idempotent — a second run over unchanged source data inserts
//! nothing. Existing rows are never touched; payment updates go through the
//! ledger tools.

use crate::models::{LedgerRow, PaidStatus};
use crate::schema::{ParamSchema, ToolSpec};
use crate::tools::calendar::LessonSource;
use crate::tools::ledger::LedgerStore;
use crate::tools::{require_date, Tool};
use crate::Result;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

pub struct Reconciler {
    source: Arc<dyn LessonSource>,
    ledger: Arc<LedgerStore>,
}

impl Reconciler {
    pub fn new(source: Arc<dyn LessonSource>, ledger: Arc<LedgerStore>) -> Self {
        Self { source, ledger }
    }

    pub async fn reconcile(&self, start: NaiveDate, end: NaiveDate) -> Result<String> {
        self.reconcile_as_of(start, end, Local::now().date_naive())
            .await
    }

    /// Split out so tests can pin "today"
    pub async fn reconcile_as_of(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    ) -> Result<String> {
        let candidates = self.source.list_lessons(start, end).await?;

        // Future lessons are never staged; the ledger records what happened
        let past: Vec<_> = candidates
            .into_iter()
            .filter(|lesson| lesson.date < today)
            .collect();
        if past.is_empty() {
            return Ok(format!(
                "No past lessons found between {} and {}.",
                start, end
            ));
        }

        let occupied = self.ledger.occupied_slots()?;

        let mut staged: HashSet<(NaiveDate, String)> = HashSet::new();
        let mut missing = Vec::new();
        let mut skipped_duplicates = Vec::new();
        for lesson in &past {
            let slot = lesson.slot();
            // Already in the ledger: nothing to do
            if occupied.contains(&slot) {
                continue;
            }
            // First-seen occupies the slot; later candidates for the same
            // slot are reported, not inserted
            if staged.contains(&slot) {
                skipped_duplicates.push(lesson);
                continue;
            }
            staged.insert(slot);
            missing.push(LedgerRow {
                student_name: lesson.student_name.clone(),
                date: lesson.date,
                time: lesson.time.clone(),
                price: lesson.price,
                paid: PaidStatus::Yes,
                payment_date: String::new(),
            });
        }

        if missing.is_empty() {
            return Ok(format!(
                "Ledger is already up to date for {} to {}. ({} lessons already recorded)",
                start,
                end,
                past.len()
            ));
        }

        self.ledger.append_rows(&missing)?;
        info!(
            inserted = missing.len(),
            skipped = skipped_duplicates.len(),
            %start,
            %end,
            "Ledger reconciled"
        );

        let mut summary = format!("Added {} missing lessons to the ledger.", missing.len());
        for row in &missing {
            summary.push_str(&format!(
                "\n  {} on {} at {}, {} NIS",
                row.student_name, row.date, row.time, row.price
            ));
        }
        if !skipped_duplicates.is_empty() {
            summary.push_str(&format!(
                "\nSkipped {} duplicate slot(s):",
                skipped_duplicates.len()
            ));
            for lesson in skipped_duplicates {
                summary.push_str(&format!(
                    "\n  {} on {} at {} (slot already staged)",
                    lesson.student_name, lesson.date, lesson.time
                ));
            }
        }
        Ok(summary)
    }
}

/// The work agent's sync tool; wraps the reconciler as a callable capability
pub struct SyncLedgerTool {
    reconciler: Arc<Reconciler>,
}

impl SyncLedgerTool {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl Tool for SyncLedgerTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "sync_ledger",
            "Fetch all lesson events from the calendar for a date range, compare \
             with the ledger, and add any missing past lessons in one batch. Call \
             this FIRST before answering any question.",
            Some(ParamSchema::object(
                vec![
                    (
                        "start_date",
                        ParamSchema::string("Start date in YYYY-MM-DD format"),
                    ),
                    (
                        "end_date",
                        ParamSchema::string(
                            "End date in YYYY-MM-DD format (use today for 'until now' queries)",
                        ),
                    ),
                ],
                vec!["start_date", "end_date"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let start = require_date(args, "start_date")?;
        let end = require_date(args, "end_date")?;
        self.reconciler.reconcile(start, end).await
    }
}
