//! Core data models for the assistant orchestrator

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Conversation =================
//

/// Sender of one history entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One persisted history entry; a user/model pair forms an exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exchange {
    pub role: Role,
    pub text: String,
}

impl Exchange {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

//
// ================= Classification =================
//

/// Task domain a message routes to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Stock,
    Work,
    Knowledge,
    Schedule,
    #[serde(other)]
    Unknown,
}

/// Router decision for one inbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub mission: String,
}

impl Classification {
    /// Classification used when the model response could not be parsed
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            category: Category::Unknown,
            confidence: 0.0,
            reason: reason.into(),
            mission: String::new(),
        }
    }
}

/// One completed routed turn in the router's exchange log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterRecord {
    pub category: Category,
    pub mission: String,
    pub answer: String,
}

//
// ================= Ledger =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaidStatus {
    Yes,
    No,
}

/// One recorded lesson; `(date, time)` is the natural key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
    pub student_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub price: u32,
    pub paid: PaidStatus,
    #[serde(default)]
    pub payment_date: String,
}

impl LedgerRow {
    pub fn slot(&self) -> (NaiveDate, String) {
        (self.date, self.time.clone())
    }
}

/// A lesson candidate reported by the calendar source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonEvent {
    pub student_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub price: u32,
}

impl LessonEvent {
    pub fn slot(&self) -> (NaiveDate, String) {
        (self.date, self.time.clone())
    }
}

//
// ================= Calendar =================
//

/// Calendar event as reported by the provider (read-only here)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    /// Local start, `YYYY-MM-DD HH:MM` (date only for all-day events)
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub color_id: String,
}

//
// ================= Turn Result =================
//

/// Final reply for one routed turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReply {
    pub answer: String,
    pub category: Category,
    pub confidence: f32,
    pub reason: String,
    pub mission: String,
}

/// Outcome of one inbound message
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Answered(TurnReply),
    /// Classification escalation exhausted; no agent was invoked
    Unclassified { reason: String },
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Stock => "stock",
            Category::Work => "work",
            Category::Knowledge => "knowledge",
            Category::Schedule => "schedule",
            Category::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for PaidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PaidStatus::Yes => "yes",
                PaidStatus::No => "no",
            }
        )
    }
}
