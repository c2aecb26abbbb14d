//! Environment-driven configuration
//!
//! Everything the session needs at startup comes through here: API key, data
//! locations, provider endpoints, and the lesson rules (event-color → lesson
//! classification plus pricing), which can be overridden with a JSON file.

use crate::error::AssistantError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Per-student price override, matched as a case-insensitive substring of the
/// event title
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentPrice {
    pub matches: String,
    pub price: u32,
}

/// Maps calendar event colors to lesson/non-lesson and prices lessons.
///
/// Defaults mirror the user's calendar conventions; a deployment can replace
/// them wholesale via `LESSON_RULES_PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonRules {
    pub default_price: u32,
    /// Color marking high-school lessons (priced separately)
    pub high_school_color: String,
    pub high_school_price: u32,
    /// Colors that are never lessons
    pub non_lesson_colors: Vec<String>,
    pub student_prices: Vec<StudentPrice>,
}

impl Default for LessonRules {
    fn default() -> Self {
        Self {
            default_price: 150,
            high_school_color: "4".to_string(),
            high_school_price: 200,
            non_lesson_colors: ["2", "3", "5", "6", "7", "8", "9", "10", "11"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            student_prices: vec![
                StudentPrice {
                    matches: "noam".to_string(),
                    price: 130,
                },
                StudentPrice {
                    matches: "נועם".to_string(),
                    price: 130,
                },
                StudentPrice {
                    matches: "shoham".to_string(),
                    price: 200,
                },
                StudentPrice {
                    matches: "שוהם".to_string(),
                    price: 200,
                },
            ],
        }
    }
}

impl LessonRules {
    /// Whether an event with this color can be a lesson.
    /// Default color (empty id) counts as a lesson color.
    pub fn is_lesson(&self, color_id: &str) -> bool {
        !self.non_lesson_colors.iter().any(|c| c == color_id)
    }

    /// Price for a lesson: student override first, then color, then default
    pub fn lesson_price(&self, student_name: &str, color_id: &str) -> u32 {
        let name_lower = student_name.to_lowercase();
        for rule in &self.student_prices {
            if name_lower.contains(&rule.matches.to_lowercase()) {
                return rule.price;
            }
        }
        if color_id == self.high_school_color {
            return self.high_school_price;
        }
        self.default_price
    }

    fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AssistantError::Config(format!("Failed to read lesson rules {}: {}", path, e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AssistantError::Config(format!("Invalid lesson rules in {}: {}", path, e))
        })
    }
}

/// Process-wide settings, resolved once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub model: String,
    /// Directory holding per-agent history files and the router log
    pub data_dir: PathBuf,
    /// Ledger row store
    pub ledger_path: PathBuf,
    pub api_port: u16,
    pub calendar_base_url: Option<String>,
    pub market_base_url: Option<String>,
    pub lesson_rules: LessonRules,
    pub timezone: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let gemini_api_key = env::var("GEMINI_API_KEY").unwrap_or_default();

        let model =
            env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());

        let data_dir = env::var("DATA_DIR")
            .unwrap_or_else(|_| "data/memory".to_string())
            .into();

        let ledger_path = env::var("LEDGER_PATH")
            .unwrap_or_else(|_| "data/work_ledger.json".to_string())
            .into();

        let api_port: u16 = env::var("PORT")
            .or_else(|_| env::var("API_PORT"))
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|e| AssistantError::Config(format!("Invalid port: {}", e)))?;

        let lesson_rules = match env::var("LESSON_RULES_PATH") {
            Ok(path) => LessonRules::load(&path)?,
            Err(_) => LessonRules::default(),
        };

        Ok(Self {
            gemini_api_key,
            model,
            data_dir,
            ledger_path,
            api_port,
            calendar_base_url: env::var("CALENDAR_API_BASE_URL").ok(),
            market_base_url: env::var("MARKET_API_BASE_URL").ok(),
            lesson_rules,
            timezone: env::var("ASSISTANT_TIMEZONE")
                .unwrap_or_else(|_| "Asia/Jerusalem".to_string()),
        })
    }
}
