//! Bounded conversation history
//!
//! One JSON file per agent stream plus one router exchange log, under the
//! configured data directory. Streams are trimmed on every save and load, and
//! any corruption (missing file, non-list content, malformed entries)
//! degrades to an empty stream rather than failing the turn.
//!
//! Appends are read-modify-write and rely on the session turn lock for
//! serialization; the store itself holds no in-memory state.

use crate::models::{Exchange, RouterRecord};
use crate::Result;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Exchange pairs kept per agent stream (entries = 2x this)
pub const MAX_EXCHANGES: usize = 10;
/// Entries kept in the router's exchange log
pub const MAX_LAST_EXCHANGES: usize = 20;

const ROUTER_LOG_STREAM: &str = "router_log";

#[derive(Debug, Clone)]
pub struct HistoryStore {
    data_dir: PathBuf,
}

impl HistoryStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path_for(&self, stream: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", stream))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Load a per-agent stream, trimmed to the last `MAX_EXCHANGES` pairs.
    /// Corruption never raises; it degrades to an empty stream.
    pub fn load(&self, stream: &str) -> Vec<Exchange> {
        let path = self.path_for(stream);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };

        match serde_json::from_str::<Vec<Exchange>>(&raw) {
            Ok(mut history) => {
                let max_entries = MAX_EXCHANGES * 2;
                if history.len() > max_entries {
                    history.drain(..history.len() - max_entries);
                }
                history
            }
            Err(e) => {
                warn!(stream, "Discarding corrupt history file: {}", e);
                Vec::new()
            }
        }
    }

    /// Persist a stream, keeping only the last `MAX_EXCHANGES` pairs
    pub fn save(&self, stream: &str, history: &[Exchange]) -> Result<()> {
        self.ensure_dir()?;
        let max_entries = MAX_EXCHANGES * 2;
        let start = history.len().saturating_sub(max_entries);
        let trimmed = &history[start..];
        fs::write(
            self.path_for(stream),
            serde_json::to_string_pretty(trimmed)?,
        )?;
        Ok(())
    }

    /// Read-modify-write: append one completed exchange and persist
    pub fn append_exchange(
        &self,
        stream: &str,
        user_text: &str,
        model_text: &str,
    ) -> Result<()> {
        let mut history = self.load(stream);
        history.push(Exchange::user(user_text));
        history.push(Exchange::model(model_text));
        self.save(stream, &history)
    }

    /// Load the router's exchange log, trimmed to `MAX_LAST_EXCHANGES` entries
    pub fn load_router_log(&self) -> Vec<RouterRecord> {
        let path = self.path_for(ROUTER_LOG_STREAM);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };

        match serde_json::from_str::<Vec<RouterRecord>>(&raw) {
            Ok(mut records) => {
                if records.len() > MAX_LAST_EXCHANGES {
                    records.drain(..records.len() - MAX_LAST_EXCHANGES);
                }
                records
            }
            Err(e) => {
                warn!("Discarding corrupt router log: {}", e);
                Vec::new()
            }
        }
    }

    pub fn save_router_log(&self, records: &[RouterRecord]) -> Result<()> {
        self.ensure_dir()?;
        let start = records.len().saturating_sub(MAX_LAST_EXCHANGES);
        fs::write(
            self.path_for(ROUTER_LOG_STREAM),
            serde_json::to_string_pretty(&records[start..])?,
        )?;
        Ok(())
    }

    pub fn append_router_record(&self, record: RouterRecord) -> Result<()> {
        let mut records = self.load_router_log();
        records.push(record);
        self.save_router_log(&records)
    }
}
