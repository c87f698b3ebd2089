//! Persistence layer.
//!
//! Saves and loads the executor's order journal to/from a JSON file so the
//! rolling daily budget survives restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::engine::executor::OrderRecord;
use crate::types::PredictorError;

/// Default journal file path.
pub const DEFAULT_JOURNAL_FILE: &str = "predictor_journal.json";

#[derive(Debug, Serialize, Deserialize)]
struct JournalFile {
    saved_at: DateTime<Utc>,
    orders: Vec<OrderRecord>,
}

fn storage_error(action: &str, path: &str, err: impl std::fmt::Display) -> PredictorError {
    PredictorError::Storage(format!("failed to {action} {path}: {err}"))
}

/// Save the order journal as pretty JSON.
pub fn save_journal(orders: &[OrderRecord], path: Option<&str>) -> Result<(), PredictorError> {
    let path = path.unwrap_or(DEFAULT_JOURNAL_FILE);
    let file = JournalFile {
        saved_at: Utc::now(),
        orders: orders.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| storage_error("serialise journal for", path, e))?;

    std::fs::write(path, json).map_err(|e| storage_error("write", path, e))?;

    debug!(path, orders = orders.len(), "Journal saved");
    Ok(())
}

/// Load the order journal. Returns `None` if the file doesn't exist.
pub fn load_journal(path: Option<&str>) -> Result<Option<Vec<OrderRecord>>, PredictorError> {
    let path = path.unwrap_or(DEFAULT_JOURNAL_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved journal found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).map_err(|e| storage_error("read", path, e))?;
    let file: JournalFile =
        serde_json::from_str(&json).map_err(|e| storage_error("parse", path, e))?;

    info!(
        path,
        orders = file.orders.len(),
        saved_at = %file.saved_at,
        "Journal loaded from disk"
    );
    Ok(Some(file.orders))
}

/// Delete the journal file (for testing or reset).
pub fn delete_journal(path: Option<&str>) -> Result<(), PredictorError> {
    let path = path.unwrap_or(DEFAULT_JOURNAL_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).map_err(|e| storage_error("delete", path, e))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
