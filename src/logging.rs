//! Structured logging module for ShadowLink
//!
//! Writes daily log files under `$SHADOWLINK_LOG_DIR` (default
//! `~/.shadowlink/logs`) with categories:
//! - STORE: persistence gateway activity
//! - CHAT: send-message orchestration
//! - FLOW: prompt template invocations
//! - DASHBOARD: aggregation runs
//! - ERROR: errors and masked failures

use chrono::{Local, Utc};
use once_cell::sync::Lazy;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Log categories for structured logging
#[derive(Debug, Clone, Copy)]
pub enum LogCategory {
    Store,     // Persistence gateway reads/writes
    Chat,      // Message-send orchestration
    Flow,      // Template calls to the hosted model
    Dashboard, // Aggregation runs
    Error,     // Errors and masked failures
}

impl LogCategory {
    fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Store => "STORE",
            LogCategory::Chat => "CHAT",
            LogCategory::Flow => "FLOW",
            LogCategory::Dashboard => "DASHBOARD",
            LogCategory::Error => "ERROR",
        }
    }
}

/// Global log file handle
static LOG_FILE: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

/// Get the log directory path
fn get_log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SHADOWLINK_LOG_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".shadowlink/logs")
}

/// Get today's log file path
fn get_log_file_path() -> PathBuf {
    let today = Local::now().format("%Y-%m-%d").to_string();
    get_log_dir().join(format!("shadowlink-{}.log", today))
}

/// Initialize the logging system - creates log directory if needed
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = get_log_dir();

    if !log_dir.exists() {
        fs::create_dir_all(&log_dir)?;
    }

    let log_path = get_log_file_path();
    *LOG_FILE.lock().unwrap() = Some(log_path.clone());

    log(LogCategory::Store, None, "ShadowLink logging initialized");

    Ok(())
}

/// Log a message with category and optional conversation context
pub fn log(category: LogCategory, conversation_id: Option<&str>, message: &str) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let conv_context = conversation_id
        .map(|id| format!("conversation={} | ", &id[..8.min(id.len())]))
        .unwrap_or_default();

    let log_line = format!(
        "[{}] [{}] {}{}\n",
        timestamp,
        category.as_str(),
        conv_context,
        message
    );

    // Always print to console (for dev)
    print!("{}", log_line);

    // Write to file
    let log_path = get_log_file_path();
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let _ = file.write_all(log_line.as_bytes());
    }
}

/// Log a persistence gateway event
pub fn log_store(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Store, conversation_id, message);
}

/// Log a chat-turn orchestration event
pub fn log_chat(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Chat, conversation_id, message);
}

/// Log a template invocation
pub fn log_flow(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Flow, conversation_id, message);
}

/// Log a dashboard aggregation event
pub fn log_dashboard(message: &str) {
    log(LogCategory::Dashboard, None, message);
}

/// Log an error
pub fn log_error(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Error, conversation_id, message);
}

/// Clean up old log files (keep last 7 days)
pub fn cleanup_old_logs() -> Result<usize, Box<dyn std::error::Error>> {
    let log_dir = get_log_dir();
    let mut deleted = 0;

    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(7);

    for entry in fs::read_dir(&log_dir)? {
        let entry = entry?;
        let path = entry.path();

        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                let modified_time: chrono::DateTime<Utc> = modified.into();
                if modified_time < cutoff {
                    if fs::remove_file(&path).is_ok() {
                        deleted += 1;
                    }
                }
            }
        }
    }

    Ok(deleted)
}
