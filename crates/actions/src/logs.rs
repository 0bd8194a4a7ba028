//! Append-only structured log channel from handlers to the host.
//!
//! Entries end up in host surfaces (toast/preview, results log). Ordering
//! within one activation is preserved; nothing is promised across
//! activations.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
    Info,
    Warning,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Info => "info",
            Self::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub status: LogStatus,
    pub description: String,
    /// Optional payload, e.g. an upstream response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(status: LogStatus, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
            details: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Where log entries go. Implemented by the host.
pub trait LogSink: Send + Sync {
    fn append(&self, entry: LogEntry);
}

/// Collects entries in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, entry: LogEntry) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }
}

/// Forwards entries to a host consumer over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelLogSink {
    tx: mpsc::UnboundedSender<LogEntry>,
}

impl ChannelLogSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LogSink for ChannelLogSink {
    fn append(&self, entry: LogEntry) {
        // Receiver gone means the host stopped listening; entries are dropped.
        let _ = self.tx.send(entry);
    }
}

/// Handle given to handlers for appending log entries.
#[derive(Clone)]
pub struct Logs {
    sink: Arc<dyn LogSink>,
    echo: bool,
}

impl Logs {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink, echo: false }
    }

    /// Also emit every entry as a `tracing` event.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn append(&self, entry: LogEntry) {
        if self.echo {
            match entry.status {
                LogStatus::Error | LogStatus::Warning => {
                    warn!(status = entry.status.as_str(), "{}", entry.description)
                }
                LogStatus::Success | LogStatus::Info => {
                    info!(status = entry.status.as_str(), "{}", entry.description)
                }
            }
        }
        self.sink.append(entry);
    }

    pub fn success(&self, description: impl Into<String>) {
        self.append(LogEntry::new(LogStatus::Success, description));
    }

    pub fn error(&self, description: impl Into<String>) {
        self.append(LogEntry::new(LogStatus::Error, description));
    }

    pub fn info(&self, description: impl Into<String>) {
        self.append(LogEntry::new(LogStatus::Info, description));
    }

    pub fn warning(&self, description: impl Into<String>) {
        self.append(LogEntry::new(LogStatus::Warning, description));
    }
}
