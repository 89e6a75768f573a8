//! Shared types for logdeck
//!
//! This crate contains data structures used across multiple logdeck crates.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

// ============================================================================
// Wire record keys
// ============================================================================

/// Key holding the RFC3339 timestamp of a wire record
pub const TIME_KEY: &str = "time";

/// Key holding the level of a wire record
pub const LEVEL_KEY: &str = "level";

/// Key holding the message of a wire record
pub const MSG_KEY: &str = "msg";

/// Key holding the pid of a monitored process
pub const PID_KEY: &str = "pid";

/// Synthetic field exposing the raw text of an entry to queries
pub const RAW_FIELD: &str = "raw";

/// Synthetic field exposing the ordinal id of an entry to queries
pub const ID_FIELD: &str = "_id";

// ============================================================================
// Kubernetes Resource Types
// ============================================================================

/// Pod information
#[derive(Clone, Debug)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub status: PodStatus,
    pub containers: Vec<ContainerInfo>,
    pub labels: HashMap<String, String>,
}

impl PodInfo {
    pub fn new(name: String, namespace: String) -> Self {
        Self {
            name,
            namespace,
            status: PodStatus::Unknown,
            containers: Vec::new(),
            labels: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodStatus {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ContainerInfo {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
}

impl ContainerInfo {
    pub fn new(name: String) -> Self {
        Self {
            name,
            ready: false,
            restart_count: 0,
        }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
    Unknown,
}

impl LogLevel {
    /// Parse log level from common formats
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" | "trc" | "trce" => Self::Trace,
            "debug" | "dbg" | "debg" => Self::Debug,
            "info" | "inf" | "information" => Self::Info,
            "warn" | "warning" | "wrn" => Self::Warn,
            "error" | "err" | "erro" => Self::Error,
            "fatal" | "critical" | "crit" | "ftl" => Self::Fatal,
            "panic" | "pnc" => Self::Panic,
            _ => Self::Unknown,
        }
    }

    /// Short display string (4 chars, logrus style)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRAC",
            Self::Debug => "DEBU",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERRO",
            Self::Fatal => "FATA",
            Self::Panic => "PANI",
            Self::Unknown => "????",
        }
    }
}

/// One ingested log record.
///
/// `raw` is shared so that query results and the store can hand out
/// entries without copying the payload.
#[derive(Clone, Debug)]
pub struct Entry {
    /// Ordinal identity, assigned at insertion
    pub id: u64,

    /// Timestamp extracted from the `time` field (if parseable)
    pub time: Option<DateTime<Utc>>,

    /// Original payload
    pub raw: Arc<[u8]>,
}

impl Entry {
    pub fn new(id: u64, time: Option<DateTime<Utc>>, raw: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id,
            time,
            raw: raw.into(),
        }
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }
}

/// One record returned by a structured (cursor based) log fetch
#[derive(Clone, Debug)]
pub struct FetchedRecord {
    /// Structured payload (an object for JSON payloads, a string for text payloads)
    pub payload: serde_json::Value,

    /// Provider severity, e.g. `INFO`, `ERROR`
    pub severity: String,

    /// Emission timestamp
    pub timestamp: DateTime<Utc>,

    /// Identifier unique per record, used for deduplication
    pub insert_id: String,
}

/// How often a polling source fetches
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schedule {
    /// Fetch a single time, then end
    Once,
    /// Fetch on every tick of the given interval
    Every(Duration),
}

impl Schedule {
    /// Build a schedule from a follow flag and a poll interval
    pub fn new(follow: bool, interval: Duration) -> Self {
        if follow && !interval.is_zero() {
            Self::Every(interval)
        } else {
            Self::Once
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("ERROR"), LogLevel::Error);
        assert_eq!(LogLevel::parse("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("panic"), LogLevel::Panic);
        assert_eq!(LogLevel::parse("nope"), LogLevel::Unknown);
    }

    #[test]
    fn test_schedule_zero_interval_runs_once() {
        assert_eq!(Schedule::new(true, Duration::ZERO), Schedule::Once);
        assert_eq!(Schedule::new(false, Duration::from_secs(5)), Schedule::Once);
        assert_eq!(
            Schedule::new(true, Duration::from_secs(5)),
            Schedule::Every(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_entry_text_lossy() {
        let entry = Entry::new(1, None, b"hello \xff".to_vec());
        assert_eq!(entry.text(), "hello \u{fffd}");
    }
}
