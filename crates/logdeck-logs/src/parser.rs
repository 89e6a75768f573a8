use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use logdeck_types::{PID_KEY, TIME_KEY};

/// Facts extracted from one structured record at insertion time
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecordFields {
    /// Top-level keys, in document order
    pub keys: Vec<String>,

    /// Parsed `time` field
    pub time: Option<DateTime<Utc>>,

    /// Parsed `pid` field
    pub pid: Option<i32>,
}

/// Parser for the structured wire records
pub struct LogParser;

impl LogParser {
    /// Parse a raw line as a JSON object.
    ///
    /// Returns `None` when the line is not a JSON object; such lines are
    /// stored opaquely and contribute no fields.
    pub fn parse(raw: &[u8]) -> Option<RecordFields> {
        let object = Self::parse_object(raw)?;

        Some(RecordFields {
            keys: object.keys().cloned().collect(),
            time: object.get(TIME_KEY).and_then(Self::parse_time),
            pid: object.get(PID_KEY).and_then(Self::parse_pid),
        })
    }

    /// Parse a raw line into a JSON map, if it is an object
    pub fn parse_object(raw: &[u8]) -> Option<Map<String, Value>> {
        let trimmed = raw.trim_ascii();
        if !trimmed.starts_with(b"{") {
            return None;
        }

        match serde_json::from_slice(trimmed).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Parse an RFC3339 timestamp value
    pub fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
        let s = value.as_str()?;
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Parse a pid given either as a number or as a numeric string. Only
    /// positive values name a single process.
    fn parse_pid(value: &Value) -> Option<i32> {
        let pid: i32 = match value {
            Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok())?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        (pid > 0).then_some(pid)
    }

}

/// Resolve a dotted path (`a.b.0.c`) inside a JSON value.
///
/// Numeric segments index arrays; `\.` escapes a literal dot in a key.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = value;
    for segment in split_path(path) {
        current = match current {
            Value::Object(map) => map.get(&segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    segments
}
