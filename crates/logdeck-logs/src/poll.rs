use std::borrow::Cow;
use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error};

use logdeck_types::{FetchedRecord, LEVEL_KEY, MSG_KEY, Schedule, TIME_KEY};

use crate::parser::lookup_path;
use crate::source::{LineSource, SourceError};

/// Ids remembered for deduplication before the oldest are forgotten
pub const DEFAULT_SEEN_CAPACITY: usize = 100_000;

/// Cursor based structured log fetch, newest first
#[async_trait]
pub trait StructuredFetch: Send + Sync {
    async fn fetch(
        &self,
        filter: &str,
        cursor: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> anyhow::Result<Vec<FetchedRecord>>;
}

/// Bounded set of emitted record ids, oldest evicted first
struct SeenIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns false if `id` was already seen
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }

        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }
}

/// Turns a structured fetch into a stream of wire records
pub struct PollingSource<F> {
    name: String,
    fetcher: F,
    filter: String,
    limit: Option<u32>,
    schedule: Schedule,
    ticker: Option<Interval>,
    cursor: Option<DateTime<Utc>>,
    seen: SeenIds,
    pending: VecDeque<Vec<u8>>,
    finished: bool,
}

impl<F: StructuredFetch> PollingSource<F> {
    pub fn new(name: impl Into<String>, fetcher: F, filter: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            fetcher,
            filter: filter.into(),
            limit: None,
            schedule,
            ticker: None,
            cursor: None,
            seen: SeenIds::new(DEFAULT_SEEN_CAPACITY),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_seen_capacity(mut self, capacity: usize) -> Self {
        self.seen = SeenIds::new(capacity);
        self
    }

    /// Timestamp the next fetch starts from
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }

    async fn wait_for_tick(&mut self) {
        match self.schedule {
            Schedule::Once => self.finished = true,
            Schedule::Every(period) => {
                let ticker = self.ticker.get_or_insert_with(|| {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker
                });
                ticker.tick().await;
            }
        }
    }

    async fn poll(&mut self) -> anyhow::Result<()> {
        let batch = self
            .fetcher
            .fetch(&self.filter, self.cursor, self.limit)
            .await?;

        if let Some(newest) = batch.first() {
            self.cursor = Some(match self.cursor {
                Some(cursor) => cursor.max(newest.timestamp),
                None => newest.timestamp,
            });
        }

        let fetched = batch.len();
        let mut emitted = 0;
        for record in batch.into_iter().rev() {
            if !self.seen.insert(&dedup_key(&record)) {
                continue;
            }
            self.pending.push_back(serde_json::to_vec(&normalize(&record))?);
            emitted += 1;
        }

        debug!(source = %self.name, fetched, emitted, "polled");
        Ok(())
    }
}

#[async_trait]
impl<F: StructuredFetch> LineSource for PollingSource<F> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            if self.finished {
                return Ok(None);
            }

            self.wait_for_tick().await;
            if let Err(e) = self.poll().await {
                error!(source = %self.name, error = %e, "fetching logs");
                self.pending.push_back(error_line(&self.name, &e));
                self.finished = true;
            }
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.finished = true;
        self.pending.clear();
        Ok(())
    }
}

/// Identity used for deduplication: the provider id, or the timestamp and
/// payload for records that carry none
fn dedup_key(record: &FetchedRecord) -> Cow<'_, str> {
    if record.insert_id.is_empty() {
        Cow::Owned(format!(
            "{}|{}",
            record.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            record.payload
        ))
    } else {
        Cow::Borrowed(&record.insert_id)
    }
}

fn error_line(name: &str, error: &anyhow::Error) -> Vec<u8> {
    let record = json!({
        TIME_KEY: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        LEVEL_KEY: "error",
        MSG_KEY: format!("fetching {}: {:#}", name, error),
    });
    record.to_string().into_bytes()
}

/// Wire level for a provider severity. Unknown severities map to `panic`.
pub fn severity_level(severity: &str) -> &'static str {
    match severity {
        "DEBUG" => "debug",
        "INFO" | "NOTICE" => "info",
        "WARNING" => "warning",
        "ERROR" => "error",
        "CRITICAL" => "fatal",
        _ => "panic",
    }
}

/// Message of a fetched payload: `message`, then `exception.message`, then `-`
fn message(payload: &Value) -> String {
    if let Value::String(text) = payload {
        if !text.is_empty() {
            return text.clone();
        }
    }

    ["message", "exception.message"]
        .into_iter()
        .filter_map(|path| lookup_path(payload, path))
        .filter_map(Value::as_str)
        .find(|msg| !msg.is_empty())
        .unwrap_or("-")
        .to_string()
}

/// Flatten a fetched record into a wire record.
///
/// Payload keys that collide with `time`, `level` or `msg` are kept under an
/// `entry.` prefix.
pub fn normalize(record: &FetchedRecord) -> Value {
    let mut out = Map::new();

    if let Value::Object(fields) = &record.payload {
        for (key, value) in fields {
            let key = match key.as_str() {
                TIME_KEY | LEVEL_KEY | MSG_KEY => format!("entry.{}", key),
                _ => key.clone(),
            };
            out.insert(key, value.clone());
        }
    }

    out.insert(
        TIME_KEY.to_string(),
        Value::String(record.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)),
    );
    out.insert(MSG_KEY.to_string(), Value::String(message(&record.payload)));
    out.insert(
        LEVEL_KEY.to_string(),
        Value::String(severity_level(&record.severity).to_string()),
    );

    Value::Object(out)
}
