use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use logdeck_types::{FetchedRecord, Schedule};

use crate::poll::{PollingSource, StructuredFetch};

/// Entry as printed by `gcloud logging read --format=json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcloudEntry {
    #[serde(default)]
    json_payload: Option<Value>,
    #[serde(default)]
    text_payload: Option<String>,
    #[serde(default)]
    severity: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    insert_id: String,
}

impl From<GcloudEntry> for FetchedRecord {
    fn from(entry: GcloudEntry) -> Self {
        let payload = match (entry.json_payload, entry.text_payload) {
            (Some(json), _) => json,
            (None, Some(text)) => Value::String(text),
            (None, None) => Value::Null,
        };

        FetchedRecord {
            payload,
            severity: entry.severity,
            timestamp: entry.timestamp,
            insert_id: entry.insert_id,
        }
    }
}

/// Structured fetch backed by the gcloud CLI
#[derive(Clone, Debug)]
pub struct GcloudFetcher {
    project: String,
    freshness: Option<Duration>,
}

impl GcloudFetcher {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            freshness: None,
        }
    }

    /// Only read entries younger than `since`
    pub fn with_freshness(mut self, since: Option<Duration>) -> Self {
        self.freshness = since.filter(|d| !d.is_zero());
        self
    }

    /// Filter expression selecting one log of the project
    pub fn log_filter(&self, log_name: &str) -> String {
        format!("logName=projects/{}/logs/{}", self.project, log_name)
    }

    fn args(&self, filter: &str, cursor: Option<DateTime<Utc>>, limit: Option<u32>) -> Vec<String> {
        let filter = match cursor {
            Some(cursor) => format!(
                "{} AND timestamp>=\"{}\"",
                filter,
                cursor.to_rfc3339_opts(SecondsFormat::Nanos, true)
            ),
            None => filter.to_string(),
        };

        let mut args = vec![
            "logging".to_string(),
            "read".to_string(),
            filter,
            "--format=json".to_string(),
            format!("--project={}", self.project),
        ];
        if let Some(freshness) = self.freshness {
            args.push(format!("--freshness={}s", freshness.as_secs().max(1)));
        }
        if let Some(limit) = limit {
            args.push(format!("--limit={}", limit));
        }
        args
    }
}

#[async_trait]
impl StructuredFetch for GcloudFetcher {
    async fn fetch(
        &self,
        filter: &str,
        cursor: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<FetchedRecord>> {
        let output = Command::new("gcloud")
            .args(self.args(filter, cursor, limit))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .context("running gcloud logging read")?;

        if !output.status.success() {
            bail!(
                "gcloud logging read exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_entries(&output.stdout)
    }
}

fn parse_entries(stdout: &[u8]) -> Result<Vec<FetchedRecord>> {
    if stdout.trim_ascii().is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<GcloudEntry> =
        serde_json::from_slice(stdout).context("decoding gcloud logging output")?;
    Ok(entries.into_iter().map(FetchedRecord::from).collect())
}

/// Polling source for one gcloud log
pub fn gcloud_source(
    fetcher: GcloudFetcher,
    log_name: &str,
    schedule: Schedule,
    tail: Option<u32>,
) -> PollingSource<GcloudFetcher> {
    let filter = fetcher.log_filter(log_name);
    PollingSource::new(format!("gcloud/{}", log_name), fetcher, filter, schedule).with_limit(tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_filter() {
        let fetcher = GcloudFetcher::new("acme");
        assert_eq!(fetcher.log_filter("api"), "logName=projects/acme/logs/api");
    }

    #[test]
    fn test_args_with_cursor_and_limits() {
        let fetcher = GcloudFetcher::new("acme").with_freshness(Some(Duration::from_secs(3600)));
        let cursor = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let args = fetcher.args("logName=x", Some(cursor), Some(50));

        assert_eq!(
            args,
            vec![
                "logging",
                "read",
                "logName=x AND timestamp>=\"2024-01-01T00:00:00.000000000Z\"",
                "--format=json",
                "--project=acme",
                "--freshness=3600s",
                "--limit=50",
            ]
        );
    }

    #[test]
    fn test_args_without_cursor() {
        let fetcher = GcloudFetcher::new("acme").with_freshness(Some(Duration::ZERO));
        let args = fetcher.args("logName=x", None, None);
        assert_eq!(args, vec!["logging", "read", "logName=x", "--format=json", "--project=acme"]);
    }

    #[test]
    fn test_parse_entries() {
        let stdout = br#"[
            {
                "insertId": "abc",
                "jsonPayload": {"message": "hello"},
                "severity": "WARNING",
                "timestamp": "2024-01-01T00:00:01.5Z"
            },
            {
                "insertId": "def",
                "textPayload": "plain",
                "timestamp": "2024-01-01T00:00:00Z"
            }
        ]"#;

        let records = parse_entries(stdout).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].insert_id, "abc");
        assert_eq!(records[0].severity, "WARNING");
        assert_eq!(records[0].payload["message"], "hello");
        assert_eq!(records[1].payload, Value::String("plain".to_string()));
        assert_eq!(records[1].severity, "");
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_entries(b"").unwrap().is_empty());
        assert!(parse_entries(b"[]").unwrap().is_empty());
        assert!(parse_entries(b"not json").is_err());
    }
}
