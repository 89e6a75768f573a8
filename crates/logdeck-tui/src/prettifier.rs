use chrono::{DateTime, SecondsFormat, Utc};
use ratatui::style::Style;
use ratatui::text::{Line, Span};
use serde_json::{Map, Value};

use logdeck_logs::LogParser;
use logdeck_types::{LEVEL_KEY, LogLevel, MSG_KEY, TIME_KEY};

use crate::ui::Theme;

/// Width the message column is padded to in text mode
const MSG_WIDTH: usize = 44;

const MISSING_MSG: &str = "'msg' field missing";

/// Renders stored records for display.
///
/// Text mode prints `LEVL[time] msg key=value...` with the remaining keys
/// sorted; JSON mode re-encodes the record with sorted keys. Lines that
/// are not JSON objects are shown as they are.
#[derive(Clone, Debug)]
pub struct Prettifier {
    fields: Vec<String>,
    exclude: bool,
    durations: Vec<String>,
    json: bool,
    json_pretty: bool,
    full_time: bool,
    colors: bool,
}

impl Prettifier {
    pub fn new(fields: Vec<String>, durations: Vec<String>) -> Self {
        Self {
            fields,
            exclude: true,
            durations,
            json: false,
            json_pretty: false,
            full_time: false,
            colors: true,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn set_fields(&mut self, fields: Vec<String>) {
        self.fields = fields;
    }

    pub fn durations(&self) -> &[String] {
        &self.durations
    }

    pub fn set_durations(&mut self, durations: Vec<String>) {
        self.durations = durations;
    }

    /// Whether the field list names fields to hide (or the only ones to show)
    pub fn excludes(&self) -> bool {
        self.exclude
    }

    pub fn toggle_exclude(&mut self) {
        self.exclude = !self.exclude;
    }

    pub fn toggle_json(&mut self) {
        self.json = !self.json;
    }

    pub fn toggle_json_pretty(&mut self) {
        self.json_pretty = !self.json_pretty;
    }

    pub fn toggle_full_time(&mut self) {
        self.full_time = !self.full_time;
    }

    pub fn toggle_colors(&mut self) {
        self.colors = !self.colors;
    }

    pub fn colors(&self) -> bool {
        self.colors
    }

    /// Render one record; JSON pretty-printing may yield several lines
    pub fn render(&self, raw: &[u8]) -> Vec<Line<'static>> {
        let Some(mut fields) = LogParser::parse_object(raw) else {
            return vec![Line::raw(String::from_utf8_lossy(raw).into_owned())];
        };

        let msg = match fields.remove(MSG_KEY) {
            Some(Value::String(msg)) => msg,
            Some(other) => {
                fields.insert(MSG_KEY.to_string(), other);
                MISSING_MSG.to_string()
            }
            None => MISSING_MSG.to_string(),
        };

        let level = match fields.remove(LEVEL_KEY) {
            Some(Value::String(level)) => LogLevel::parse(&level),
            Some(other) => {
                fields.insert(LEVEL_KEY.to_string(), other);
                LogLevel::Unknown
            }
            None => LogLevel::Unknown,
        };
        let level = match level {
            LogLevel::Unknown => LogLevel::Panic,
            level => level,
        };

        let time = match fields.remove(TIME_KEY) {
            Some(value) => match LogParser::parse_time(&value) {
                Some(time) => Some(time),
                None => {
                    fields.insert(TIME_KEY.to_string(), value);
                    None
                }
            },
            None => None,
        };

        let fields = self.select_fields(fields);

        if self.json {
            self.render_json(fields, level, &msg, time)
        } else {
            vec![self.render_text(fields, level, &msg, time)]
        }
    }

    fn select_fields(&self, mut fields: Map<String, Value>) -> Map<String, Value> {
        if !self.fields.is_empty() {
            if self.exclude {
                for key in &self.fields {
                    fields.remove(key);
                }
            } else {
                fields = self
                    .fields
                    .iter()
                    .filter_map(|key| Some((key.clone(), fields.remove(key)?)))
                    .collect();
            }
        }
        fields
    }

    fn render_text(
        &self,
        fields: Map<String, Value>,
        level: LogLevel,
        msg: &str,
        time: Option<DateTime<Utc>>,
    ) -> Line<'static> {
        let level_style = if self.colors {
            Theme::level(level)
        } else {
            Style::default()
        };

        let time = match time {
            Some(time) if self.full_time => time.to_rfc3339_opts(SecondsFormat::Secs, true),
            Some(time) => time.format("%H:%M:%S").to_string(),
            None => "-".to_string(),
        };

        let mut spans = vec![
            Span::styled(level.as_str(), level_style),
            Span::raw(format!("[{}] {:<width$}", time, msg, width = MSG_WIDTH)),
        ];

        for (key, value) in fields {
            let value = match value.as_f64() {
                Some(nanos) if self.durations.contains(&key) => format_duration(nanos as i64),
                _ => format_value(&value),
            };
            spans.push(Span::raw(" "));
            spans.push(Span::styled(key, level_style));
            spans.push(Span::raw(format!("={}", value)));
        }

        Line::from(spans)
    }

    fn render_json(
        &self,
        mut fields: Map<String, Value>,
        level: LogLevel,
        msg: &str,
        time: Option<DateTime<Utc>>,
    ) -> Vec<Line<'static>> {
        fields.insert(
            LEVEL_KEY.to_string(),
            Value::String(level_name(level).to_string()),
        );
        fields.insert(MSG_KEY.to_string(), Value::String(msg.to_string()));
        if let Some(time) = time {
            fields.insert(
                TIME_KEY.to_string(),
                Value::String(time.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            );
        }

        let doc = Value::Object(fields);
        let encoded = if self.json_pretty {
            serde_json::to_string_pretty(&doc)
        } else {
            serde_json::to_string(&doc)
        };

        match encoded {
            Ok(text) => text.lines().map(|l| Line::raw(l.to_string())).collect(),
            Err(_) => vec![Line::raw(doc.to_string())],
        }
    }
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warning",
        LogLevel::Error => "error",
        LogLevel::Fatal => "fatal",
        LogLevel::Panic | LogLevel::Unknown => "panic",
    }
}

/// Plain strings stay bare; anything that would be ambiguous is quoted
fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => {
            let bare = !s.is_empty()
                && s.chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | '/' | '@' | '^' | '+'));
            if bare { s.clone() } else { value.to_string() }
        }
        other => other.to_string(),
    }
}

/// Human duration from nanoseconds, e.g. `1.5s`, `250ms`, `1h2m3s`
pub fn format_duration(nanos: i64) -> String {
    const MICRO: u64 = 1_000;
    const MILLI: u64 = 1_000_000;
    const SECOND: u64 = 1_000_000_000;

    if nanos == 0 {
        return "0s".to_string();
    }

    let sign = if nanos < 0 { "-" } else { "" };
    let n = nanos.unsigned_abs();

    let body = if n < MICRO {
        format!("{}ns", n)
    } else if n < MILLI {
        format!("{}µs", fraction(n, MICRO, 3))
    } else if n < SECOND {
        format!("{}ms", fraction(n, MILLI, 6))
    } else {
        let hours = n / (3600 * SECOND);
        let minutes = n / (60 * SECOND) % 60;
        let seconds = fraction(n % (60 * SECOND), SECOND, 9);
        if hours > 0 {
            format!("{}h{}m{}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m{}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    };

    format!("{}{}", sign, body)
}

/// `n / unit` with up to `digits` decimals, trailing zeros trimmed
fn fraction(n: u64, unit: u64, digits: usize) -> String {
    let whole = n / unit;
    let rest = n % unit;
    if rest == 0 {
        return whole.to_string();
    }
    let decimals = format!("{:0width$}", rest, width = digits);
    format!("{}.{}", whole, decimals.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> Prettifier {
        let mut prettifier = Prettifier::new(Vec::new(), Vec::new());
        prettifier.toggle_colors();
        prettifier
    }

    fn text(lines: &[Line<'_>]) -> String {
        lines
            .iter()
            .map(|line| line.spans.iter().map(|s| s.content.as_ref()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_text_layout() {
        let raw = br#"{"time":"2024-05-01T10:20:30Z","level":"warning","msg":"slow query","took":12,"db":"main"}"#;
        let out = text(&plain().render(raw));

        assert_eq!(
            out,
            format!("WARN[10:20:30] {:<44} db=main took=12", "slow query")
        );
    }

    #[test]
    fn test_full_time() {
        let mut prettifier = plain();
        prettifier.toggle_full_time();
        let out = text(&prettifier.render(br#"{"time":"2024-05-01T10:20:30Z","level":"info","msg":"x"}"#));
        assert!(out.starts_with("INFO[2024-05-01T10:20:30Z] x"));
    }

    #[test]
    fn test_missing_msg_and_level() {
        let out = text(&plain().render(br#"{"a":1}"#));
        assert!(out.starts_with("PANI[-] 'msg' field missing"));
        assert!(out.ends_with(" a=1"));
    }

    #[test]
    fn test_not_json_shown_as_is() {
        assert_eq!(text(&plain().render(b"plain text line")), "plain text line");
    }

    #[test]
    fn test_exclude_and_include_fields() {
        let raw = br#"{"msg":"m","level":"info","a":1,"b":2,"c":3}"#;
        let mut prettifier = plain();
        prettifier.set_fields(vec!["b".to_string()]);

        let out = text(&prettifier.render(raw));
        assert!(out.ends_with(" a=1 c=3"));

        prettifier.toggle_exclude();
        let out = text(&prettifier.render(raw));
        assert!(out.ends_with(" b=2"));
        assert!(!out.contains("a=1"));
    }

    #[test]
    fn test_duration_fields() {
        let mut prettifier = plain();
        prettifier.set_durations(vec!["took".to_string()]);

        let out = text(&prettifier.render(br#"{"msg":"m","level":"info","took":1500000000}"#));
        assert!(out.ends_with(" took=1.5s"));
    }

    #[test]
    fn test_value_quoting() {
        let out = text(&plain().render(br#"{"msg":"m","level":"info","err":"bad thing","ok":"x/y"}"#));
        assert!(out.ends_with(r#" err="bad thing" ok=x/y"#));
    }

    #[test]
    fn test_json_mode() {
        let mut prettifier = plain();
        prettifier.toggle_json();
        let raw = br#"{"msg":"m","level":"warn","z":1,"a":2,"time":"2024-05-01T10:20:30Z"}"#;

        assert_eq!(
            text(&prettifier.render(raw)),
            r#"{"a":2,"level":"warning","msg":"m","time":"2024-05-01T10:20:30Z","z":1}"#
        );

        prettifier.toggle_json_pretty();
        assert!(prettifier.render(raw).len() > 1);
    }

    #[test]
    fn test_colored_keys_use_level_style() {
        let prettifier = Prettifier::new(Vec::new(), Vec::new());
        let line = &prettifier.render(br#"{"msg":"m","level":"error","k":1}"#)[0];

        assert_eq!(line.spans[0].style, Theme::level(LogLevel::Error));
        let key = line.spans.iter().find(|s| s.content == "k").unwrap();
        assert_eq!(key.style, Theme::level(LogLevel::Error));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(999), "999ns");
        assert_eq!(format_duration(1_500), "1.5µs");
        assert_eq!(format_duration(250_000_000), "250ms");
        assert_eq!(format_duration(90_000_000_000), "1m30s");
        assert_eq!(format_duration(3_723_500_000_000), "1h2m3.5s");
        assert_eq!(format_duration(3_600_000_000_000), "1h0m0s");
        assert_eq!(format_duration(-2_000_000_000), "-2s");
    }
}
