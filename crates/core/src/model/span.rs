use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::row::{Row, value_as_f64, value_as_string};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanRow {
    pub start: Option<DateTime<Utc>>,
    pub duration_ms: f64,
    pub service: String,
    pub operation: String,
    pub kind: String,
    pub status: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

/// Unit a physical duration column is stored in, guessed from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Nanos,
    Micros,
    Millis,
    Seconds,
}

impl DurationUnit {
    pub fn from_field_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with("nano") || lower.ends_with("nanos") || lower.ends_with("_ns") {
            Self::Nanos
        } else if lower.ends_with("_us") || lower.ends_with("_micros") {
            Self::Micros
        } else if lower.ends_with("_s") || lower.ends_with("_seconds") || lower.ends_with("_sec") {
            Self::Seconds
        } else {
            Self::Millis
        }
    }

    fn to_millis(self, value: f64) -> f64 {
        match self {
            Self::Nanos => value / 1_000_000.0,
            Self::Micros => value / 1_000.0,
            Self::Millis => value,
            Self::Seconds => value * 1_000.0,
        }
    }
}

impl SpanRow {
    /// Builds a span from a row whose columns were projected under the
    /// logical names `_time`, `service`, `operation`, `kind`, `status`,
    /// `duration`, `span_id` and `parent_span_id`.
    pub fn from_row(row: &Row, unit: DurationUnit) -> Self {
        let parent_span_id = value_as_string(row.get("parent_span_id"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            start: value_as_string(row.get("_time")).and_then(|s| parse_start(&s)),
            duration_ms: parse_duration_ms(row.get("duration"), unit),
            service: value_as_string(row.get("service")).unwrap_or_default(),
            operation: value_as_string(row.get("operation")).unwrap_or_default(),
            kind: value_as_string(row.get("kind")).unwrap_or_default(),
            status: value_as_string(row.get("status")).unwrap_or_default(),
            span_id: value_as_string(row.get("span_id")).unwrap_or_default(),
            parent_span_id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.eq_ignore_ascii_case("error")
    }

    pub fn start_rfc3339(&self) -> String {
        self.start
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default()
    }
}

fn parse_start(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn parse_duration_ms(value: Option<&Value>, unit: DurationUnit) -> f64 {
    if let Some(n) = value_as_f64(value) {
        return unit.to_millis(n).max(0.0);
    }
    // Timespan strings such as "1.5ms" or "2s".
    value_as_string(value)
        .and_then(|s| humantime::parse_duration(s.trim()).ok())
        .map(|d| d.as_secs_f64() * 1_000.0)
        .unwrap_or(0.0)
}
