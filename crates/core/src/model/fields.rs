use std::fmt;

use serde::{Deserialize, Serialize};

/// System timestamp column present on every dataset.
pub const TIMESTAMP_FIELD: &str = "_time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Traces,
    Logs,
}

impl TelemetryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Logs => "logs",
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalField {
    Service,
    TraceId,
    SpanId,
    ParentSpanId,
    SpanName,
    SpanKind,
    Status,
    Duration,
    Severity,
    Body,
}

impl LogicalField {
    pub const ALL: [LogicalField; 10] = [
        Self::Service,
        Self::TraceId,
        Self::SpanId,
        Self::ParentSpanId,
        Self::SpanName,
        Self::SpanKind,
        Self::Status,
        Self::Duration,
        Self::Severity,
        Self::Body,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::TraceId => "trace_id",
            Self::SpanId => "span_id",
            Self::ParentSpanId => "parent_span_id",
            Self::SpanName => "span_name",
            Self::SpanKind => "span_kind",
            Self::Status => "status",
            Self::Duration => "duration",
            Self::Severity => "severity",
            Self::Body => "body",
        }
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical column names for the logical concepts of one telemetry kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    pub service: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub span_name: Option<String>,
    pub span_kind: Option<String>,
    pub status: Option<String>,
    pub duration: Option<String>,
    pub severity: Option<String>,
    pub body: Option<String>,
    pub timestamp: String,
}

impl FieldMap {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            span_name: None,
            span_kind: None,
            status: None,
            duration: None,
            severity: None,
            body: None,
            timestamp: TIMESTAMP_FIELD.to_string(),
        }
    }

    pub fn get(&self, field: LogicalField) -> Option<&str> {
        match field {
            LogicalField::Service => Some(self.service.as_str()),
            LogicalField::TraceId => self.trace_id.as_deref(),
            LogicalField::SpanId => self.span_id.as_deref(),
            LogicalField::ParentSpanId => self.parent_span_id.as_deref(),
            LogicalField::SpanName => self.span_name.as_deref(),
            LogicalField::SpanKind => self.span_kind.as_deref(),
            LogicalField::Status => self.status.as_deref(),
            LogicalField::Duration => self.duration.as_deref(),
            LogicalField::Severity => self.severity.as_deref(),
            LogicalField::Body => self.body.as_deref(),
        }
    }

    pub fn set(&mut self, field: LogicalField, physical: String) {
        match field {
            LogicalField::Service => self.service = physical,
            LogicalField::TraceId => self.trace_id = Some(physical),
            LogicalField::SpanId => self.span_id = Some(physical),
            LogicalField::ParentSpanId => self.parent_span_id = Some(physical),
            LogicalField::SpanName => self.span_name = Some(physical),
            LogicalField::SpanKind => self.span_kind = Some(physical),
            LogicalField::Status => self.status = Some(physical),
            LogicalField::Duration => self.duration = Some(physical),
            LogicalField::Severity => self.severity = Some(physical),
            LogicalField::Body => self.body = Some(physical),
        }
    }
}
