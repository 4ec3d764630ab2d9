use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use scry_core::detect::SchemaMap;
use scry_core::model::{Row, SpanRow};
use scry_core::{Result, ScryError};
use scry_query::backend::{Backend, DatasetInfo, MonitorInfo, QueryWindow};
use serde_json::{Value, json};

pub fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Columns of an OpenTelemetry span dataset as most exporters write it.
pub fn otel_trace_fields() -> Vec<String> {
    fields(&[
        "_time",
        "service.name",
        "trace_id",
        "span_id",
        "parent_span_id",
        "name",
        "kind",
        "status.code",
        "duration",
    ])
}

pub fn otel_log_fields() -> Vec<String> {
    fields(&["_time", "service.name", "severity_text", "body", "trace_id", "span_id"])
}

/// Two equally good trace datasets plus a log dataset.
pub fn tied_schema() -> SchemaMap {
    SchemaMap::from([
        ("alpha_traces".to_string(), otel_trace_fields()),
        ("zeta_traces".to_string(), otel_trace_fields()),
        ("logs".to_string(), otel_log_fields()),
    ])
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// A checkout trace: root span with a failing cache child.
pub fn sample_spans() -> Vec<SpanRow> {
    let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    vec![
        SpanRow {
            start: Some(base),
            duration_ms: 1800.0,
            service: "api".to_string(),
            operation: "GET /v1/orders".to_string(),
            kind: "server".to_string(),
            status: "ERROR".to_string(),
            span_id: "root".to_string(),
            parent_span_id: None,
        },
        SpanRow {
            start: Some(base + ChronoDuration::milliseconds(900)),
            duration_ms: 700.0,
            service: "api".to_string(),
            operation: "cache.get redis".to_string(),
            kind: "client".to_string(),
            status: "ERROR".to_string(),
            span_id: "child".to_string(),
            parent_span_id: Some("root".to_string()),
        },
    ]
}

/// Projected span rows as the trace query returns them.
pub fn sample_span_rows() -> Vec<Row> {
    sample_spans()
        .into_iter()
        .map(|s| {
            row(json!({
                "_time": s.start_rfc3339(),
                "service": s.service,
                "operation": s.operation,
                "kind": s.kind,
                "status": s.status,
                "duration": s.duration_ms,
                "span_id": s.span_id,
                "parent_span_id": s.parent_span_id.unwrap_or_default(),
            }))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuery {
    pub region: String,
    pub datasets: Vec<String>,
    pub query: String,
}

/// In-memory backend. Rows are served per region; a region can be made to
/// fail or to answer late.
#[derive(Default)]
pub struct FakeBackend {
    datasets: Vec<DatasetInfo>,
    schema: SchemaMap,
    monitors: Vec<MonitorInfo>,
    rows: BTreeMap<String, Vec<Row>>,
    delays: BTreeMap<String, Duration>,
    failing_region: Option<String>,
    failing_dataset: Option<String>,
    queries: Mutex<Vec<RecordedQuery>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, name: &str, region: &str, fields: Vec<String>) -> Self {
        self.datasets.push(DatasetInfo::new(name, region));
        self.schema.insert(name.to_string(), fields);
        self
    }

    pub fn with_monitor(mut self, id: &str, name: &str) -> Self {
        self.monitors.push(MonitorInfo {
            id: id.to_string(),
            name: name.to_string(),
            kind: "Threshold".to_string(),
            ..MonitorInfo::default()
        });
        self
    }

    pub fn with_rows(mut self, region: &str, rows: Vec<Row>) -> Self {
        self.rows.entry(region.to_string()).or_default().extend(rows);
        self
    }

    pub fn with_delay(mut self, region: &str, delay: Duration) -> Self {
        self.delays.insert(region.to_string(), delay);
        self
    }

    pub fn failing_region(mut self, region: &str) -> Self {
        self.failing_region = Some(region.to_string());
        self
    }

    pub fn failing_fields(mut self, dataset: &str) -> Self {
        self.failing_dataset = Some(dataset.to_string());
        self
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn list_datasets(&self) -> Result<Vec<DatasetInfo>> {
        Ok(self.datasets.clone())
    }

    async fn dataset_fields(&self, dataset: &str) -> Result<Vec<String>> {
        if self.failing_dataset.as_deref() == Some(dataset) {
            return Err(ScryError::from_status(
                "GET",
                &format!("/v2/datasets/{dataset}/fields"),
                500,
                r#"{"message":"boom"}"#,
            ));
        }
        self.schema
            .get(dataset)
            .cloned()
            .ok_or_else(|| ScryError::NotFound(format!("dataset {dataset}")))
    }

    async fn list_monitors(&self) -> Result<Vec<MonitorInfo>> {
        Ok(self.monitors.clone())
    }

    async fn run_query(
        &self,
        region: &str,
        datasets: &[String],
        query: &str,
        _window: &QueryWindow,
    ) -> Result<Vec<Row>> {
        if let Ok(mut log) = self.queries.lock() {
            log.push(RecordedQuery {
                region: region.to_string(),
                datasets: datasets.to_vec(),
                query: query.to_string(),
            });
        }
        if let Some(delay) = self.delays.get(region) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_region.as_deref() == Some(region) {
            return Err(ScryError::from_status(
                "POST",
                "/v1/datasets/_apl",
                503,
                r#"{"message":"region unavailable"}"#,
            ));
        }
        Ok(self.rows.get(region).cloned().unwrap_or_default())
    }
}
