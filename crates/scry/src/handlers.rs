use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use scry_core::ScryError;
use scry_core::config::DEFAULT_HISTORY_DATASET;
use scry_core::detect::{DetectionReport, KindDetection, detect, detect_with_pin};
use scry_core::ids::TraceId;
use scry_core::model::span::DurationUnit;
use scry_core::model::{LogicalField, Row, SpanRow, TelemetryKind};
use scry_core::time::{
    BROWSE_WINDOW, HISTORY_WINDOW, SAMPLE_WINDOW, TimeFlags, TimeRange, resolve,
};
use scry_core::tree::{TraceLayout, TraceView, reconstruct};
use scry_query::commands::{self, LogFilter, Target, TraceFilter};
use scry_query::{Backend, Inventory, QueryWindow, discover, execute};
use serde_json::{Map, Value, json};

use crate::diagnostics::Diagnostics;
use crate::output::{CommandKind, Report, Section};

const SERVICES_LIMIT: usize = 50;
const OPERATIONS_LIMIT: usize = 50;
const TRACES_LIMIT: usize = 20;
const TRACE_SPANS_LIMIT: usize = 10_000;
const LOGS_LIMIT: usize = 100;
const SAMPLE_LIMIT: usize = 10;
const MONITOR_HISTORY_LIMIT: usize = 100;

const DATASET_COLUMNS: [&str; 3] = ["name", "region", "fields"];
const MONITOR_COLUMNS: [&str; 7] = [
    "id",
    "name",
    "type",
    "disabled",
    "interval_minutes",
    "range_minutes",
    "query",
];
const DETECT_COLUMNS: [&str; 6] = ["kind", "dataset", "score", "pinned", "ties", "fields"];
const TRACE_COLUMNS: [&str; 10] = [
    "tree",
    "depth",
    "service",
    "operation",
    "kind",
    "status",
    "duration_ms",
    "start",
    "span_id",
    "parent_span_id",
];

/// Flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct SessionFlags {
    pub dataset: Option<String>,
    pub logs_dataset: Option<String>,
    /// Dataset holding monitor runs; `axiom-history` when unset.
    pub history_dataset: Option<String>,
    pub limit: Option<usize>,
    pub time: TimeFlags,
    pub explain: bool,
}

pub struct Session<'a> {
    pub backend: &'a dyn Backend,
    pub diag: Diagnostics,
    pub flags: SessionFlags,
    pub now: DateTime<Utc>,
}

struct Window {
    range: TimeRange,
    query: QueryWindow,
}

impl Window {
    fn annotate(&self, report: Report) -> Report {
        report
            .with_meta("start", json!(rfc3339(self.query.start)))
            .with_meta("end", json!(rfc3339(self.query.end)))
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Session<'_> {
    fn limit(&self, default: usize) -> usize {
        self.flags.limit.unwrap_or(default)
    }

    fn window(&self, defaults: (&str, &str)) -> anyhow::Result<Window> {
        let range = resolve(&self.flags.time, self.now, defaults.0, defaults.1)?;
        let query = QueryWindow::from_range(&range, self.now)?;
        if self.flags.explain {
            self.diag.explain(&format!(
                "window {} .. {} ({} .. {})",
                range.start,
                range.end,
                query.start_rfc3339(),
                query.end_rfc3339()
            ));
        }
        Ok(Window { range, query })
    }

    async fn detect(&self) -> anyhow::Result<(Inventory, DetectionReport)> {
        let inventory = discover(self.backend)
            .await
            .context("schema discovery failed")?;
        let mut report = detect(&inventory.schema, self.flags.dataset.as_deref())?;
        if let Some(logs) = self.flags.logs_dataset.as_deref() {
            report.logs = detect_with_pin(&inventory.schema, TelemetryKind::Logs, logs)?;
        }
        if self.flags.explain {
            for kind in [&report.traces, &report.logs] {
                self.diag.explain(&explain_scores(kind));
            }
        }
        Ok((inventory, report))
    }

    /// Detection for one kind, reduced to the dataset the command will read.
    async fn target(&self, kind: TelemetryKind) -> anyhow::Result<Target> {
        let (inventory, report) = self.detect().await?;
        let detection = report.kind(kind);
        if let Some(warning) = detection.tie_warning() {
            self.diag.warn(&warning);
        }
        let target = Target::new(detection.require()?, &inventory)?;
        tracing::debug!(
            kind = %kind,
            dataset = %target.dataset,
            regions = target.placement.len(),
            "target resolved"
        );
        Ok(target)
    }

    pub async fn datasets(&self) -> anyhow::Result<Report> {
        let inventory = discover(self.backend).await?;
        let mut listed = inventory.datasets.clone();
        listed.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.region.cmp(&b.region)));
        let rows = listed
            .iter()
            .map(|d| {
                object(json!({
                    "name": d.name,
                    "region": d.region,
                    "fields": inventory.field_count(&d.name),
                }))
            })
            .collect();
        let count = inventory.names().len();
        Ok(Report::new("datasets", CommandKind::List, rows)
            .with_columns(&DATASET_COLUMNS)
            .with_summary(format!("{count} datasets")))
    }

    pub async fn detect_report(&self) -> anyhow::Result<Report> {
        let (_, report) = self.detect().await?;
        for warning in report.warnings() {
            self.diag.warn(&warning);
        }
        let rows = [&report.traces, &report.logs]
            .into_iter()
            .map(detection_row)
            .collect();
        Ok(Report::new("detect", CommandKind::Get, rows).with_columns(&DETECT_COLUMNS))
    }

    pub async fn services(&self) -> anyhow::Result<Report> {
        let target = self.target(TelemetryKind::Traces).await?;
        let window = self.window(BROWSE_WINDOW)?;
        let prepared = commands::services(&target, &window.query, self.limit(SERVICES_LIMIT));
        let rows = execute(self.backend, &prepared, &window.query).await?;
        let report = Report::new("services", CommandKind::List, rows)
            .with_meta("dataset", json!(target.dataset));
        Ok(window.annotate(report))
    }

    pub async fn operations(&self, service: &str) -> anyhow::Result<Report> {
        let target = self.target(TelemetryKind::Traces).await?;
        let window = self.window(BROWSE_WINDOW)?;
        let prepared = commands::operations(
            &target,
            &window.query,
            service,
            self.limit(OPERATIONS_LIMIT),
        )?;
        let rows = execute(self.backend, &prepared, &window.query).await?;
        let report = Report::new("operations", CommandKind::List, rows)
            .with_meta("dataset", json!(target.dataset))
            .with_meta("service", json!(service));
        Ok(window.annotate(report))
    }

    pub async fn traces(&self, filter: TraceFilter) -> anyhow::Result<Report> {
        let target = self.target(TelemetryKind::Traces).await?;
        let window = self.window(BROWSE_WINDOW)?;
        let prepared = commands::traces(&target, &window.query, &filter, self.limit(TRACES_LIMIT))?;
        let rows = execute(self.backend, &prepared, &window.query).await?;
        let report = Report::new("traces", CommandKind::List, rows)
            .with_meta("dataset", json!(target.dataset));
        Ok(window.annotate(report))
    }

    pub async fn trace(&self, raw_id: &str) -> anyhow::Result<Report> {
        let trace_id = TraceId::parse(raw_id)?;
        let target = self.target(TelemetryKind::Traces).await?;
        let window = self.window(HISTORY_WINDOW)?;
        let prepared = commands::trace_spans(
            &target,
            &window.query,
            &trace_id,
            self.limit(TRACE_SPANS_LIMIT),
        )?;
        let rows = execute(self.backend, &prepared, &window.query).await?;
        if rows.is_empty() {
            return Err(ScryError::NotFound(format!(
                "trace {} in {} between {} and {}",
                trace_id.as_str(),
                target.dataset,
                window.range.start,
                window.range.end
            ))
            .into());
        }

        // The query already converted durations to milliseconds.
        let spans: Vec<SpanRow> = rows
            .iter()
            .map(|row| SpanRow::from_row(row, DurationUnit::Millis))
            .collect();
        let view = reconstruct(spans);
        if matches!(view.layout, TraceLayout::Fallback(_)) && view.spans.len() > 1 {
            self.diag
                .hint("no span references a parent in this trace; showing spans in start order");
        }
        if target.fields.get(LogicalField::ParentSpanId).is_none() {
            self.diag.hint(&format!(
                "{} has no parent span column; run `scry detect --explain` to check the mapping",
                target.dataset
            ));
        }

        Ok(window.annotate(trace_report(&trace_id, &target.dataset, &view)))
    }

    pub async fn logs(&self, filter: LogFilter) -> anyhow::Result<Report> {
        let target = self.target(TelemetryKind::Logs).await?;
        let window = self.window(BROWSE_WINDOW)?;
        let prepared = commands::logs(&target, &window.query, &filter, self.limit(LOGS_LIMIT))?;
        let rows = execute(self.backend, &prepared, &window.query).await?;
        let report = Report::new("logs", CommandKind::List, rows)
            .with_meta("dataset", json!(target.dataset));
        Ok(window.annotate(report))
    }

    pub async fn sample(&self, datasets: &[String]) -> anyhow::Result<Report> {
        let inventory = discover(self.backend).await?;
        let placement = inventory.placement(datasets)?;
        let window = self.window(SAMPLE_WINDOW)?;
        let prepared = commands::sample(placement, &window.query, self.limit(SAMPLE_LIMIT));
        let rows = execute(self.backend, &prepared, &window.query).await?;
        let report = Report::new("sample", CommandKind::List, rows)
            .with_meta("dataset", json!(datasets.join(",")));
        Ok(window.annotate(report))
    }

    pub async fn monitors(&self) -> anyhow::Result<Report> {
        let mut monitors = self.backend.list_monitors().await?;
        monitors.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        let rows: Vec<Row> = monitors
            .iter()
            .map(|m| {
                object(json!({
                    "id": m.id,
                    "name": m.name,
                    "type": m.kind,
                    "disabled": m.disabled,
                    "interval_minutes": m.interval_minutes,
                    "range_minutes": m.range_minutes,
                    "query": m.query,
                }))
            })
            .collect();
        let count = rows.len();
        Ok(Report::new("monitors", CommandKind::List, rows)
            .with_columns(&MONITOR_COLUMNS)
            .with_summary(format!("{count} monitors")))
    }

    /// Recorded runs of one monitor, looked up by id or exact name.
    pub async fn monitor_history(&self, key: &str) -> anyhow::Result<Report> {
        let monitors = self.backend.list_monitors().await?;
        let monitor = monitors
            .iter()
            .find(|m| m.matches(key))
            .ok_or_else(|| ScryError::NotFound(format!("monitor {key}")))?;

        let dataset = self
            .flags
            .history_dataset
            .as_deref()
            .unwrap_or(DEFAULT_HISTORY_DATASET);
        let inventory = discover(self.backend)
            .await
            .context("schema discovery failed")?;
        let placement = inventory.placement(&[dataset.to_string()])?;
        let fields = inventory.schema.get(dataset).cloned().unwrap_or_default();

        let window = self.window(HISTORY_WINDOW)?;
        let prepared = commands::monitor_history(
            dataset,
            placement,
            &fields,
            &window.query,
            &monitor.id,
            self.limit(MONITOR_HISTORY_LIMIT),
        )?;
        let rows = execute(self.backend, &prepared, &window.query).await?;
        let report = Report::new("monitor-history", CommandKind::List, rows)
            .with_meta("monitor_id", json!(monitor.id))
            .with_meta("monitor", json!(monitor.name))
            .with_meta("dataset", json!(dataset));
        Ok(window.annotate(report))
    }

    pub async fn query(&self, apl: &str) -> anyhow::Result<Report> {
        if apl.trim().is_empty() {
            return Err(ScryError::InvalidArgument("query text is empty".to_string()).into());
        }
        let window = self.window(BROWSE_WINDOW)?;
        let prepared = commands::free_form(apl);
        let rows = execute(self.backend, &prepared, &window.query).await?;
        Ok(window.annotate(Report::new("query", CommandKind::Query, rows)))
    }
}

fn object(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

fn explain_scores(kind: &KindDetection) -> String {
    if kind.pinned {
        let dataset = kind.winner.as_ref().map(|w| w.dataset.as_str()).unwrap_or("-");
        return format!("{}: pinned to {dataset}", kind.kind);
    }
    if kind.scores.is_empty() {
        return format!("{}: no candidate datasets", kind.kind);
    }
    let scores: Vec<String> = kind
        .scores
        .iter()
        .map(|(name, score)| format!("{name}={score}"))
        .collect();
    format!("{} candidates: {}", kind.kind, scores.join(", "))
}

fn detection_row(kind: &KindDetection) -> Row {
    let mut row = Row::new();
    row.insert("kind".into(), json!(kind.kind.as_str()));
    match &kind.winner {
        Some(winner) => {
            let fields: Map<String, Value> = LogicalField::ALL
                .iter()
                .filter_map(|f| winner.fields.get(*f).map(|p| (f.to_string(), json!(p))))
                .collect();
            row.insert("dataset".into(), json!(winner.dataset));
            row.insert("score".into(), json!(winner.score));
            row.insert("pinned".into(), json!(kind.pinned));
            row.insert("ties".into(), json!(kind.ties));
            row.insert("fields".into(), Value::Object(fields));
        }
        None => {
            row.insert("dataset".into(), Value::Null);
            row.insert("score".into(), json!(0));
            row.insert("pinned".into(), json!(kind.pinned));
            row.insert("ties".into(), json!([]));
            row.insert("fields".into(), json!({}));
        }
    }
    row
}

fn span_row(view: &TraceView, index: usize) -> Row {
    let span = &view.spans[index];
    object(json!({
        "service": span.service,
        "operation": span.operation,
        "duration_ms": round_ms(span.duration_ms),
        "start": span.start_rfc3339(),
        "span_id": span.span_id,
    }))
}

fn round_ms(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub fn trace_report(trace_id: &TraceId, dataset: &str, view: &TraceView) -> Report {
    let rows: Vec<Row> = view
        .lines()
        .into_iter()
        .map(|line| {
            let span = &view.spans[line.index];
            object(json!({
                "tree": view.render_line(line),
                "depth": line.depth,
                "service": span.service,
                "operation": span.operation,
                "kind": span.kind,
                "status": span.status,
                "duration_ms": round_ms(span.duration_ms),
                "start": span.start_rfc3339(),
                "span_id": span.span_id,
                "parent_span_id": span.parent_span_id,
            }))
        })
        .collect();

    let meta = &view.meta;
    let top_spans = Section {
        title: "top spans".to_string(),
        key: "top_spans".to_string(),
        columns: ["service", "operation", "duration_ms", "start", "span_id"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        rows: view.top_spans.iter().map(|&i| span_row(view, i)).collect(),
    };

    Report::new("trace", CommandKind::Get, rows)
        .with_columns(&TRACE_COLUMNS)
        .with_summary(format!(
            "trace {} | {} spans | {}/{} errored | services: {} | mode: {}",
            trace_id.as_str(),
            meta.span_count,
            meta.errored,
            meta.total,
            meta.services.join(", "),
            meta.tree_mode.as_str()
        ))
        .with_meta("trace_id", json!(trace_id.as_str()))
        .with_meta("dataset", json!(dataset))
        .with_meta("tree_mode", json!(meta.tree_mode.as_str()))
        .with_meta("span_count", json!(meta.span_count))
        .with_meta("services", json!(meta.services))
        .with_meta("errored", json!(meta.errored))
        .with_meta("total", json!(meta.total))
        .with_meta("first_start", json!(meta.first_start.map(rfc3339)))
        .with_meta("last_start", json!(meta.last_start.map(rfc3339)))
        .with_section(top_spans)
}

#[cfg(test)]
mod tests {
    use testkit::sample_spans;

    use super::*;

    #[test]
    fn trace_report_lists_tree_lines_and_top_spans() {
        let view = reconstruct(sample_spans());
        let id = TraceId::parse("abc123").unwrap();
        let report = trace_report(&id, "otel-traces", &view);

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.columns.as_deref().map(|c| c.len()), Some(TRACE_COLUMNS.len()));
        assert_eq!(report.rows[0]["tree"], json!("ERR api GET /v1/orders (1800.0ms)"));
        assert_eq!(report.rows[1]["depth"], json!(1));
        assert_eq!(report.meta["tree_mode"], json!("tree"));
        assert_eq!(report.meta["errored"], json!(2));
        assert_eq!(report.sections[0].rows[0]["span_id"], json!("root"));
        assert!(report.summary.as_deref().unwrap().contains("2/2 errored"));
    }

    #[test]
    fn detection_rows_show_only_mapped_fields() {
        let schema = testkit::tied_schema();
        let report = detect(&schema, None).unwrap();
        let row = detection_row(&report.traces);
        assert_eq!(row["dataset"], json!("alpha_traces"));
        assert_eq!(row["ties"], json!(["alpha_traces", "zeta_traces"]));
        assert_eq!(row["fields"]["service"], json!("service.name"));
        assert!(row["fields"].get("severity").is_none());
    }

    #[test]
    fn explain_lists_scores_best_first() {
        let report = detect(&testkit::tied_schema(), None).unwrap();
        let line = explain_scores(&report.traces);
        assert!(line.starts_with("traces candidates: alpha_traces="));
    }
}
