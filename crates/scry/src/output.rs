use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use comfy_table::presets::UTF8_HORIZONTAL_ONLY;
use comfy_table::{ContentArrangement, Table};
use scry_core::model::Row;
use scry_core::model::row::is_scalar;
use scry_core::shape::{ShapeResult, shape};
use serde_json::{Map, Value};

/// Cells in table output never shrink below this many characters.
const MIN_CELL_WIDTH: usize = 12;
const DEFAULT_TERMINAL_WIDTH: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Auto,
    Table,
    Csv,
    Json,
    Ndjson,
    Mcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
    Ndjson,
    Mcp,
}

/// How a command's result is shaped, which decides the `auto` format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    List,
    Get,
    Query,
}

pub fn select_format(
    requested: Format,
    kind: CommandKind,
    rows: &[Row],
    interactive: bool,
) -> OutputFormat {
    match requested {
        Format::Table => OutputFormat::Table,
        Format::Csv => OutputFormat::Csv,
        Format::Json => OutputFormat::Json,
        Format::Ndjson => OutputFormat::Ndjson,
        Format::Mcp => OutputFormat::Mcp,
        Format::Auto if interactive => OutputFormat::Table,
        Format::Auto => match kind {
            CommandKind::List => OutputFormat::Ndjson,
            CommandKind::Get => OutputFormat::Json,
            CommandKind::Query => {
                if rows.iter().all(|r| r.values().all(is_scalar)) {
                    OutputFormat::Csv
                } else {
                    OutputFormat::Ndjson
                }
            }
        },
    }
}

/// Secondary result shown next to the main rows, such as a trace's longest
/// spans. Gets whatever cell budget the main rows leave over.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub key: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub command: &'static str,
    pub kind: CommandKind,
    pub rows: Vec<Row>,
    /// Column order used when the user gives none; inferred when empty.
    pub columns: Option<Vec<String>>,
    /// Extra keys merged into the JSON envelope's `meta`.
    pub meta: Map<String, Value>,
    pub summary: Option<String>,
    pub sections: Vec<Section>,
}

impl Report {
    pub fn new(command: &'static str, kind: CommandKind, rows: Vec<Row>) -> Self {
        Self {
            command,
            kind,
            rows,
            columns: None,
            meta: Map::new(),
            summary: None,
            sections: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }

    pub fn with_summary(mut self, summary: String) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub columns: Option<Vec<String>>,
    pub max_cells: usize,
    pub generated_at: DateTime<Utc>,
    pub width: usize,
}

impl RenderOptions {
    /// Width of the attached terminal as comfy-table sees it, then `COLUMNS`.
    pub fn terminal_width() -> usize {
        pick_width(Table::new().width(), std::env::var("COLUMNS").ok())
    }
}

fn pick_width(detected: Option<u16>, columns_env: Option<String>) -> usize {
    detected
        .map(usize::from)
        .filter(|w| *w > 0)
        .or_else(|| {
            columns_env
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|w| *w > 0)
        })
        .unwrap_or(DEFAULT_TERMINAL_WIDTH)
}

/// Fully rendered stdout plus the hints to print on stderr afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub stdout: String,
    pub hints: Vec<String>,
}

/// A section after the cell budget was applied to it.
struct ShapedSection<'a> {
    section: &'a Section,
    shaped: ShapeResult,
}

/// Shapes sections in order against the cells the main rows left unused. A
/// section that gets no cells keeps its columns but shows no rows.
fn shape_sections(sections: &[Section], mut remaining: usize) -> Vec<ShapedSection<'_>> {
    sections
        .iter()
        .map(|section| {
            let shaped = if remaining == 0 {
                ShapeResult {
                    rows: Vec::new(),
                    columns: section.columns.clone(),
                    truncated: !section.rows.is_empty(),
                    rows_shown: 0,
                    rows_total: section.rows.len(),
                    columns_shown: section.columns.len(),
                    columns_total: section.columns.len(),
                }
            } else {
                shape(section.rows.clone(), Some(section.columns.clone()), remaining)
            };
            remaining = remaining.saturating_sub(shaped.rows_shown * shaped.columns_shown);
            ShapedSection { section, shaped }
        })
        .collect()
}

pub fn render(report: Report, format: OutputFormat, opts: &RenderOptions) -> anyhow::Result<Rendered> {
    let columns = opts.columns.clone().or(report.columns.clone());
    let shaped = shape(report.rows.clone(), columns, opts.max_cells);
    let used = shaped.rows_shown * shaped.columns_shown;
    let sections = shape_sections(&report.sections, opts.max_cells.saturating_sub(used));

    let mut hints = Vec::new();
    if shaped.truncated && format != OutputFormat::Json {
        hints.push(format!(
            "showing {} of {} rows and {} of {} columns; raise --max-cells or pick fewer --columns",
            shaped.rows_shown, shaped.rows_total, shaped.columns_shown, shaped.columns_total
        ));
    }
    for s in &sections {
        match format {
            OutputFormat::Json => {}
            OutputFormat::Csv | OutputFormat::Ndjson => {
                if !s.section.rows.is_empty() {
                    hints.push(format!(
                        "{} not included in this format; use --format json, mcp or table to see them",
                        s.section.title
                    ));
                }
            }
            OutputFormat::Table | OutputFormat::Mcp => {
                if s.shaped.truncated {
                    hints.push(format!(
                        "{}: showing {} of {} rows; raise --max-cells to see more",
                        s.section.title, s.shaped.rows_shown, s.shaped.rows_total
                    ));
                }
            }
        }
    }

    let stdout = match format {
        OutputFormat::Table => render_table(&report, &shaped, &sections, opts.width, &mut hints),
        OutputFormat::Csv => render_csv(&shaped.columns, &shaped.rows),
        OutputFormat::Json => render_json(&report, &shaped, &sections, opts.generated_at)?,
        OutputFormat::Ndjson => render_ndjson(&shaped.rows)?,
        OutputFormat::Mcp => render_mcp(&report, &shaped, &sections),
    };
    Ok(Rendered { stdout, hints })
}

fn render_json(
    report: &Report,
    shaped: &ShapeResult,
    sections: &[ShapedSection<'_>],
    generated_at: DateTime<Utc>,
) -> anyhow::Result<String> {
    let truncated = shaped.truncated || sections.iter().any(|s| s.shaped.truncated);
    let mut meta = Map::new();
    meta.insert("command".into(), Value::from(report.command));
    meta.insert(
        "generated_at".into(),
        Value::from(generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    meta.insert("truncated".into(), Value::from(truncated));
    meta.insert("rows_shown".into(), Value::from(shaped.rows_shown));
    meta.insert("rows_total".into(), Value::from(shaped.rows_total));
    meta.insert("columns_shown".into(), Value::from(shaped.columns_shown));
    meta.insert("columns_total".into(), Value::from(shaped.columns_total));
    for (k, v) in &report.meta {
        meta.entry(k.clone()).or_insert_with(|| v.clone());
    }
    for s in sections {
        meta.insert(
            s.section.key.clone(),
            Value::Array(s.shaped.rows.iter().cloned().map(Value::Object).collect()),
        );
        meta.insert(
            format!("{}_total", s.section.key),
            Value::from(s.shaped.rows_total),
        );
    }

    let data = Value::Array(shaped.rows.iter().cloned().map(Value::Object).collect());
    let mut envelope = Map::new();
    envelope.insert("meta".into(), Value::Object(meta));
    envelope.insert("data".into(), data);

    let mut out = serde_json::to_string_pretty(&Value::Object(envelope))?;
    out.push('\n');
    Ok(out)
}

fn render_ndjson(rows: &[Row]) -> anyhow::Result<String> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}

fn render_csv(columns: &[String], rows: &[Row]) -> String {
    let mut out = String::new();
    let header: Vec<String> = columns.iter().map(|c| csv_field(c)).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in rows {
        let line: Vec<String> = columns
            .iter()
            .map(|c| csv_field(&cell_text(row.get(c))))
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Plain text for one cell: strings unquoted, null empty, compound values as
/// compact JSON.
fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn elide(text: &str, max: usize) -> Option<String> {
    let flat = text.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max {
        return if flat == text { None } else { Some(flat) };
    }
    let kept: String = flat.chars().take(max.saturating_sub(1)).collect();
    Some(format!("{kept}…"))
}

fn build_table(columns: &[String], rows: &[Row], width: usize) -> (Table, bool) {
    let cell_width = if columns.is_empty() {
        width
    } else {
        (width / columns.len()).max(MIN_CELL_WIDTH)
    };

    let mut elided = false;
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(columns.iter().map(String::as_str));
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| {
                let text = cell_text(row.get(c));
                match elide(&text, cell_width) {
                    Some(short) => {
                        elided |= short.ends_with('…');
                        short
                    }
                    None => text,
                }
            })
            .collect();
        table.add_row(cells);
    }
    (table, elided)
}

fn render_table(
    report: &Report,
    shaped: &ShapeResult,
    sections: &[ShapedSection<'_>],
    width: usize,
    hints: &mut Vec<String>,
) -> String {
    let mut out = String::new();
    if let Some(summary) = &report.summary {
        let _ = writeln!(out, "{summary}");
    }

    if shaped.rows.is_empty() {
        let _ = writeln!(out, "(no rows)");
    } else {
        let (table, elided) = build_table(&shaped.columns, &shaped.rows, width);
        let _ = writeln!(out, "{table}");
        if elided {
            hints.push(
                "long values were shortened to fit the terminal; use --format json or csv for full values"
                    .to_string(),
            );
        }
    }

    for s in sections {
        if s.shaped.rows.is_empty() {
            continue;
        }
        let (table, _) = build_table(&s.shaped.columns, &s.shaped.rows, width);
        let _ = writeln!(out, "\n{}\n{table}", s.section.title);
    }
    out
}

fn render_mcp(report: &Report, shaped: &ShapeResult, sections: &[ShapedSection<'_>]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# scry {}\n", report.command);
    if let Some(summary) = &report.summary {
        let _ = writeln!(out, "{summary}\n");
    }
    for (key, value) in &report.meta {
        if is_scalar(value) {
            let _ = writeln!(out, "- {key}: {}", cell_text(Some(value)));
        }
    }
    let _ = writeln!(
        out,
        "- rows: {} of {}\n- columns: {} of {}{}\n",
        shaped.rows_shown,
        shaped.rows_total,
        shaped.columns_shown,
        shaped.columns_total,
        if shaped.truncated { "\n- truncated: true" } else { "" }
    );
    let _ = write!(out, "```csv\n{}```\n", render_csv(&shaped.columns, &shaped.rows));

    for s in sections {
        if s.shaped.rows.is_empty() && s.shaped.truncated {
            let _ = write!(
                out,
                "\n## {}\n\n- rows: 0 of {} (cell budget used up)\n",
                s.section.title, s.shaped.rows_total
            );
            continue;
        }
        let _ = write!(
            out,
            "\n## {}\n\n```csv\n{}```\n",
            s.section.title,
            render_csv(&s.shaped.columns, &s.shaped.rows)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn opts(max_cells: usize) -> RenderOptions {
        RenderOptions {
            columns: None,
            max_cells,
            generated_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            width: 80,
        }
    }

    fn services_report() -> Report {
        Report::new(
            "services",
            CommandKind::List,
            rows(vec![
                json!({"service": "api", "spans": 10, "errors": 2}),
                json!({"service": "db, primary", "spans": 4, "errors": 0}),
            ]),
        )
    }

    #[test]
    fn auto_format_follows_kind_when_piped() {
        let scalar = rows(vec![json!({"a": 1})]);
        let nested = rows(vec![json!({"a": {"b": 1}})]);
        assert_eq!(
            select_format(Format::Auto, CommandKind::List, &scalar, false),
            OutputFormat::Ndjson
        );
        assert_eq!(
            select_format(Format::Auto, CommandKind::Get, &scalar, false),
            OutputFormat::Json
        );
        assert_eq!(
            select_format(Format::Auto, CommandKind::Query, &scalar, false),
            OutputFormat::Csv
        );
        assert_eq!(
            select_format(Format::Auto, CommandKind::Query, &nested, false),
            OutputFormat::Ndjson
        );
        assert_eq!(
            select_format(Format::Auto, CommandKind::Get, &scalar, true),
            OutputFormat::Table
        );
        assert_eq!(
            select_format(Format::Csv, CommandKind::Get, &nested, true),
            OutputFormat::Csv
        );
    }

    #[test]
    fn json_envelope_carries_shape_and_extra_meta() {
        let report = services_report().with_meta("dataset", json!("otel"));
        let out = render(report, OutputFormat::Json, &opts(100)).unwrap();
        let parsed: Value = serde_json::from_str(&out.stdout).unwrap();
        assert_eq!(parsed["meta"]["command"], "services");
        assert_eq!(parsed["meta"]["generated_at"], "2026-03-01T12:00:00Z");
        assert_eq!(parsed["meta"]["truncated"], false);
        assert_eq!(parsed["meta"]["rows_total"], 2);
        assert_eq!(parsed["meta"]["dataset"], "otel");
        assert_eq!(parsed["data"].as_array().unwrap().len(), 2);
        assert!(out.hints.is_empty());
    }

    #[test]
    fn empty_json_data_is_still_an_array() {
        let report = Report::new("logs", CommandKind::List, Vec::new());
        let out = render(report, OutputFormat::Json, &opts(100)).unwrap();
        let parsed: Value = serde_json::from_str(&out.stdout).unwrap();
        assert_eq!(parsed["data"], json!([]));
        assert_eq!(parsed["meta"]["columns_total"], 0);
    }

    #[test]
    fn truncation_is_flagged_in_json_and_hinted_elsewhere() {
        let json_out = render(services_report(), OutputFormat::Json, &opts(3)).unwrap();
        let parsed: Value = serde_json::from_str(&json_out.stdout).unwrap();
        assert_eq!(parsed["meta"]["truncated"], true);
        assert_eq!(parsed["meta"]["rows_shown"], 1);
        assert!(json_out.hints.is_empty());

        let csv_out = render(services_report(), OutputFormat::Csv, &opts(3)).unwrap();
        assert_eq!(csv_out.stdout, "service,spans,errors\napi,10,2\n");
        assert_eq!(csv_out.hints.len(), 1);
        assert!(csv_out.hints[0].contains("--max-cells"));
    }

    #[test]
    fn csv_quotes_and_keeps_header_for_empty_results() {
        let out = render(services_report(), OutputFormat::Csv, &opts(100)).unwrap();
        assert!(out.stdout.contains("\"db, primary\",4,0\n"));

        let empty = Report::new("logs", CommandKind::List, Vec::new())
            .with_columns(&["_time", "body"]);
        let out = render(empty, OutputFormat::Csv, &opts(100)).unwrap();
        assert_eq!(out.stdout, "_time,body\n");
    }

    #[test]
    fn ndjson_is_one_compact_object_per_line() {
        let out = render(services_report(), OutputFormat::Ndjson, &opts(100)).unwrap();
        let lines: Vec<&str> = out.stdout.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"service":"api","spans":10,"errors":2}"#);
    }

    #[test]
    fn column_override_projects_nulls() {
        let mut o = opts(100);
        o.columns = Some(vec!["errors".into(), "owner".into()]);
        let out = render(services_report(), OutputFormat::Ndjson, &o).unwrap();
        assert_eq!(out.stdout.lines().next().unwrap(), r#"{"errors":2,"owner":null}"#);
    }

    #[test]
    fn mcp_has_header_and_fenced_blocks() {
        let report = services_report()
            .with_summary("2 services".into())
            .with_section(Section {
                title: "top spans".into(),
                key: "top_spans".into(),
                columns: vec!["span_id".into()],
                rows: rows(vec![json!({"span_id": "a"})]),
            });
        let out = render(report, OutputFormat::Mcp, &opts(100)).unwrap();
        assert!(out.stdout.starts_with("# scry services\n\n2 services\n"));
        assert!(out.stdout.contains("```csv\nservice,spans,errors\n"));
        assert!(out.stdout.contains("## top spans\n\n```csv\nspan_id\na\n```\n"));
    }

    fn trace_like(main_rows: usize, top_rows: usize) -> Report {
        let main = (0..main_rows)
            .map(|i| json!({"tree": format!("OK api op-{i}"), "span_id": format!("s{i}")}))
            .collect();
        let top = (0..top_rows)
            .map(|i| {
                json!({
                    "service": "api",
                    "operation": format!("op-{i}"),
                    "duration_ms": 100.0 - i as f64,
                    "start": "2026-03-01T12:00:00.000Z",
                    "span_id": format!("s{i}"),
                })
            })
            .collect();
        Report::new("trace", CommandKind::Get, rows(main)).with_section(Section {
            title: "top spans".into(),
            key: "top_spans".into(),
            columns: ["service", "operation", "duration_ms", "start", "span_id"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            rows: rows(top),
        })
    }

    #[test]
    fn sections_share_the_cell_budget() {
        let out = render(trace_like(30, 20), OutputFormat::Json, &opts(4)).unwrap();
        let parsed: Value = serde_json::from_str(&out.stdout).unwrap();
        assert_eq!(parsed["data"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["meta"]["top_spans"], json!([]));
        assert_eq!(parsed["meta"]["top_spans_total"], 20);
        assert_eq!(parsed["meta"]["truncated"], true);

        let out = render(trace_like(1, 20), OutputFormat::Json, &opts(12)).unwrap();
        let parsed: Value = serde_json::from_str(&out.stdout).unwrap();
        assert_eq!(parsed["data"].as_array().unwrap().len(), 1);
        assert_eq!(parsed["meta"]["top_spans"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["meta"]["truncated"], true);
    }

    #[test]
    fn budgeted_sections_are_hinted_in_mcp_and_table() {
        let out = render(trace_like(30, 20), OutputFormat::Mcp, &opts(4)).unwrap();
        assert!(out.stdout.contains("## top spans\n\n- rows: 0 of 20"));
        assert!(!out.stdout.contains("service,operation"));
        assert!(out.hints.iter().any(|h| h.starts_with("top spans: showing 0 of 20")));

        let out = render(trace_like(1, 20), OutputFormat::Table, &opts(12)).unwrap();
        assert!(out.stdout.contains("op-1"));
        assert!(!out.stdout.contains("op-2"));
        assert!(out.hints.iter().any(|h| h.starts_with("top spans: showing 2 of 20")));
    }

    #[test]
    fn flat_formats_say_sections_were_left_out() {
        for format in [OutputFormat::Csv, OutputFormat::Ndjson] {
            let out = render(trace_like(2, 3), format, &opts(100)).unwrap();
            assert_eq!(out.stdout.lines().count(), if format == OutputFormat::Csv { 3 } else { 2 });
            assert_eq!(out.hints.len(), 1);
            assert!(out.hints[0].starts_with("top spans not included"));
        }
        let out = render(trace_like(2, 3), OutputFormat::Json, &opts(100)).unwrap();
        assert!(out.hints.is_empty());
    }

    #[test]
    fn detected_width_wins_over_env() {
        assert_eq!(pick_width(Some(200), Some("80".into())), 200);
        assert_eq!(pick_width(None, Some(" 90 ".into())), 90);
        assert_eq!(pick_width(Some(0), Some("wide".into())), DEFAULT_TERMINAL_WIDTH);
        assert_eq!(pick_width(None, None), DEFAULT_TERMINAL_WIDTH);
    }

    #[test]
    fn table_elides_long_cells_with_a_hint() {
        let report = Report::new(
            "sample",
            CommandKind::List,
            rows(vec![json!({"body": "x".repeat(200)})]),
        );
        let out = render(report, OutputFormat::Table, &opts(100)).unwrap();
        assert!(out.stdout.contains('…'));
        assert!(!out.stdout.contains(&"x".repeat(100)));
        assert_eq!(out.hints.len(), 1);
    }
}
