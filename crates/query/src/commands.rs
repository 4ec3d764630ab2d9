//! Query builders for the high-level commands.
//!
//! Each builder binds a [`Target`]'s physical field names and the resolved
//! window into a fixed template. Optional fields fall back to literal
//! defaults so the templates never reference a column the dataset lacks.

use scry_core::{Result, ScryError};
use scry_core::detect::{Detection, require_fields};
use scry_core::ids::TraceId;
use scry_core::model::fields::TIMESTAMP_FIELD;
use scry_core::model::span::DurationUnit;
use scry_core::model::{FieldMap, LogicalField};

use crate::backend::{DEFAULT_REGION, QueryWindow};
use crate::exec::{PreparedQuery, RowOrder, SortKey};
use crate::plan::{Placement, QueryRequest};
use crate::schema::Inventory;
use crate::template::{TemplateVars, field_ref, quote_literal};

pub const SERVICES_TEMPLATE: &str = "${DATASET}
| where ${TIMESTAMP} >= ${START} and ${TIMESTAMP} <= ${END}
| summarize spans = count(), errors = countif(${IS_ERROR}) by service = tostring(${SERVICE})
| extend error_rate = round(todouble(errors) / todouble(spans), 4)
| sort by errors desc, spans desc
| take ${LIMIT}";

pub const OPERATIONS_TEMPLATE: &str = "${DATASET}
| where ${TIMESTAMP} >= ${START} and ${TIMESTAMP} <= ${END}
| where tostring(${SERVICE}) == ${SERVICE_NAME}
| summarize spans = count(), errors = countif(${IS_ERROR}), avg_ms = round(avg(${DURATION_MS}), 3), max_ms = max(${DURATION_MS}) by operation = tostring(${SPAN_NAME})
| sort by errors desc, spans desc
| take ${LIMIT}";

pub const TRACES_TEMPLATE: &str = "${DATASET}
| where ${TIMESTAMP} >= ${START} and ${TIMESTAMP} <= ${END}${SERVICE_FILTER}
| summarize start = min(${TIMESTAMP}), root_service = take_anyif(tostring(${SERVICE}), ${IS_ROOT}), spans = count(), errors = countif(${IS_ERROR}), duration_ms = max(${DURATION_MS}) by trace_id = tostring(${TRACE_ID})${ERRORS_FILTER}
| sort by errors desc, start desc
| take ${LIMIT}";

pub const TRACE_SPANS_TEMPLATE: &str = "${DATASET}
| where ${TIMESTAMP} >= ${START} and ${TIMESTAMP} <= ${END}
| where tostring(${TRACE_ID}) == ${TRACE_ID_VALUE}
| project _time = ${TIMESTAMP}, service = tostring(${SERVICE}), operation = tostring(${SPAN_NAME}), kind = tostring(${SPAN_KIND}), status = tostring(${STATUS}), duration = ${DURATION_MS}, span_id = tostring(${SPAN_ID}), parent_span_id = tostring(${PARENT_SPAN_ID})
| take ${LIMIT}";

pub const LOGS_TEMPLATE: &str = "${DATASET}
| where ${TIMESTAMP} >= ${START} and ${TIMESTAMP} <= ${END}${SERVICE_FILTER}${TRACE_FILTER}${SEARCH_FILTER}
| project _time = ${TIMESTAMP}, service = tostring(${SERVICE}), severity = tostring(${SEVERITY}), body = tostring(${BODY}), trace_id = tostring(${TRACE_ID}), span_id = tostring(${SPAN_ID})
| sort by _time desc
| take ${LIMIT}";

pub const SAMPLE_TEMPLATE: &str = "${DATASET}
| where ${TIMESTAMP} >= ${START} and ${TIMESTAMP} <= ${END}
| sort by ${TIMESTAMP} desc
| take ${LIMIT}";

pub const MONITOR_HISTORY_TEMPLATE: &str = "${DATASET}
| where ${TIMESTAMP} >= ${START} and ${TIMESTAMP} <= ${END}
| where tostring(${MONITOR_ID}) == ${MONITOR_ID_VALUE}
| sort by ${TIMESTAMP} desc
| take ${LIMIT}";

const FREE_FORM_TEMPLATE: &str = "${QUERY}";

/// Column names a history dataset may use for the monitor id, best first.
const MONITOR_ID_FIELDS: [&str; 4] = ["monitor_id", "monitorId", "monitor.id", "resource.id"];

/// Literal used for an unmapped string field.
const EMPTY_STRING: &str = "\"\"";

/// The dataset a command reads, its field mapping, and where it lives.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub dataset: String,
    pub fields: FieldMap,
    pub placement: Placement,
}

impl Target {
    pub fn new(detection: &Detection, inventory: &Inventory) -> Result<Self> {
        Ok(Self {
            dataset: detection.dataset.clone(),
            fields: detection.fields.clone(),
            placement: inventory.placement(std::slice::from_ref(&detection.dataset))?,
        })
    }

    pub fn require(&self, required: &[LogicalField]) -> Result<()> {
        require_fields(&self.dataset, &self.fields, required)
    }

    /// Unit of the mapped duration column, if any.
    pub fn duration_unit(&self) -> DurationUnit {
        self.fields
            .duration
            .as_deref()
            .map(DurationUnit::from_field_name)
            .unwrap_or(DurationUnit::Millis)
    }

    fn vars(&self, window: &QueryWindow, limit: usize) -> TemplateVars {
        let mut vars = window_vars(&self.fields.timestamp, window, limit);
        let fields = &self.fields;
        vars.set_field("SERVICE", &fields.service);
        for (token, field) in [
            ("TRACE_ID", LogicalField::TraceId),
            ("SPAN_ID", LogicalField::SpanId),
            ("PARENT_SPAN_ID", LogicalField::ParentSpanId),
            ("SPAN_NAME", LogicalField::SpanName),
            ("SPAN_KIND", LogicalField::SpanKind),
            ("STATUS", LogicalField::Status),
            ("SEVERITY", LogicalField::Severity),
            ("BODY", LogicalField::Body),
        ] {
            match fields.get(field) {
                Some(physical) => vars.set_field(token, physical),
                None => vars.set(token, EMPTY_STRING),
            };
        }

        vars.set("DURATION_MS", duration_ms_expr(fields.duration.as_deref()));
        vars.set(
            "IS_ERROR",
            match fields.status.as_deref() {
                Some(status) => format!("tolower(tostring({})) == \"error\"", field_ref(status)),
                None => "false".to_string(),
            },
        );
        vars.set(
            "IS_ROOT",
            match fields.parent_span_id.as_deref() {
                Some(parent) => format!("isempty(tostring({}))", field_ref(parent)),
                None => "true".to_string(),
            },
        );
        vars
    }

    fn service_filter(&self, service: Option<&str>) -> String {
        match service {
            Some(name) => format!(
                "\n| where tostring({}) == {}",
                field_ref(&self.fields.service),
                quote_literal(name)
            ),
            None => String::new(),
        }
    }

    fn request(&self, vars: TemplateVars) -> QueryRequest {
        QueryRequest::new(self.placement.clone(), vars)
    }
}

fn window_vars(timestamp: &str, window: &QueryWindow, limit: usize) -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.set_field("TIMESTAMP", timestamp)
        .set("START", format!("datetime({})", window.start_rfc3339()))
        .set("END", format!("datetime({})", window.end_rfc3339()))
        .set("LIMIT", limit.to_string());
    vars
}

/// Expression converting the duration column to milliseconds.
fn duration_ms_expr(duration: Option<&str>) -> String {
    let Some(field) = duration else {
        return "0.0".to_string();
    };
    let value = format!("todouble({})", field_ref(field));
    match DurationUnit::from_field_name(field) {
        DurationUnit::Nanos => format!("{value} / 1000000"),
        DurationUnit::Micros => format!("{value} / 1000"),
        DurationUnit::Millis => value,
        DurationUnit::Seconds => format!("{value} * 1000"),
    }
}

pub fn services(target: &Target, window: &QueryWindow, limit: usize) -> PreparedQuery {
    PreparedQuery {
        name: "services",
        template: SERVICES_TEMPLATE.to_string(),
        request: target.request(target.vars(window, limit)),
        order: RowOrder::by(vec![
            SortKey::desc("errors"),
            SortKey::desc("spans"),
            SortKey::asc("service"),
        ]),
        limit: Some(limit),
    }
}

pub fn operations(
    target: &Target,
    window: &QueryWindow,
    service: &str,
    limit: usize,
) -> Result<PreparedQuery> {
    target.require(&[LogicalField::SpanName])?;
    let mut vars = target.vars(window, limit);
    vars.set_literal("SERVICE_NAME", service);
    Ok(PreparedQuery {
        name: "operations",
        template: OPERATIONS_TEMPLATE.to_string(),
        request: target.request(vars),
        order: RowOrder::by(vec![
            SortKey::desc("errors"),
            SortKey::desc("spans"),
            SortKey::asc("operation"),
        ]),
        limit: Some(limit),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceFilter {
    pub service: Option<String>,
    pub errors_only: bool,
}

pub fn traces(
    target: &Target,
    window: &QueryWindow,
    filter: &TraceFilter,
    limit: usize,
) -> Result<PreparedQuery> {
    target.require(&[LogicalField::TraceId])?;
    let mut vars = target.vars(window, limit);
    vars.set("SERVICE_FILTER", target.service_filter(filter.service.as_deref()));
    vars.set(
        "ERRORS_FILTER",
        if filter.errors_only {
            "\n| where errors > 0"
        } else {
            ""
        },
    );
    Ok(PreparedQuery {
        name: "traces",
        template: TRACES_TEMPLATE.to_string(),
        request: target.request(vars),
        order: RowOrder::by(vec![SortKey::desc("errors"), SortKey::desc("start")]),
        limit: Some(limit),
    })
}

/// Every span of one trace, projected under the names `SpanRow::from_row`
/// reads. Durations are already converted to milliseconds.
pub fn trace_spans(
    target: &Target,
    window: &QueryWindow,
    trace_id: &TraceId,
    limit: usize,
) -> Result<PreparedQuery> {
    target.require(&[LogicalField::TraceId])?;
    let mut vars = target.vars(window, limit);
    vars.set_literal("TRACE_ID_VALUE", trace_id.as_str());
    Ok(PreparedQuery {
        name: "trace",
        template: TRACE_SPANS_TEMPLATE.to_string(),
        request: target.request(vars),
        order: RowOrder::by(vec![SortKey::asc(TIMESTAMP_FIELD), SortKey::asc("span_id")]),
        limit: Some(limit),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub service: Option<String>,
    pub trace_id: Option<TraceId>,
    pub search: Option<String>,
}

pub fn logs(
    target: &Target,
    window: &QueryWindow,
    filter: &LogFilter,
    limit: usize,
) -> Result<PreparedQuery> {
    if filter.trace_id.is_some() {
        target.require(&[LogicalField::TraceId])?;
    }
    if filter.search.is_some() {
        target.require(&[LogicalField::Body])?;
    }

    let mut vars = target.vars(window, limit);
    vars.set("SERVICE_FILTER", target.service_filter(filter.service.as_deref()));
    vars.set(
        "TRACE_FILTER",
        match (&filter.trace_id, target.fields.trace_id.as_deref()) {
            (Some(id), Some(field)) => format!(
                "\n| where tostring({}) == {}",
                field_ref(field),
                quote_literal(id.as_str())
            ),
            _ => String::new(),
        },
    );
    vars.set(
        "SEARCH_FILTER",
        match (&filter.search, target.fields.body.as_deref()) {
            (Some(needle), Some(field)) => format!(
                "\n| where tostring({}) contains {}",
                field_ref(field),
                quote_literal(needle)
            ),
            _ => String::new(),
        },
    );
    Ok(PreparedQuery {
        name: "logs",
        template: LOGS_TEMPLATE.to_string(),
        request: target.request(vars),
        order: RowOrder::by(vec![SortKey::desc(TIMESTAMP_FIELD)]),
        limit: Some(limit),
    })
}

/// Most recent raw rows of one or more datasets. Several datasets in one
/// region are read through a single union query.
pub fn sample(placement: Placement, window: &QueryWindow, limit: usize) -> PreparedQuery {
    PreparedQuery {
        name: "sample",
        template: SAMPLE_TEMPLATE.to_string(),
        request: QueryRequest::new(placement, window_vars(TIMESTAMP_FIELD, window, limit)),
        order: RowOrder::by(vec![SortKey::desc(TIMESTAMP_FIELD)]),
        limit: Some(limit),
    }
}

/// Runs of one monitor, newest first, read from the history dataset. The
/// monitor id column is picked from `fields`, the history dataset's schema.
pub fn monitor_history(
    dataset: &str,
    placement: Placement,
    fields: &[String],
    window: &QueryWindow,
    monitor_id: &str,
    limit: usize,
) -> Result<PreparedQuery> {
    let id_field = MONITOR_ID_FIELDS
        .iter()
        .find(|candidate| fields.iter().any(|f| f == *candidate))
        .ok_or_else(|| ScryError::RequiredFieldMissing {
            dataset: dataset.to_string(),
            missing: vec!["monitor_id".to_string()],
        })?;

    let mut vars = window_vars(TIMESTAMP_FIELD, window, limit);
    vars.set_field("MONITOR_ID", id_field)
        .set_literal("MONITOR_ID_VALUE", monitor_id);
    Ok(PreparedQuery {
        name: "monitor-history",
        template: MONITOR_HISTORY_TEMPLATE.to_string(),
        request: QueryRequest::new(placement, vars),
        order: RowOrder::by(vec![SortKey::desc(TIMESTAMP_FIELD)]),
        limit: Some(limit),
    })
}

/// A user-written query, sent untouched to the default region.
pub fn free_form(apl: &str) -> PreparedQuery {
    let mut vars = TemplateVars::new();
    vars.set("QUERY", apl);
    PreparedQuery {
        name: "query",
        template: FREE_FORM_TEMPLATE.to_string(),
        request: QueryRequest::new(
            Placement::from([(DEFAULT_REGION.to_string(), Vec::new())]),
            vars,
        ),
        order: RowOrder::preserve(),
        limit: None,
    }
}
