//! Guesses which dataset holds each telemetry kind and how its columns map
//! onto the logical fields the query templates need.
//!
//! Detection is a pure function over a schema snapshot. Scoring is driven
//! entirely by the candidate tables below; supporting a new naming convention
//! means adding a candidate name, not new code.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Result, ScryError};
use crate::model::{FieldMap, LogicalField, TelemetryKind};

/// Dataset name to the field names the backend reports for it.
pub type SchemaMap = BTreeMap<String, Vec<String>>;

const REQUIRED_WEIGHT: u32 = 3;
const OPTIONAL_WEIGHT: u32 = 1;

struct Candidate {
    field: LogicalField,
    names: &'static [&'static str],
    weight: u32,
}

const SERVICE_NAMES: &[&str] = &[
    "service.name",
    "service_name",
    "resource.service.name",
    "resource.attributes.service.name",
    "serviceName",
    "service",
];
const TRACE_ID_NAMES: &[&str] = &["trace_id", "traceId", "trace.id", "traceID"];
const SPAN_ID_NAMES: &[&str] = &["span_id", "spanId", "span.id", "spanID"];

const TRACE_CANDIDATES: &[Candidate] = &[
    Candidate {
        field: LogicalField::Service,
        names: SERVICE_NAMES,
        weight: REQUIRED_WEIGHT,
    },
    Candidate {
        field: LogicalField::TraceId,
        names: TRACE_ID_NAMES,
        weight: REQUIRED_WEIGHT,
    },
    Candidate {
        field: LogicalField::SpanId,
        names: SPAN_ID_NAMES,
        weight: OPTIONAL_WEIGHT,
    },
    Candidate {
        field: LogicalField::ParentSpanId,
        names: &["parent_span_id", "parentSpanId", "parent_id", "parent.id"],
        weight: OPTIONAL_WEIGHT,
    },
    Candidate {
        field: LogicalField::SpanName,
        names: &["name", "span_name", "operation", "operation_name", "operationName"],
        weight: OPTIONAL_WEIGHT,
    },
    Candidate {
        field: LogicalField::SpanKind,
        names: &["kind", "span.kind", "span_kind"],
        weight: OPTIONAL_WEIGHT,
    },
    Candidate {
        field: LogicalField::Status,
        names: &["status.code", "status_code", "otel.status_code", "status"],
        weight: OPTIONAL_WEIGHT,
    },
    Candidate {
        field: LogicalField::Duration,
        names: &[
            "duration",
            "duration_ms",
            "duration_nano",
            "duration_ns",
            "durationNano",
        ],
        weight: OPTIONAL_WEIGHT,
    },
];

const LOG_CANDIDATES: &[Candidate] = &[
    Candidate {
        field: LogicalField::Service,
        names: SERVICE_NAMES,
        weight: REQUIRED_WEIGHT,
    },
    Candidate {
        field: LogicalField::Severity,
        names: &["severity_text", "severityText", "severity", "level", "log.level"],
        weight: OPTIONAL_WEIGHT,
    },
    Candidate {
        field: LogicalField::Body,
        names: &["body", "message", "msg", "log.message"],
        weight: OPTIONAL_WEIGHT,
    },
    Candidate {
        field: LogicalField::TraceId,
        names: TRACE_ID_NAMES,
        weight: OPTIONAL_WEIGHT,
    },
    Candidate {
        field: LogicalField::SpanId,
        names: SPAN_ID_NAMES,
        weight: OPTIONAL_WEIGHT,
    },
];

fn candidates(kind: TelemetryKind) -> &'static [Candidate] {
    match kind {
        TelemetryKind::Traces => TRACE_CANDIDATES,
        TelemetryKind::Logs => LOG_CANDIDATES,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub dataset: String,
    pub score: u32,
    pub fields: FieldMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindDetection {
    pub kind: TelemetryKind,
    pub winner: Option<Detection>,
    /// Every dataset tied at the winning score, sorted; empty unless two or
    /// more datasets tied.
    pub ties: Vec<String>,
    /// Positive scores of every candidate, best first.
    pub scores: Vec<(String, u32)>,
    pub pinned: bool,
}

impl KindDetection {
    pub fn tie_warning(&self) -> Option<String> {
        let winner = self.winner.as_ref()?;
        if self.ties.len() < 2 {
            return None;
        }
        Some(format!(
            "{} datasets tied for {} detection (score {}): {}; using {}. Pin one with --dataset to choose explicitly",
            self.ties.len(),
            self.kind,
            winner.score,
            self.ties.join(", "),
            winner.dataset
        ))
    }

    /// The winning detection, or the fatal error naming the remedy.
    pub fn require(&self) -> Result<&Detection> {
        self.winner.as_ref().ok_or_else(|| ScryError::NoDatasetDetected {
            kind: self.kind.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionReport {
    pub traces: KindDetection,
    pub logs: KindDetection,
}

impl DetectionReport {
    pub fn kind(&self, kind: TelemetryKind) -> &KindDetection {
        match kind {
            TelemetryKind::Traces => &self.traces,
            TelemetryKind::Logs => &self.logs,
        }
    }

    pub fn warnings(&self) -> Vec<String> {
        [&self.traces, &self.logs]
            .into_iter()
            .filter_map(KindDetection::tie_warning)
            .collect()
    }
}

/// Score one dataset's fields for a kind. A dataset without any service
/// candidate scores zero, so a detected kind always carries a service field.
pub fn score_fields(kind: TelemetryKind, fields: &[String]) -> (u32, Option<FieldMap>) {
    let table = candidates(kind);
    let lookup = |names: &[&str]| -> Option<String> {
        names
            .iter()
            .find(|name| fields.iter().any(|f| f == *name))
            .map(|name| (*name).to_string())
    };

    let Some(service) = lookup(SERVICE_NAMES) else {
        return (0, None);
    };

    let mut map = FieldMap::new(service);
    let mut score = 0;
    for candidate in table {
        if let Some(physical) = lookup(candidate.names) {
            score += candidate.weight;
            map.set(candidate.field, physical);
        }
    }
    (score, Some(map))
}

fn detect_kind(schema: &SchemaMap, kind: TelemetryKind) -> KindDetection {
    let mut scored: Vec<(String, u32, FieldMap)> = schema
        .iter()
        .filter_map(|(name, fields)| match score_fields(kind, fields) {
            (score, Some(map)) if score > 0 => Some((name.clone(), score, map)),
            _ => None,
        })
        .collect();

    // Best score first, then lexicographic name: the first entry is the winner.
    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let scores = scored.iter().map(|(n, s, _)| (n.clone(), *s)).collect();
    let Some((dataset, score, fields)) = scored.first().cloned() else {
        return KindDetection {
            kind,
            winner: None,
            ties: Vec::new(),
            scores,
            pinned: false,
        };
    };

    let tied: Vec<String> = scored
        .iter()
        .take_while(|(_, s, _)| *s == score)
        .map(|(n, _, _)| n.clone())
        .collect();
    let ties = if tied.len() > 1 { tied } else { Vec::new() };

    KindDetection {
        kind,
        winner: Some(Detection {
            dataset,
            score,
            fields,
        }),
        ties,
        scores,
        pinned: false,
    }
}

fn detect_pinned(schema: &SchemaMap, kind: TelemetryKind, dataset: &str) -> Result<KindDetection> {
    let fields = schema
        .get(dataset)
        .ok_or_else(|| ScryError::NotFound(format!("dataset {dataset}")))?;
    let (score, map) = score_fields(kind, fields);
    let fields = map.ok_or_else(|| ScryError::RequiredFieldMissing {
        dataset: dataset.to_string(),
        missing: vec![LogicalField::Service.to_string()],
    })?;
    Ok(KindDetection {
        kind,
        winner: Some(Detection {
            dataset: dataset.to_string(),
            score,
            fields,
        }),
        ties: Vec::new(),
        scores: vec![(dataset.to_string(), score)],
        pinned: true,
    })
}

/// Detect trace and log datasets. `pinned_traces` skips scoring for traces
/// and maps the named dataset directly.
pub fn detect(schema: &SchemaMap, pinned_traces: Option<&str>) -> Result<DetectionReport> {
    let traces = match pinned_traces {
        Some(dataset) => detect_pinned(schema, TelemetryKind::Traces, dataset)?,
        None => detect_kind(schema, TelemetryKind::Traces),
    };
    Ok(DetectionReport {
        traces,
        logs: detect_kind(schema, TelemetryKind::Logs),
    })
}

/// Detect a single kind against a pinned dataset, used for `--logs-dataset`.
pub fn detect_with_pin(
    schema: &SchemaMap,
    kind: TelemetryKind,
    dataset: &str,
) -> Result<KindDetection> {
    detect_pinned(schema, kind, dataset)
}

/// Fails with the missing logical fields when `fields` lacks any of `required`.
pub fn require_fields(dataset: &str, fields: &FieldMap, required: &[LogicalField]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|f| fields.get(**f).is_none())
        .map(|f| f.to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(ScryError::RequiredFieldMissing {
        dataset: dataset.to_string(),
        missing,
    })
}
