use std::cmp::Ordering;
use std::time::Instant;

use futures::future::try_join_all;
use scry_core::Result;
use scry_core::model::Row;
use scry_core::model::row::compare_values;
use serde_json::Value;

use crate::backend::{Backend, QueryWindow};
use crate::plan::{QueryRequest, RegionQuery};

/// Column added to merged rows when a query spanned more than one region.
pub const REGION_COLUMN: &str = "region";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }
}

/// Ordering applied after region results are concatenated. Rows that tie on
/// every key are ordered by their serialized form, so the final order never
/// depends on which region answered first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowOrder {
    keys: Vec<SortKey>,
    preserve: bool,
}

impl RowOrder {
    pub fn by(keys: Vec<SortKey>) -> Self {
        Self {
            keys,
            preserve: false,
        }
    }

    /// Keeps backend order for single-region results.
    pub fn preserve() -> Self {
        Self {
            keys: Vec::new(),
            preserve: true,
        }
    }

    pub fn sort(&self, rows: &mut Vec<Row>) {
        let mut keyed: Vec<(String, Row)> = rows
            .drain(..)
            .map(|row| (Value::Object(row.clone()).to_string(), row))
            .collect();
        keyed.sort_by(|(a_text, a), (b_text, b)| {
            self.compare(a, b).then_with(|| a_text.cmp(b_text))
        });
        rows.extend(keyed.into_iter().map(|(_, row)| row));
    }

    fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for key in &self.keys {
            let left = a.get(&key.field).unwrap_or(&Value::Null);
            let right = b.get(&key.field).unwrap_or(&Value::Null);
            let ord = compare_values(left, right);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// A logical query ready to run: template, placement, merge order and an
/// optional cap on merged rows.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    pub name: &'static str,
    pub template: String,
    pub request: QueryRequest,
    pub order: RowOrder,
    pub limit: Option<usize>,
}

impl PreparedQuery {
    pub fn region_queries(&self) -> Result<Vec<RegionQuery>> {
        self.request.region_queries(&self.template)
    }
}

/// Runs one query per region concurrently and merges the results. The first
/// failing region fails the whole call.
pub async fn execute(
    backend: &dyn Backend,
    prepared: &PreparedQuery,
    window: &QueryWindow,
) -> Result<Vec<Row>> {
    let queries = prepared.region_queries()?;
    let multi_region = queries.len() > 1;
    let started = Instant::now();

    let calls = queries.iter().map(|q| async move {
        let region_started = Instant::now();
        let rows = backend
            .run_query(&q.region, &q.datasets, &q.query, window)
            .await?;
        tracing::debug!(
            query = prepared.name,
            region = %q.region,
            rows = rows.len(),
            elapsed_ms = region_started.elapsed().as_millis() as u64,
            "region query finished"
        );
        Ok::<_, scry_core::ScryError>((q.region.as_str(), rows))
    });
    let results = try_join_all(calls).await?;

    let mut merged: Vec<Row> = Vec::new();
    for (region, rows) in results {
        for mut row in rows {
            if multi_region && !row.contains_key(REGION_COLUMN) {
                row.insert(REGION_COLUMN.to_string(), Value::String(region.to_string()));
            }
            merged.push(row);
        }
    }

    if multi_region || !prepared.order.preserve {
        prepared.order.sort(&mut merged);
    }
    if let Some(limit) = prepared.limit {
        merged.truncate(limit);
    }

    tracing::debug!(
        query = prepared.name,
        regions = queries.len(),
        rows = merged.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "query merged"
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn sorts_by_keys_then_serialized_row() {
        let order = RowOrder::by(vec![SortKey::desc("errors"), SortKey::desc("spans")]);
        let mut rows = vec![
            row(json!({"service": "b", "errors": 0, "spans": 10})),
            row(json!({"service": "a", "errors": 2, "spans": 1})),
            row(json!({"service": "d", "errors": 0, "spans": 10})),
            row(json!({"service": "c", "errors": 0, "spans": 10})),
        ];
        order.sort(&mut rows);
        let services: Vec<&str> = rows.iter().map(|r| r["service"].as_str().unwrap()).collect();
        assert_eq!(services, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn missing_sort_fields_sort_as_null() {
        let order = RowOrder::by(vec![SortKey::asc("start")]);
        let mut rows = vec![row(json!({"start": "2026-01-01"})), row(json!({"other": 1}))];
        order.sort(&mut rows);
        assert!(rows[0].get("start").is_none());
    }
}
