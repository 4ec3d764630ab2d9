use serde::Serialize;
use serde_json::Value;

use crate::model::Row;
use crate::model::row::infer_columns;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeResult {
    pub rows: Vec<Row>,
    pub columns: Vec<String>,
    pub truncated: bool,
    pub rows_shown: usize,
    pub rows_total: usize,
    pub columns_shown: usize,
    pub columns_total: usize,
}

/// How many rows and columns fit in `max_cells`. Rows shrink first; columns
/// shrink only when a single row is still over budget. Non-empty dimensions
/// never shrink below one.
pub fn budget(rows_total: usize, columns_total: usize, max_cells: usize) -> (usize, usize) {
    let max_cells = max_cells.max(1);
    let mut rows_shown = rows_total;
    let mut columns_shown = columns_total;

    if rows_total.saturating_mul(columns_total) > max_cells {
        rows_shown = (max_cells / columns_total).max(1).min(rows_total);
        if rows_shown.saturating_mul(columns_total) > max_cells {
            columns_shown = (max_cells / rows_shown).max(1).min(columns_total);
        }
    }
    (rows_shown, columns_shown)
}

/// Rebuilds `row` with exactly `columns`, in order; absent fields become null.
pub fn project(row: &Row, columns: &[String]) -> Row {
    columns
        .iter()
        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Column override, budget truncation and projection, in that order.
pub fn shape(rows: Vec<Row>, columns: Option<Vec<String>>, max_cells: usize) -> ShapeResult {
    let columns = columns.unwrap_or_else(|| infer_columns(&rows));
    let rows_total = rows.len();
    let columns_total = columns.len();
    let (rows_shown, columns_shown) = budget(rows_total, columns_total, max_cells);

    let kept_columns: Vec<String> = columns.into_iter().take(columns_shown).collect();
    let rows = rows
        .iter()
        .take(rows_shown)
        .map(|row| project(row, &kept_columns))
        .collect();

    ShapeResult {
        rows,
        columns: kept_columns,
        truncated: rows_shown < rows_total || columns_shown < columns_total,
        rows_shown,
        rows_total,
        columns_shown,
        columns_total,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rows(n: usize, cols: usize) -> Vec<Row> {
        (0..n)
            .map(|r| {
                (0..cols)
                    .map(|c| (format!("c{c}"), json!(r * cols + c)))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn within_budget_is_untouched() {
        let out = shape(rows(3, 2), None, 6);
        assert!(!out.truncated);
        assert_eq!((out.rows_shown, out.columns_shown), (3, 2));
    }

    #[test]
    fn rows_shrink_before_columns() {
        let out = shape(rows(10, 4), None, 12);
        assert_eq!((out.rows_shown, out.columns_shown), (3, 4));
        assert!(out.truncated);
        assert_eq!(out.rows.len(), 3);
    }

    #[test]
    fn wide_rows_shrink_columns() {
        let out = shape(rows(5, 10), None, 4);
        assert_eq!((out.rows_shown, out.columns_shown), (1, 4));
        assert_eq!(out.columns, vec!["c0", "c1", "c2", "c3"]);
        assert_eq!(out.rows[0].len(), 4);
    }

    #[test]
    fn zero_budget_clamps_to_one_cell() {
        let out = shape(rows(5, 5), None, 0);
        assert_eq!((out.rows_shown, out.columns_shown), (1, 1));
    }

    #[test]
    fn budget_invariant_holds_exhaustively() {
        for rows_total in 1..=12 {
            for columns_total in 1..=12 {
                for max_cells in 1..=150 {
                    let (r, c) = budget(rows_total, columns_total, max_cells);
                    assert!(r * c <= max_cells, "{rows_total}x{columns_total}@{max_cells}");
                    assert!((1..=rows_total).contains(&r));
                    assert!((1..=columns_total).contains(&c));
                }
            }
        }
    }

    #[test]
    fn override_replaces_columns_and_projects_nulls() {
        let input = vec![
            json!({"service": "api", "count": 2}).as_object().cloned().unwrap(),
            json!({"service": "db"}).as_object().cloned().unwrap(),
        ];
        let out = shape(
            input,
            Some(vec!["count".into(), "missing".into()]),
            100,
        );
        assert_eq!(out.columns, vec!["count", "missing"]);
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0]["count"], json!(2));
        assert_eq!(out.rows[1]["count"], Value::Null);
        assert_eq!(out.rows[1]["missing"], Value::Null);
        assert!(!out.rows[0].contains_key("service"));
    }

    #[test]
    fn empty_input_stays_empty() {
        let out = shape(Vec::new(), None, 10);
        assert_eq!((out.rows_shown, out.rows_total), (0, 0));
        assert!(!out.truncated);
    }
}
