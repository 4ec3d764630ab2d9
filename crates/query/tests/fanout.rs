use std::time::Duration;

use chrono::{TimeZone, Utc};
use scry_core::detect::detect;
use scry_core::model::SpanRow;
use scry_core::model::span::DurationUnit;
use scry_core::tree::{TreeMode, reconstruct};
use scry_core::ids::TraceId;
use scry_query::commands::{self, Target};
use scry_query::exec::REGION_COLUMN;
use scry_query::{QueryWindow, discover, execute};
use serde_json::json;
use testkit::{FakeBackend, otel_log_fields, otel_trace_fields, row, sample_span_rows};

fn window() -> QueryWindow {
    QueryWindow {
        start: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2026, 2, 1, 1, 0, 0).unwrap(),
    }
}

fn sharded(eu_delay: u64, us_delay: u64) -> FakeBackend {
    FakeBackend::new()
        .with_dataset("traces", "eu", otel_trace_fields())
        .with_dataset("traces", "us", otel_trace_fields())
        .with_rows(
            "eu",
            vec![
                row(json!({"service": "billing", "spans": 40, "errors": 0})),
                row(json!({"service": "api", "spans": 10, "errors": 3})),
            ],
        )
        .with_rows(
            "us",
            vec![
                row(json!({"service": "api", "spans": 90, "errors": 3})),
                row(json!({"service": "web", "spans": 5, "errors": 0})),
            ],
        )
        .with_delay("eu", Duration::from_millis(eu_delay))
        .with_delay("us", Duration::from_millis(us_delay))
}

async fn services(backend: &FakeBackend) -> anyhow::Result<Vec<scry_core::model::Row>> {
    let inventory = discover(backend).await?;
    let report = detect(&inventory.schema, None)?;
    let target = Target::new(report.traces.require()?, &inventory)?;
    let prepared = commands::services(&target, &window(), 20);
    Ok(execute(backend, &prepared, &window()).await?)
}

#[tokio::test]
async fn merged_order_does_not_depend_on_arrival() -> anyhow::Result<()> {
    let eu_slow = services(&sharded(40, 0)).await?;
    let us_slow = services(&sharded(0, 40)).await?;
    assert_eq!(eu_slow, us_slow);

    let order: Vec<(&str, &str)> = eu_slow
        .iter()
        .map(|r| {
            (
                r["service"].as_str().unwrap(),
                r[REGION_COLUMN].as_str().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        order,
        vec![("api", "us"), ("api", "eu"), ("billing", "eu"), ("web", "us")]
    );
    Ok(())
}

#[tokio::test]
async fn each_region_gets_its_own_query() -> anyhow::Result<()> {
    let backend = sharded(0, 0);
    services(&backend).await?;
    let mut regions: Vec<String> = backend.queries().into_iter().map(|q| q.region).collect();
    regions.sort();
    assert_eq!(regions, vec!["eu", "us"]);
    assert!(backend.queries().iter().all(|q| q.query.starts_with("['traces']")));
    Ok(())
}

#[tokio::test]
async fn one_failing_region_fails_the_command() {
    let backend = sharded(0, 20).failing_region("eu");
    let err = services(&backend).await.unwrap_err();
    let err = err.downcast::<scry_core::ScryError>().unwrap();
    assert_eq!(err.exit_code(), 5);
    assert!(err.to_string().contains("region unavailable"));
}

#[tokio::test]
async fn single_region_rows_have_no_region_column() -> anyhow::Result<()> {
    let backend = FakeBackend::new()
        .with_dataset("traces", "us", otel_trace_fields())
        .with_rows("us", vec![row(json!({"service": "api", "spans": 1, "errors": 0}))]);
    let rows = services(&backend).await?;
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].contains_key(REGION_COLUMN));
    Ok(())
}

#[tokio::test]
async fn datasets_sharing_a_region_are_unioned() -> anyhow::Result<()> {
    let backend = FakeBackend::new()
        .with_dataset("a", "us", otel_trace_fields())
        .with_dataset("b", "us", otel_log_fields())
        .with_rows(
            "us",
            vec![
                row(json!({"_time": "2026-02-01T00:00:01Z", "n": 1})),
                row(json!({"_time": "2026-02-01T00:00:03Z", "n": 3})),
                row(json!({"_time": "2026-02-01T00:00:02Z", "n": 2})),
            ],
        );
    let inventory = discover(&backend).await?;
    let placement = inventory.placement(&["a".to_string(), "b".to_string()])?;
    let prepared = commands::sample(placement, &window(), 2);
    let rows = execute(&backend, &prepared, &window()).await?;

    let queries = backend.queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].query.starts_with("['a'] | union ['b']"));
    assert_eq!(queries[0].datasets, vec!["a", "b"]);

    let ns: Vec<i64> = rows.iter().map(|r| r["n"].as_i64().unwrap()).collect();
    assert_eq!(ns, vec![3, 2]);
    Ok(())
}

#[tokio::test]
async fn failing_schema_fetch_fails_discovery() {
    let backend = FakeBackend::new()
        .with_dataset("traces", "us", otel_trace_fields())
        .with_dataset("logs", "us", otel_log_fields())
        .failing_fields("logs");
    assert!(discover(&backend).await.is_err());
}

#[tokio::test]
async fn trace_rows_rebuild_into_a_tree() -> anyhow::Result<()> {
    let backend = FakeBackend::new()
        .with_dataset("traces", "us", otel_trace_fields())
        .with_rows("us", sample_span_rows());
    let inventory = discover(&backend).await?;
    let report = detect(&inventory.schema, None)?;
    let target = Target::new(report.traces.require()?, &inventory)?;
    let id = TraceId::parse("4BF92F3577B34DA6A3CE929D0E0E4736")?;
    let prepared = commands::trace_spans(&target, &window(), &id, 1000)?;
    let rows = execute(&backend, &prepared, &window()).await?;

    assert!(backend.queries()[0]
        .query
        .contains("\"4bf92f3577b34da6a3ce929d0e0e4736\""));

    let spans: Vec<SpanRow> = rows
        .iter()
        .map(|r| SpanRow::from_row(r, DurationUnit::Millis))
        .collect();
    let view = reconstruct(spans);
    assert_eq!(view.mode(), TreeMode::Tree);
    let lines = view.lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(view.render_line(lines[1]), "  ERR api cache.get redis (700.0ms)");
    Ok(())
}
