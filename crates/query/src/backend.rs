use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use scry_core::Result;
use scry_core::model::Row;
use scry_core::time::TimeRange;
use serde::{Deserialize, Serialize};

/// Region used for datasets the backend does not attribute to a region.
pub const DEFAULT_REGION: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub region: String,
}

impl DatasetInfo {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
        }
    }
}

/// A monitor as the backend describes it. Only read, never changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub disabled: bool,
    pub interval_minutes: Option<u64>,
    pub range_minutes: Option<u64>,
    pub query: String,
}

impl MonitorInfo {
    /// Whether `key` names this monitor, by id or by exact name.
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name == key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    pub fn from_range(range: &TimeRange, now: DateTime<Utc>) -> Result<Self> {
        let (start, end) = range.bounds(now)?;
        Ok(Self { start, end })
    }

    pub fn start_rfc3339(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn end_rfc3339(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// What the engine reads from the telemetry backend.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_datasets(&self) -> Result<Vec<DatasetInfo>>;

    async fn dataset_fields(&self, dataset: &str) -> Result<Vec<String>>;

    async fn list_monitors(&self) -> Result<Vec<MonitorInfo>>;

    /// Runs `query` in `region`. `datasets` names the physical datasets the
    /// query reads; it is empty for free-form queries.
    async fn run_query(
        &self,
        region: &str,
        datasets: &[String],
        query: &str,
        window: &QueryWindow,
    ) -> Result<Vec<Row>>;
}
