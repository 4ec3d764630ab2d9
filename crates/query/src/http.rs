use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use scry_core::config::Config;
use scry_core::model::Row;
use scry_core::model::fields::TIMESTAMP_FIELD;
use scry_core::{Result, ScryError};
use serde_json::{Value, json};

use crate::backend::{Backend, DEFAULT_REGION, DatasetInfo, MonitorInfo, QueryWindow};

/// Receives one line per request (and the query text) when explain mode is on.
pub type ExplainSink = Arc<dyn Fn(String) + Send + Sync>;

const ORG_ID_HEADER: &str = "x-org-id";

pub struct HttpBackend {
    client: Client,
    base_url: Url,
    regions: BTreeMap<String, Url>,
    explain: Option<ExplainSink>,
}

impl HttpBackend {
    /// Builds the client. Fails before any network traffic when no token is
    /// configured.
    pub fn new(config: &Config, explain: Option<ExplainSink>) -> Result<Self> {
        let token = config.require_token()?;

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ScryError::Config("token contains invalid characters".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        if let Some(org) = config.org_id.as_deref().filter(|o| !o.is_empty()) {
            let value = HeaderValue::from_str(org)
                .map_err(|_| ScryError::Config("org_id contains invalid characters".to_string()))?;
            headers.insert(HeaderName::from_static(ORG_ID_HEADER), value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(concat!("scry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScryError::Internal(format!("failed to build HTTP client: {e}")))?;

        let regions = config
            .regions
            .iter()
            .map(|(region, url)| Ok((region.clone(), parse_base_url(url)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            client,
            base_url: parse_base_url(&config.url)?,
            regions,
            explain,
        })
    }

    fn region_url(&self, region: &str) -> &Url {
        self.regions.get(region).unwrap_or(&self.base_url)
    }

    fn explain(&self, line: String) {
        if let Some(sink) = &self.explain {
            sink(line);
        }
    }

    async fn send(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value> {
        self.explain(format!("{method} {url}"));
        let path = url.path().to_string();

        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = &body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ScryError::Transport(format!("{method} {path}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ScryError::Transport(format!("{method} {path}: reading body: {e}")))?;
        tracing::debug!(%method, %path, status = status.as_u16(), bytes = text.len(), "backend response");

        if !status.is_success() {
            return Err(ScryError::from_status(
                method.as_str(),
                &path,
                status.as_u16(),
                &text,
            ));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ScryError::InvalidResponse(format!("{method} {path}: invalid JSON response: {e}")))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_datasets(&self) -> Result<Vec<DatasetInfo>> {
        let url = endpoint(&self.base_url, &["v2", "datasets"]);
        let body = self.send(Method::GET, url, None).await?;
        Ok(normalize_datasets(body))
    }

    async fn dataset_fields(&self, dataset: &str) -> Result<Vec<String>> {
        let url = endpoint(&self.base_url, &["v2", "datasets", dataset, "fields"]);
        let body = self.send(Method::GET, url, None).await?;
        Ok(normalize_fields(body))
    }

    async fn list_monitors(&self) -> Result<Vec<MonitorInfo>> {
        let url = endpoint(&self.base_url, &["v2", "monitors"]);
        let body = self.send(Method::GET, url, None).await?;
        Ok(normalize_monitors(body))
    }

    async fn run_query(
        &self,
        region: &str,
        datasets: &[String],
        query: &str,
        window: &QueryWindow,
    ) -> Result<Vec<Row>> {
        let mut url = endpoint(self.region_url(region), &["v1", "datasets", "_apl"]);
        url.query_pairs_mut().append_pair("format", "legacy");

        if datasets.is_empty() {
            self.explain(format!("query [{region}]:\n{query}"));
        } else {
            self.explain(format!("query [{region}] {}:\n{query}", datasets.join(", ")));
        }

        let payload = json!({
            "apl": query,
            "startTime": window.start_rfc3339(),
            "endTime": window.end_rfc3339(),
        });
        let body = self.send(Method::POST, url, Some(payload)).await?;
        normalize_rows(body)
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| ScryError::Config(format!("bad url {raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ScryError::Config(format!("bad url {raw}: not a base URL")));
    }
    Ok(url)
}

/// Appends percent-encoded path segments to `base`.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Unwraps `{"<key>": [...]}` envelopes; anything else passes through.
fn unwrap_list(body: Value, keys: &[&str]) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => keys
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub fn normalize_datasets(body: Value) -> Vec<DatasetInfo> {
    unwrap_list(body, &["datasets"])
        .into_iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(DatasetInfo::new(name, DEFAULT_REGION)),
            Value::Object(map) => {
                let name = map.get("name")?.as_str()?.to_string();
                let region = map
                    .get("region")
                    .and_then(Value::as_str)
                    .filter(|r| !r.is_empty())
                    .unwrap_or(DEFAULT_REGION);
                Some(DatasetInfo::new(name, region))
            }
            _ => None,
        })
        .collect()
}

pub fn normalize_fields(body: Value) -> Vec<String> {
    unwrap_list(body, &["fields"])
        .into_iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(name),
            Value::Object(map) => map.get("name")?.as_str().map(str::to_string),
            _ => None,
        })
        .collect()
}

/// Monitor objects, accepting camelCase or snake_case keys. Entries without
/// an id are skipped.
pub fn normalize_monitors(body: Value) -> Vec<MonitorInfo> {
    unwrap_list(body, &["monitors"])
        .into_iter()
        .filter_map(|item| {
            let map = item.as_object()?;
            let text = |keys: &[&str]| {
                keys.iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .unwrap_or_default()
                    .to_string()
            };
            let minutes = |keys: &[&str]| keys.iter().find_map(|k| map.get(*k).and_then(Value::as_u64));
            let id = text(&["id"]);
            if id.is_empty() {
                return None;
            }
            Some(MonitorInfo {
                name: text(&["name"]),
                kind: text(&["type", "kind"]),
                disabled: map.get("disabled").and_then(Value::as_bool).unwrap_or(false),
                interval_minutes: minutes(&["intervalMinutes", "interval_minutes"]),
                range_minutes: minutes(&["rangeMinutes", "range_minutes"]),
                query: text(&["aplQuery", "apl_query", "query"]),
                id,
            })
        })
        .collect()
}

/// Flattens the shapes a query response may take into plain rows:
/// `matches[]` (event data merged with `_time`), aggregation totals
/// (group keys merged with aggregation values), `{"rows": [...]}` or a bare
/// array of objects.
pub fn normalize_rows(body: Value) -> Result<Vec<Row>> {
    let mut body = match body {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => return objects(items),
        Value::Object(map) => map,
        other => {
            return Err(ScryError::InvalidResponse(truncate_for_error(&other)));
        }
    };

    if let Some(Value::Array(matches)) = body.remove("matches") {
        let has_totals = totals_of(&body).is_some_and(|t| !t.is_empty());
        if !matches.is_empty() || !has_totals {
            return Ok(matches.into_iter().filter_map(flatten_match).collect());
        }
    }
    if let Some(totals) = totals_of(&body) {
        return Ok(totals.iter().filter_map(flatten_total).collect());
    }
    if let Some(Value::Array(rows)) = body.remove("rows") {
        return objects(rows);
    }
    Err(ScryError::InvalidResponse(
        "query response has no matches, totals or rows".to_string(),
    ))
}

fn objects(items: Vec<Value>) -> Result<Vec<Row>> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(ScryError::InvalidResponse(format!(
                "expected row object, got {}",
                truncate_for_error(&other)
            ))),
        })
        .collect()
}

fn flatten_match(entry: Value) -> Option<Row> {
    let Value::Object(mut entry) = entry else {
        return None;
    };
    let mut row = Row::new();
    if let Some(ts) = entry.shift_remove(TIMESTAMP_FIELD) {
        row.insert(TIMESTAMP_FIELD.to_string(), ts);
    }
    match entry.shift_remove("data") {
        Some(Value::Object(data)) => {
            for (k, v) in data {
                row.entry(k).or_insert(v);
            }
        }
        _ => {
            for (k, v) in entry {
                row.entry(k).or_insert(v);
            }
        }
    }
    Some(row)
}

fn totals_of(body: &Row) -> Option<&Vec<Value>> {
    body.get("buckets")?.get("totals")?.as_array()
}

fn flatten_total(entry: &Value) -> Option<Row> {
    let entry = entry.as_object()?;
    let mut row = Row::new();
    if let Some(Value::Object(group)) = entry.get("group") {
        for (k, v) in group {
            row.insert(k.clone(), v.clone());
        }
    }
    if let Some(Value::Array(aggs)) = entry.get("aggregations") {
        for agg in aggs {
            if let Some(alias) = agg.get("op").and_then(Value::as_str) {
                row.insert(
                    alias.to_string(),
                    agg.get("value").cloned().unwrap_or(Value::Null),
                );
            }
        }
    }
    Some(row)
}

fn truncate_for_error(value: &Value) -> String {
    value.to_string().chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_segments() {
        let base = Url::parse("https://api.example.test/").unwrap();
        let url = endpoint(&base, &["v2", "datasets", "otel traces", "fields"]);
        assert_eq!(
            url.as_str(),
            "https://api.example.test/v2/datasets/otel%20traces/fields"
        );

        let nested = Url::parse("https://proxy.example.test/axiom").unwrap();
        let url = endpoint(&nested, &["v2", "datasets"]);
        assert_eq!(url.as_str(), "https://proxy.example.test/axiom/v2/datasets");
    }

    #[test]
    fn datasets_accept_bare_and_wrapped_lists() {
        let bare = normalize_datasets(json!([{"name": "a", "region": "eu"}, {"name": "b"}, "c"]));
        assert_eq!(
            bare,
            vec![
                DatasetInfo::new("a", "eu"),
                DatasetInfo::new("b", DEFAULT_REGION),
                DatasetInfo::new("c", DEFAULT_REGION),
            ]
        );
        let wrapped = normalize_datasets(json!({"datasets": [{"name": "a"}]}));
        assert_eq!(wrapped, vec![DatasetInfo::new("a", DEFAULT_REGION)]);
    }

    #[test]
    fn fields_accept_objects_strings_and_envelopes() {
        assert_eq!(
            normalize_fields(json!([{"name": "service.name", "type": "string"}, "trace_id"])),
            vec!["service.name", "trace_id"]
        );
        assert_eq!(
            normalize_fields(json!({"fields": [{"name": "_time"}]})),
            vec!["_time"]
        );
    }

    #[test]
    fn monitors_accept_either_key_style() {
        let monitors = normalize_monitors(json!([
            {"id": "m1", "name": "High errors", "type": "Threshold", "intervalMinutes": 5,
             "rangeMinutes": 15, "aplQuery": "['otel'] | count"},
            {"id": "m2", "name": "Quiet", "kind": "MatchEvent", "disabled": true, "interval_minutes": 1},
            {"name": "no id"}
        ]));
        assert_eq!(monitors.len(), 2);
        assert_eq!(monitors[0].kind, "Threshold");
        assert_eq!(monitors[0].range_minutes, Some(15));
        assert_eq!(monitors[0].query, "['otel'] | count");
        assert!(monitors[1].disabled);
        assert_eq!(monitors[1].interval_minutes, Some(1));
        assert!(monitors[1].matches("Quiet"));

        let wrapped = normalize_monitors(json!({"monitors": [{"id": "m3"}]}));
        assert_eq!(wrapped[0].id, "m3");
    }

    #[test]
    fn matches_are_flattened_with_time_first() {
        let rows = normalize_rows(json!({
            "status": {"rowsMatched": 1},
            "matches": [
                {"_time": "2026-03-01T00:00:00Z", "_sysTime": "x", "data": {"service.name": "api", "n": 1}}
            ]
        }))
        .unwrap();
        assert_eq!(rows.len(), 1);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["_time", "service.name", "n"]);
    }

    #[test]
    fn aggregation_totals_become_rows() {
        let rows = normalize_rows(json!({
            "matches": [],
            "buckets": {"totals": [
                {"group": {"service": "api"}, "aggregations": [{"op": "spans", "value": 12}, {"op": "errors", "value": 1}]}
            ]}
        }))
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["service"], json!("api"));
        assert_eq!(rows[0]["spans"], json!(12));
        assert_eq!(rows[0]["errors"], json!(1));
    }

    #[test]
    fn plain_rows_and_arrays() {
        assert_eq!(normalize_rows(json!({"rows": [{"a": 1}]})).unwrap().len(), 1);
        assert_eq!(normalize_rows(json!([{"a": 1}, {"a": 2}])).unwrap().len(), 2);
        assert!(normalize_rows(json!([1, 2])).is_err());
        assert!(normalize_rows(json!({"unexpected": true})).is_err());
        assert!(normalize_rows(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn missing_token_fails_before_any_request() {
        let err = HttpBackend::new(&Config::default(), None).err().unwrap();
        assert_eq!(err.exit_code(), 3);
    }
}
