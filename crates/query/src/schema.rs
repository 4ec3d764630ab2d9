use std::collections::BTreeMap;

use futures::future::try_join_all;
use scry_core::detect::SchemaMap;
use scry_core::{Result, ScryError};
use serde::Serialize;

use crate::backend::{Backend, DatasetInfo};
use crate::plan::Placement;

/// Everything detection and planning need to know about the backend's
/// datasets, captured once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Inventory {
    pub datasets: Vec<DatasetInfo>,
    pub schema: SchemaMap,
}

impl Inventory {
    /// Distinct dataset names in name order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.datasets.iter().map(|d| d.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn regions_of(&self, name: &str) -> Vec<String> {
        let mut regions: Vec<String> = self
            .datasets
            .iter()
            .filter(|d| d.name == name)
            .map(|d| d.region.clone())
            .collect();
        regions.sort();
        regions.dedup();
        regions
    }

    /// Groups the named datasets by the regions that hold a copy of them.
    pub fn placement(&self, names: &[String]) -> Result<Placement> {
        let mut placement: Placement = BTreeMap::new();
        for name in names {
            let regions = self.regions_of(name);
            if regions.is_empty() {
                return Err(ScryError::NotFound(format!("dataset {name}")));
            }
            for region in regions {
                let datasets = placement.entry(region).or_default();
                if !datasets.contains(name) {
                    datasets.push(name.clone());
                }
            }
        }
        Ok(placement)
    }

    pub fn field_count(&self, name: &str) -> usize {
        self.schema.get(name).map(Vec::len).unwrap_or(0)
    }
}

/// Lists datasets and fetches every distinct dataset's fields concurrently.
/// Any failed fetch fails discovery.
pub async fn discover(backend: &dyn Backend) -> Result<Inventory> {
    let datasets = backend.list_datasets().await?;
    let mut names: Vec<String> = datasets.iter().map(|d| d.name.clone()).collect();
    names.sort();
    names.dedup();
    tracing::debug!(datasets = datasets.len(), distinct = names.len(), "listed datasets");

    let fetches = names.iter().map(|name| async move {
        let fields = backend.dataset_fields(name).await?;
        tracing::debug!(dataset = %name, fields = fields.len(), "fetched dataset fields");
        Ok::<_, ScryError>((name.clone(), fields))
    });
    let schema: SchemaMap = try_join_all(fetches).await?.into_iter().collect();

    Ok(Inventory { datasets, schema })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> Inventory {
        Inventory {
            datasets: vec![
                DatasetInfo::new("traces", "us"),
                DatasetInfo::new("traces", "eu"),
                DatasetInfo::new("logs", "us"),
            ],
            schema: SchemaMap::from([
                ("traces".to_string(), vec!["_time".to_string()]),
                ("logs".to_string(), vec![]),
            ]),
        }
    }

    #[test]
    fn same_name_in_two_regions_is_sharded() {
        let placement = inventory().placement(&["traces".into()]).unwrap();
        assert_eq!(placement.len(), 2);
        assert_eq!(placement["eu"], vec!["traces"]);
        assert_eq!(placement["us"], vec!["traces"]);
    }

    #[test]
    fn datasets_sharing_a_region_are_grouped() {
        let placement = inventory()
            .placement(&["traces".into(), "logs".into()])
            .unwrap();
        assert_eq!(placement["us"], vec!["traces", "logs"]);
        assert_eq!(placement["eu"], vec!["traces"]);
    }

    #[test]
    fn unknown_dataset_is_not_found() {
        let err = inventory().placement(&["nope".into()]).unwrap_err();
        assert!(matches!(err, ScryError::NotFound(_)));
    }

    #[test]
    fn names_are_distinct() {
        let inv = inventory();
        assert_eq!(inv.names(), vec!["logs", "traces"]);
        assert_eq!(inv.field_count("traces"), 1);
        assert_eq!(inv.field_count("missing"), 0);
    }
}
