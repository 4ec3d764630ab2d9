use std::collections::BTreeMap;

use serde::Serialize;

use crate::template::{TemplateVars, expand, field_ref};
use scry_core::Result;

/// Region name to the physical datasets queried there.
pub type Placement = BTreeMap<String, Vec<String>>;

/// Token the dataset clause is bound to in every template.
pub const DATASET_TOKEN: &str = "DATASET";

/// One logical query before it is split per region.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub datasets_by_region: Placement,
    pub template_vars: TemplateVars,
}

/// A fully expanded query bound to one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionQuery {
    pub region: String,
    pub datasets: Vec<String>,
    pub query: String,
}

impl QueryRequest {
    pub fn new(datasets_by_region: Placement, template_vars: TemplateVars) -> Self {
        Self {
            datasets_by_region,
            template_vars,
        }
    }

    /// Expands `template` once per region, with `${DATASET}` bound to that
    /// region's dataset clause. Regions come out in name order.
    pub fn region_queries(&self, template: &str) -> Result<Vec<RegionQuery>> {
        self.datasets_by_region
            .iter()
            .map(|(region, datasets)| {
                let mut vars = self.template_vars.clone();
                if !datasets.is_empty() {
                    vars.set(DATASET_TOKEN, dataset_clause(datasets));
                }
                Ok(RegionQuery {
                    region: region.clone(),
                    datasets: datasets.clone(),
                    query: expand(template, &vars)?,
                })
            })
            .collect()
    }
}

/// `['a']` for one dataset, `['a'] | union ['b'], ['c']` for several.
pub fn dataset_clause(datasets: &[String]) -> String {
    let mut refs = datasets.iter().map(|d| field_ref(d));
    let Some(first) = refs.next() else {
        return String::new();
    };
    let rest: Vec<String> = refs.collect();
    if rest.is_empty() {
        first
    } else {
        format!("{first} | union {}", rest.join(", "))
    }
}
