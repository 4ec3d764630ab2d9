use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScryError};

pub const DEFAULT_URL: &str = "https://api.scry.dev";
pub const DEFAULT_MAX_CELLS: usize = 20_000;
pub const DEFAULT_HISTORY_DATASET: &str = "axiom-history";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub url: String,
    pub token: Option<String>,
    pub org_id: Option<String>,
    pub timeout: Duration,
    pub max_cells: usize,
    /// Region name to the base URL serving that region's datasets.
    pub regions: BTreeMap<String, String>,
    /// Dataset the backend writes monitor runs to.
    pub history_dataset: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            token: None,
            org_id: None,
            timeout: Duration::from_secs(30),
            max_cells: DEFAULT_MAX_CELLS,
            regions: BTreeMap::new(),
            history_dataset: DEFAULT_HISTORY_DATASET.to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    /// The API token, or the pre-flight error raised before any request.
    pub fn require_token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ScryError::MissingCredentials("no API token configured".to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    url: Option<String>,
    token: Option<String>,
    org_id: Option<String>,
    timeout: Option<String>,
    max_cells: Option<usize>,
    regions: Option<BTreeMap<String, String>>,
    history_dataset: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("SCRY_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("scry/config.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| ScryError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| ScryError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let max_cells = match env::var("SCRY_MAX_CELLS") {
        Ok(v) => Some(v.parse::<usize>().map_err(|e| {
            ScryError::Config(format!("bad SCRY_MAX_CELLS in environment: {e}"))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        url: env::var("SCRY_URL").ok(),
        token: env::var("SCRY_TOKEN").ok(),
        org_id: env::var("SCRY_ORG_ID").ok(),
        timeout: env::var("SCRY_TIMEOUT").ok(),
        max_cells,
        regions: None,
        history_dataset: env::var("SCRY_HISTORY_DATASET").ok(),
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.url {
        cfg.url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = overrides.token {
        cfg.token = Some(v);
    }
    if let Some(v) = overrides.org_id {
        cfg.org_id = Some(v);
    }
    if let Some(v) = overrides.timeout {
        cfg.timeout = humantime::parse_duration(&v).map_err(|e| {
            ScryError::Config(format!("bad timeout in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.max_cells {
        if v == 0 {
            return Err(ScryError::Config(format!(
                "bad max_cells in {source}: must be at least 1"
            )));
        }
        cfg.max_cells = v;
    }
    if let Some(v) = overrides.history_dataset.filter(|v| !v.trim().is_empty()) {
        cfg.history_dataset = v;
    }
    if let Some(v) = overrides.regions {
        cfg.regions = v
            .into_iter()
            .map(|(region, url)| (region, url.trim_end_matches('/').to_string()))
            .collect();
    }
    Ok(())
}
