use crate::storage::{self, StorageManager};
use anyhow::{Context, Result};
use homedir::my_home;
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

/// Maximum number of saved stacks
const MAX_STACKS: usize = 50;
/// Refinement steps kept before the oldest are evicted
const HISTORY_CAP: usize = 20;
/// How deep `@name` references may nest before parsing gives up
const MAX_REFERENCE_DEPTH: usize = 8;
const DEFAULT_LIMIT: usize = 50;
const DEFAULT_ORDER_BY: &str = "updated_at";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

impl std::fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "asc"),
            OrderDirection::Desc => write!(f, "desc"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "max_stacks")]
    pub max_stacks: usize,
    #[serde(default = "history_cap")]
    pub history_cap: usize,
    #[serde(default = "max_reference_depth")]
    pub max_reference_depth: usize,

    /// Pagination defaults copied into every compiled query
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_order_by")]
    pub default_order_by: String,
    #[serde(default)]
    pub default_order_direction: OrderDirection,

    #[serde(skip_serializing, skip_deserializing)]
    pub(crate) base_path: String,
}

fn max_stacks() -> usize {
    MAX_STACKS
}

fn history_cap() -> usize {
    HISTORY_CAP
}

fn max_reference_depth() -> usize {
    MAX_REFERENCE_DEPTH
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_order_by() -> String {
    DEFAULT_ORDER_BY.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_stacks: MAX_STACKS,
            history_cap: HISTORY_CAP,
            max_reference_depth: MAX_REFERENCE_DEPTH,
            default_limit: DEFAULT_LIMIT,
            default_order_by: DEFAULT_ORDER_BY.to_string(),
            default_order_direction: OrderDirection::default(),
            base_path: String::new(),
        }
    }
}

impl Config {
    fn validate(&mut self) {
        if self.max_stacks == 0 {
            self.max_stacks = 1;
        }
        if self.history_cap == 0 {
            self.history_cap = 1;
        }
        if self.max_reference_depth == 0 {
            self.max_reference_depth = 1;
        }
        if self.default_order_by.trim().is_empty() {
            self.default_order_by = default_order_by();
        }
    }

    pub fn load_with(base_path: &str) -> Result<Self> {
        let store = storage::BackendLocal::new(base_path)
            .with_context(|| format!("failed to open config directory {base_path}"))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            let yaml = serde_yml::to_string(&Self::default())?;
            store
                .write(CONFIG_FILE, yaml.as_bytes())
                .context("failed to write default config")?;
        }

        let data = store.read(CONFIG_FILE).context("failed to read config")?;
        let config_str = String::from_utf8(data).context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store
            .write(CONFIG_FILE, config_str.as_bytes())
            .context("failed to write config")?;
        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn load() -> Result<Self> {
        Self::load_with(&base_path_from_env()?)
    }
}

/// `CATUS_BASE_PATH`, else `~/.local/share/catus`.
pub fn base_path_from_env() -> Result<String> {
    if let Ok(path) = std::env::var("CATUS_BASE_PATH") {
        return Ok(path);
    }
    let home = my_home()
        .ok()
        .flatten()
        .context("could not determine home directory")?;
    Ok(format!("{}/.local/share/catus", home.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_default_config_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_str().unwrap();

        let config = Config::load_with(base).unwrap();
        assert_eq!(config.max_stacks, 50);
        assert_eq!(config.history_cap, 20);
        assert_eq!(config.default_order_direction, OrderDirection::Desc);
        assert!(tmp.path().join("config.yaml").exists());
    }

    #[test]
    fn fills_missing_fields_and_clamps_zero() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.yaml"),
            "history_cap: 0\ndefault_order_direction: asc\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(config.history_cap, 1);
        assert_eq!(config.max_stacks, 50);
        assert_eq!(config.default_order_direction, OrderDirection::Asc);

        // upgraded file now carries every field
        let saved = std::fs::read_to_string(tmp.path().join("config.yaml")).unwrap();
        assert!(saved.contains("max_stacks"));
    }

    #[test]
    fn malformed_config_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.yaml"), "max_stacks: [nope").unwrap();
        assert!(Config::load_with(tmp.path().to_str().unwrap()).is_err());
    }
}
