use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::SnvError;

/// Runtime settings, constructed once at startup and passed by reference to
/// every component that needs them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// KEGG organism code. Only one reference organism per cache.
    #[serde(default = "default_organism")]
    pub organism: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: usize,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
    /// KEGG hard limit on identifiers per get/link call.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// More than 6 workers tends to overload the KEGG servers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub cache_root: Option<Utf8PathBuf>,
}

fn default_base_url() -> String {
    "https://rest.kegg.jp".to_string()
}

fn default_organism() -> String {
    "hsa".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_retries() -> usize {
    7
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_page_size() -> usize {
    10
}

/// Available parallelism, capped because KEGG throttles aggressive clients.
fn default_workers() -> usize {
    crate::pool::available_workers().min(6)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            organism: default_organism(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            retry_statuses: default_retry_statuses(),
            page_size: default_page_size(),
            workers: default_workers(),
            cache_root: None,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn resolved_cache_root(&self) -> Result<Utf8PathBuf, SnvError> {
        if let Some(root) = &self.cache_root {
            return Ok(root.clone());
        }
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kegg-snv")).ok()
            })
            .ok_or_else(|| SnvError::Filesystem("unable to resolve cache directory".to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolves the config file. An explicit path must exist; the implicit
    /// `kegg-snv.json` in the working directory is optional and falls back
    /// to defaults.
    pub fn resolve(path: Option<&str>) -> Result<Config, SnvError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("kegg-snv.json"),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(SnvError::MissingConfig(config_path));
            }
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SnvError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| SnvError::ConfigParse(err.to_string()))
    }
}
