use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "REELGRID";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Base URL of the media feed service. Left empty, the app falls
    /// back to built-in sample data.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    format!("reelgrid/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Bound on a single forward cursor walk; a jump or go-to-last that
    /// would fetch more pages than this fails instead of running away.
    #[serde(default = "default_walk_cap")]
    pub walk_cap: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            walk_cap: default_walk_cap(),
        }
    }
}

fn default_page_size() -> usize {
    40
}

fn default_walk_cap() -> usize {
    512
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_backoff: default_retry_backoff(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_batch_size() -> usize {
    25
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    if let Some(from_env) = load_env(prefix) {
        cfg = merge_config(cfg, from_env);
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.service.base_url.is_empty() {
        base.service.base_url = other.service.base_url;
    }
    if !other.service.user_agent.is_empty() {
        base.service.user_agent = other.service.user_agent;
    }

    if other.feed.page_size != 0 {
        base.feed.page_size = other.feed.page_size;
    }
    if other.feed.walk_cap != 0 {
        base.feed.walk_cap = other.feed.walk_cap;
    }

    if other.export.workers != 0 {
        base.export.workers = other.export.workers;
    }
    base.export.retry_backoff = other.export.retry_backoff;
    if other.export.batch_size != 0 {
        base.export.batch_size = other.export.batch_size;
    }

    base
}

fn load_env(prefix: &str) -> Option<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return None;
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Some(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "service.base_url" => cfg.service.base_url = value,
        "service.user_agent" => cfg.service.user_agent = value,
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.feed.page_size = parsed;
            }
        }
        "feed.walk_cap" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.feed.walk_cap = parsed;
            }
        }
        "export.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.export.workers = parsed;
            }
        }
        "export.retry_backoff" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.export.retry_backoff = duration;
            }
        }
        "export.batch_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.export.batch_size = parsed;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("reelgrid").join("config.yaml"))
}
