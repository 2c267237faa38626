use std::time::Duration;

use clap::Args;
use ledger_view::{DEFAULT_PAGE_SIZE, LedgerSettings};
use serde::Deserialize;

use crate::error::Result;

const DEFAULT_CONFIG_PATH: &str = "config/ledger.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    /// Bearer token. Only read from the config file or `LEDGER_CLI_TOKEN`.
    pub token: Option<String>,
    pub page_size: u32,
    pub cache_capacity: Option<usize>,
    pub stale_after_secs: Option<u64>,
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            token: None,
            page_size: DEFAULT_PAGE_SIZE,
            cache_capacity: Some(64),
            stale_after_secs: None,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn settings(&self) -> LedgerSettings {
        LedgerSettings {
            page_size: self.page_size,
            cache_capacity: self.cache_capacity,
            stale_after: self.stale_after_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Optional config file path (TOML).
    #[arg(long, global = true)]
    config: Option<String>,
    /// Override base URL (e.g. http://127.0.0.1:8000/api).
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Override rows per page (token is never read from CLI).
    #[arg(long, global = true)]
    page_size: Option<u32>,
    /// Override how many queries are kept in memory.
    #[arg(long, global = true)]
    cache_capacity: Option<usize>,
    /// Override the freshness window in seconds.
    #[arg(long, global = true)]
    stale_after_secs: Option<u64>,
    /// Override log level (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    level: Option<String>,
}

pub fn load(overrides: &Overrides) -> Result<AppConfig> {
    let config_path = overrides.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let mut builder = config::Config::builder();
    builder = builder.add_source(config::File::with_name(config_path).required(false));
    builder = builder.add_source(config::Environment::with_prefix("LEDGER_CLI"));
    let mut settings: AppConfig = builder.build()?.try_deserialize()?;

    apply(&mut settings, overrides);
    Ok(settings)
}

fn apply(settings: &mut AppConfig, overrides: &Overrides) {
    if let Some(base_url) = &overrides.base_url {
        settings.base_url = base_url.clone();
    }
    if let Some(page_size) = overrides.page_size {
        settings.page_size = page_size;
    }
    if let Some(capacity) = overrides.cache_capacity {
        settings.cache_capacity = Some(capacity);
    }
    if let Some(secs) = overrides.stale_after_secs {
        settings.stale_after_secs = Some(secs);
    }
    if let Some(level) = &overrides.level {
        settings.level = level.clone();
    }
}
