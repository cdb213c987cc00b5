use std::collections::HashSet;
use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_metrics_port() -> u16 {
    9100
}

fn default_historical_candles() -> usize {
    1440
}

fn default_cooldown_seconds() -> u64 {
    300
}

fn default_webhook_timeout_ms() -> u64 {
    5_000
}

fn default_webhook_max_retries() -> u32 {
    3
}

fn default_db_write_timeout_ms() -> u64 {
    5_000
}

fn default_persist_batch_size() -> usize {
    50
}

/// Root configuration, shared by all four binaries. Each binary only reads
/// the sections relevant to its own responsibility.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    pub bus: BusConfig,
    pub timeseries_store: TimeseriesStoreConfig,
    pub metadata_store: MetadataStoreConfig,
    pub cooldown_store: CooldownStoreConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_historical_candles")]
    pub historical_candles: usize,
    #[serde(default = "default_db_write_timeout_ms")]
    pub db_write_timeout_ms: u64,
    #[serde(default = "default_persist_batch_size")]
    pub metrics_persist_batch_size: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
            historical_candles: default_historical_candles(),
            db_write_timeout_ms: default_db_write_timeout_ms(),
            metrics_persist_batch_size: default_persist_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeseriesStoreConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataStoreConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CooldownStoreConfig {
    pub url: String,
    #[serde(default = "default_cooldown_seconds")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhooksConfig {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_webhook_max_retries")]
    pub max_retries: u32,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            timeout_ms: default_webhook_timeout_ms(),
            max_retries: default_webhook_max_retries(),
        }
    }
}

/// Load, environment-override, and validate the TOML config at `path`.
///
/// Environment variables named in spec.md §6 take precedence over the file
/// when present: `BUS_URL`, `TIMESERIES_STORE_URL`, `METADATA_STORE_URL`,
/// `COOLDOWN_STORE_URL`, `WEBHOOK_URLS` (comma-separated), `METRICS_PORT`,
/// `LOG_LEVEL`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let mut config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = std::env::var("BUS_URL") {
        config.bus.url = v;
    }
    if let Ok(v) = std::env::var("TIMESERIES_STORE_URL") {
        config.timeseries_store.url = v;
    }
    if let Ok(v) = std::env::var("METADATA_STORE_URL") {
        config.metadata_store.url = v;
    }
    if let Ok(v) = std::env::var("COOLDOWN_STORE_URL") {
        config.cooldown_store.url = v;
    }
    if let Ok(v) = std::env::var("WEBHOOK_URLS") {
        config.webhooks.urls = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Ok(v) = std::env::var("METRICS_PORT") {
        if let Ok(port) = v.parse() {
            config.general.metrics_port = port;
        }
    }
    if let Ok(v) = std::env::var("LOG_LEVEL") {
        config.general.log_level = v;
    }
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_symbols_unique(config)?;
    validate_cooldown(config)?;
    Ok(())
}

fn validate_symbols_unique(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let mut seen = HashSet::new();
    for symbol in &config.symbols {
        if !seen.insert(symbol.as_str()) {
            return Err(Report::new(ConfigError::Validation {
                field: format!("symbols: duplicate entry \"{symbol}\""),
            }));
        }
        if symbol != &symbol.to_uppercase() {
            return Err(Report::new(ConfigError::Validation {
                field: format!("symbols: \"{symbol}\" must be upper-case ASCII"),
            }));
        }
    }
    Ok(())
}

fn validate_cooldown(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.cooldown_store.ttl_seconds == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "cooldown_store.ttl_seconds must be > 0".into(),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    const MINIMAL: &str = r#"
[bus]
url = "nats://localhost:4222"

[timeseries_store]
url = "postgres://localhost/timeseries"

[metadata_store]
url = "postgres://localhost/metadata"

[cooldown_store]
url = "redis://localhost:6379"
"#;

    #[test]
    fn defaults_applied_when_sections_omitted() {
        let config = parse(MINIMAL);
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "text");
        assert_eq!(config.general.metrics_port, 9100);
        assert_eq!(config.general.historical_candles, 1440);
        assert_eq!(config.cooldown_store.ttl_seconds, 300);
        assert!(config.webhooks.urls.is_empty());
        assert!(config.symbols.is_empty());
    }

    #[test]
    fn duplicate_symbol_rejected() {
        let toml = format!(
            "{MINIMAL}\nsymbols = [\"BTCUSDT\", \"BTCUSDT\"]\n"
        );
        let config = parse(&toml);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn lowercase_symbol_rejected() {
        let toml = format!("{MINIMAL}\nsymbols = [\"btcusdt\"]\n");
        let config = parse(&toml);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_cooldown_rejected() {
        let toml = format!("{MINIMAL}\n[cooldown_store]\nurl = \"redis://localhost\"\nttl_seconds = 0\n");
        let config = parse(&toml);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn env_override_takes_precedence() {
        // SAFETY: single-threaded test process section, no concurrent env readers.
        unsafe {
            std::env::set_var("BUS_URL", "nats://override:4222");
        }
        let mut config = parse(MINIMAL);
        apply_env_overrides(&mut config);
        assert_eq!(config.bus.url, "nats://override:4222");
        unsafe {
            std::env::remove_var("BUS_URL");
        }
    }
}
