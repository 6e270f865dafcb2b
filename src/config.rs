//! Configuration loader: merges .env, config.toml and environment overrides.

use std::path::Path;

use common::{DashboardConfig, Error};

/// Load dashboard configuration from environment and optional config file.
pub fn load_config() -> Result<DashboardConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Defaults, replaced by config.toml if present.
    let mut config = read_config_file(Path::new("config.toml"))?.unwrap_or_default();

    // 3. Environment variables win.
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    // 4. Validate.
    validate(&config)?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Option<DashboardConfig>, Error> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    parse_toml(&contents).map(Some)
}

fn parse_toml(contents: &str) -> Result<DashboardConfig, Error> {
    toml::from_str(contents)
        .map_err(|e| Error::Config(format!("Failed to parse config.toml: {}", e)))
}

fn apply_env_overrides(
    config: &mut DashboardConfig,
    var: impl Fn(&str) -> Option<String>,
) -> Result<(), Error> {
    if let Some(dir) = var("SALES_STORAGE_DIR").filter(|d| !d.trim().is_empty()) {
        config.storage_dir = dir.trim().to_string();
    }
    if let Some(seed) = var("SALES_SOURCE_SEED") {
        let seed = seed
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("SALES_SOURCE_SEED must be an integer: {}", e)))?;
        config.source.seed = Some(seed);
    }
    if let Some(secs) = var("SALES_INIT_TIMEOUT_SECS") {
        config.init.timeout_secs = secs.trim().parse().map_err(|e| {
            Error::Config(format!("SALES_INIT_TIMEOUT_SECS must be an integer: {}", e))
        })?;
    }
    Ok(())
}

fn validate(config: &DashboardConfig) -> Result<(), Error> {
    if config.storage_dir.trim().is_empty() {
        return Err(Error::Config("storage_dir must not be empty".into()));
    }
    let source = &config.source;
    if source.min_latency_ms > source.max_latency_ms {
        return Err(Error::Config(format!(
            "source.min_latency_ms ({}) exceeds source.max_latency_ms ({})",
            source.min_latency_ms, source.max_latency_ms
        )));
    }
    let rates = &source.failure_rates;
    let all = [rates.network, rates.timeout, rates.server, rates.validation];
    if all.iter().any(|r| !(0.0..=1.0).contains(r)) || rates.total() > 1.0 {
        return Err(Error::Config(
            "source.failure_rates must be probabilities summing to at most 1".into(),
        ));
    }
    if config.init.timeout_secs == 0 {
        return Err(Error::Config("init.timeout_secs must be positive".into()));
    }
    Ok(())
}
