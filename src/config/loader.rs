use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;

use crate::error::{AppError, Context, Result};

use super::{AccessMode, Config, Credentials, Environment};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawConfig {
    environment: Option<String>,
    access_mode: Option<AccessMode>,
    proxy_url: Option<String>,
    api_key: Option<String>,
    api_secret: Option<String>,
    auto_refresh_seconds: Option<u64>,
    default_watchlist: Option<Vec<String>>,
    storage_path: Option<PathBuf>,
    cache: RawCache,
    fetch: RawFetch,
    stooq: RawStooq,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCache {
    quote_ttl_ms: Option<i64>,
    metadata_ttl_ms: Option<i64>,
    account_ttl_ms: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawFetch {
    concurrency: Option<usize>,
    secondary_batch_size: Option<usize>,
    snapshot_cap: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawStooq {
    endpoint: Option<String>,
    market_suffix: Option<String>,
}

impl RawConfig {
    fn into_config(self) -> Config {
        let mut config = Config::builtin();

        if let Some(environment) = self.environment {
            config.environment = Environment::parse(&environment);
        }
        if let Some(mode) = self.access_mode {
            config.access_mode = mode;
        }
        if let Some(proxy_url) = self.proxy_url {
            config.proxy_url = normalize_proxy_url(&proxy_url);
        }
        config.credentials = credentials(self.api_key, self.api_secret);
        if let Some(seconds) = self.auto_refresh_seconds {
            config.auto_refresh_seconds = seconds;
        }
        if let Some(watchlist) = self.default_watchlist {
            config.default_watchlist = watchlist
                .into_iter()
                .map(|symbol| symbol.trim().to_uppercase())
                .filter(|symbol| !symbol.is_empty())
                .collect();
        }
        if let Some(path) = self.storage_path {
            config.storage_path = path;
        }

        let cache = &mut config.cache;
        cache.quote_ttl_ms = self.cache.quote_ttl_ms.unwrap_or(cache.quote_ttl_ms);
        cache.metadata_ttl_ms = self.cache.metadata_ttl_ms.unwrap_or(cache.metadata_ttl_ms);
        cache.account_ttl_ms = self.cache.account_ttl_ms.unwrap_or(cache.account_ttl_ms);

        let fetch = &mut config.fetch;
        fetch.concurrency = self.fetch.concurrency.unwrap_or(fetch.concurrency);
        fetch.secondary_batch_size = self
            .fetch
            .secondary_batch_size
            .unwrap_or(fetch.secondary_batch_size);
        fetch.snapshot_cap = self.fetch.snapshot_cap.unwrap_or(fetch.snapshot_cap);

        if let Some(endpoint) = self.stooq.endpoint {
            config.stooq.endpoint = endpoint;
        }
        if let Some(suffix) = self.stooq.market_suffix {
            config.stooq.market_suffix = suffix.to_lowercase();
        }

        config
    }
}

fn normalize_proxy_url(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

fn credentials(api_key: Option<String>, api_secret: Option<String>) -> Option<Credentials> {
    let api_key = api_key.map(|key| key.trim().to_string())?;
    let api_secret = api_secret.map(|secret| secret.trim().to_string())?;
    if api_key.is_empty() || api_secret.is_empty() {
        return None;
    }
    Some(Credentials {
        api_key,
        api_secret,
    })
}

/// Parse a camelCase JSON configuration document on top of the builtin defaults.
pub fn parse_config(json: &str) -> Result<Config> {
    let raw: RawConfig = if json.trim().is_empty() {
        RawConfig::default()
    } else {
        serde_json::from_str(json).context("failed to parse configuration JSON")?
    };
    Ok(raw.into_config())
}

/// Load the configuration at `path` and apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration at {}", path.display()))?;
    let mut config = parse_config(&json)
        .map_err(|err| AppError::message(format!("{}: {err}", path.display())))?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Like [`load_config`] but falls back to the builtin defaults when the file is missing.
pub fn load_or_builtin(path: &Path) -> Result<Config> {
    match fs::metadata(path) {
        Ok(_) => load_config(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!(
                "No configuration at {}, using builtin defaults",
                path.display()
            );
            let mut config = Config::builtin();
            apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            Ok(config)
        }
        Err(err) => Err(AppError::from(err)),
    }
}

/// Apply `QUOTEWATCH_*` variables, falling back to the unprefixed names for credentials.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let first = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| lookup(name).filter(|value| !value.trim().is_empty()))
    };

    let api_key = first(&["QUOTEWATCH_API_KEY", "API_KEY"]);
    let api_secret = first(&["QUOTEWATCH_API_SECRET", "API_SECRET"]);
    if api_key.is_some() || api_secret.is_some() {
        let current = config.credentials.clone();
        let api_key = api_key.or_else(|| current.as_ref().map(|c| c.api_key.clone()));
        let api_secret = api_secret.or_else(|| current.as_ref().map(|c| c.api_secret.clone()));
        config.credentials = credentials(api_key, api_secret);
    }

    if let Some(environment) = first(&["QUOTEWATCH_ENVIRONMENT", "ENVIRONMENT"]) {
        config.environment = Environment::parse(&environment);
    }
    if let Some(proxy_url) = first(&["QUOTEWATCH_PROXY_URL"]) {
        config.proxy_url = normalize_proxy_url(&proxy_url);
    }
}
