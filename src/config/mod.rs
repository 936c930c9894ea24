use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::fetch::{PRIMARY_CONCURRENCY_LIMIT, SECONDARY_BATCH_SIZE, SNAPSHOT_CAP};

pub mod loader;
pub mod validator;
pub mod watcher;

pub use loader::{load_config, load_or_builtin};
pub use validator::validate_config;
pub use watcher::ConfigWatcher;

pub const LIVE_BASE_URL: &str = "https://live.trading212.com/api/v0";
pub const DEMO_BASE_URL: &str = "https://demo.trading212.com/api/v0";
pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:8765";
pub const STOOQ_QUOTE_ENDPOINT: &str = "https://stooq.com/q/l/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Live,
    Demo,
}

impl Environment {
    /// Anything other than `live` selects the demo environment.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("live") {
            Environment::Live
        } else {
            Environment::Demo
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Live => LIVE_BASE_URL,
            Environment::Demo => DEMO_BASE_URL,
        }
    }
}

/// How broker requests reach the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Straight to the broker with a Basic auth header.
    Direct,
    /// Through a local proxy that injects credentials itself.
    Proxy,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub quote_ttl_ms: i64,
    pub metadata_ttl_ms: i64,
    pub account_ttl_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub concurrency: usize,
    pub secondary_batch_size: usize,
    pub snapshot_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StooqSettings {
    pub endpoint: String,
    pub market_suffix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub environment: Environment,
    pub access_mode: AccessMode,
    pub proxy_url: String,
    pub credentials: Option<Credentials>,
    pub auto_refresh_seconds: u64,
    pub default_watchlist: Vec<String>,
    pub storage_path: PathBuf,
    pub cache: CacheSettings,
    pub fetch: FetchSettings,
    pub stooq: StooqSettings,
}

impl Config {
    pub fn builtin() -> Self {
        Self {
            environment: Environment::Demo,
            access_mode: AccessMode::Direct,
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            credentials: None,
            auto_refresh_seconds: 0,
            default_watchlist: ["AAPL", "MSFT", "NVDA", "TSLA", "SPY"]
                .iter()
                .map(|symbol| symbol.to_string())
                .collect(),
            storage_path: PathBuf::from("assets/quotewatch-store.json"),
            cache: CacheSettings {
                quote_ttl_ms: 5_000,
                metadata_ttl_ms: 600_000,
                account_ttl_ms: 28_000,
            },
            fetch: FetchSettings {
                concurrency: PRIMARY_CONCURRENCY_LIMIT,
                secondary_batch_size: SECONDARY_BATCH_SIZE,
                snapshot_cap: SNAPSHOT_CAP,
            },
            stooq: StooqSettings {
                endpoint: STOOQ_QUOTE_ENDPOINT.to_string(),
                market_suffix: ".us".to_string(),
            },
        }
    }

    /// Base URL every broker request is issued against.
    pub fn broker_base_url(&self) -> String {
        match self.access_mode {
            AccessMode::Direct => self.environment.base_url().to_string(),
            AccessMode::Proxy => self.proxy_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_defaults_to_demo() {
        assert_eq!(Environment::parse("LIVE"), Environment::Live);
        assert_eq!(Environment::parse("paper"), Environment::Demo);
        assert_eq!(Environment::parse(""), Environment::Demo);
    }

    #[test]
    fn base_url_follows_access_mode() {
        let mut config = Config::builtin();
        config.environment = Environment::Live;
        assert_eq!(config.broker_base_url(), LIVE_BASE_URL);

        config.access_mode = AccessMode::Proxy;
        config.proxy_url = "http://127.0.0.1:9000/".to_string();
        assert_eq!(config.broker_base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn credentials_are_redacted_in_debug_output() {
        let credentials = Credentials {
            api_key: "key-123".to_string(),
            api_secret: "secret-456".to_string(),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("key-123"));
        assert!(!rendered.contains("secret-456"));
    }
}
