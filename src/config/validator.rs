use crate::error::{AppError, Result};
use crate::fetch::{PRIMARY_CONCURRENCY_LIMIT, SECONDARY_BATCH_SIZE};

use super::{AccessMode, Config};

/// Validate a loaded configuration and surface every issue at once.
pub fn validate_config(config: &Config) -> Result<()> {
    let mut issues = Vec::new();

    validate_access(config, &mut issues);
    validate_cache(config, &mut issues);
    validate_fetch(config, &mut issues);
    validate_stooq(config, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::message(format!(
            "configuration invalid:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}

fn validate_access(config: &Config, issues: &mut Vec<String>) {
    match config.access_mode {
        AccessMode::Direct => {
            if config.credentials.is_none() {
                issues.push(
                    "direct access requires apiKey and apiSecret (or API_KEY/API_SECRET)"
                        .to_string(),
                );
            }
        }
        AccessMode::Proxy => {
            let url = config.proxy_url.trim();
            if url.is_empty() {
                issues.push("proxyUrl must not be empty in proxy mode".to_string());
            } else if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(format!("proxyUrl `{url}` must start with http:// or https://"));
            }
        }
    }
}

fn validate_cache(config: &Config, issues: &mut Vec<String>) {
    let ttls = [
        ("cache.quoteTtlMs", config.cache.quote_ttl_ms),
        ("cache.metadataTtlMs", config.cache.metadata_ttl_ms),
        ("cache.accountTtlMs", config.cache.account_ttl_ms),
    ];
    for (name, value) in ttls {
        if value <= 0 {
            issues.push(format!("{name} must be positive, got {value}"));
        }
    }
}

fn validate_fetch(config: &Config, issues: &mut Vec<String>) {
    let concurrency = config.fetch.concurrency;
    if concurrency == 0 || concurrency > PRIMARY_CONCURRENCY_LIMIT {
        issues.push(format!(
            "fetch.concurrency must be between 1 and {PRIMARY_CONCURRENCY_LIMIT}, got {concurrency}"
        ));
    }
    let batch = config.fetch.secondary_batch_size;
    if batch == 0 || batch > SECONDARY_BATCH_SIZE {
        issues.push(format!(
            "fetch.secondaryBatchSize must be between 1 and {SECONDARY_BATCH_SIZE}, got {batch}"
        ));
    }
    if config.fetch.snapshot_cap == 0 {
        issues.push("fetch.snapshotCap must be at least 1".to_string());
    }
}

fn validate_stooq(config: &Config, issues: &mut Vec<String>) {
    if config.stooq.endpoint.trim().is_empty() {
        issues.push("stooq.endpoint must not be empty".to_string());
    }
}
