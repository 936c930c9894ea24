use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Mutex;

use crate::error::SourceError;
use crate::fetch::{BrokerClient, InstrumentMetadata};
use crate::utils::symbol::{
    apply_alias, base_symbol, is_qualified, normalize_input, with_default_qualifier,
    DEFAULT_QUALIFIER,
};
use crate::utils::time::Clock;

use super::rate_limit::RateLimitGate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTicker {
    pub ticker: String,
    pub name: Option<String>,
    /// Normalized input when the alias table rewrote it.
    pub alias_from: Option<String>,
}

impl ResolvedTicker {
    pub fn symbol(&self) -> &str {
        base_symbol(&self.ticker)
    }
}

struct CatalogEntry {
    fetched_at_ms: i64,
    instruments: Arc<Vec<InstrumentMetadata>>,
}

/// Full instrument catalog, fetched at most once per TTL window.
///
/// The lock is held across the fetch so concurrent callers share one request.
/// With a gate attached, a closed gate short-circuits the fetch and a 429
/// from the catalog closes it.
pub struct InstrumentMetadataCache {
    broker: Arc<BrokerClient>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    gate: Option<Arc<RateLimitGate>>,
    entry: Mutex<Option<CatalogEntry>>,
}

impl InstrumentMetadataCache {
    pub fn new(broker: Arc<BrokerClient>, clock: Arc<dyn Clock>, ttl_ms: i64) -> Self {
        Self {
            broker,
            clock,
            ttl_ms,
            gate: None,
            entry: Mutex::new(None),
        }
    }

    /// Share the primary source's rate-limit gate with the catalog fetch.
    pub fn with_gate(mut self, gate: Arc<RateLimitGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub async fn instruments(&self) -> Result<Arc<Vec<InstrumentMetadata>>, SourceError> {
        let mut entry = self.entry.lock().await;
        if let Some(cached) = entry.as_ref() {
            if self.clock.now_ms() - cached.fetched_at_ms < self.ttl_ms {
                return Ok(Arc::clone(&cached.instruments));
            }
        }

        if let Some(gate) = &self.gate {
            gate.check()?;
        }
        let instruments = match self.broker.instruments().await {
            Ok(instruments) => Arc::new(instruments),
            Err(err) => {
                if let (Some(gate), Some(backoff)) = (&self.gate, err.retry_after()) {
                    gate.block_for(backoff);
                }
                return Err(err);
            }
        };
        debug!("instrument catalog refreshed with {} entries", instruments.len());
        *entry = Some(CatalogEntry {
            fetched_at_ms: self.clock.now_ms(),
            instruments: Arc::clone(&instruments),
        });
        Ok(instruments)
    }
}

/// Maps user input to a fully qualified broker ticker.
pub struct TickerResolver {
    catalog: Arc<InstrumentMetadataCache>,
}

impl TickerResolver {
    pub fn new(catalog: Arc<InstrumentMetadataCache>) -> Self {
        Self { catalog }
    }

    pub async fn resolve(&self, raw: &str) -> Result<ResolvedTicker, SourceError> {
        let normalized = normalize_input(raw);
        if normalized.is_empty() {
            return Err(SourceError::not_found("empty ticker"));
        }
        let target = apply_alias(&normalized);
        let alias_from = (target != normalized).then_some(normalized);

        if is_qualified(&target) {
            return Ok(ResolvedTicker {
                ticker: target,
                name: None,
                alias_from,
            });
        }

        let instruments = match self.catalog.instruments().await {
            Ok(instruments) => instruments,
            Err(err) if err.is_rate_limited() => return Err(err),
            Err(err) => {
                warn!(
                    "Instrument catalog unavailable ({err}), guessing {target}{DEFAULT_QUALIFIER}"
                );
                return Ok(ResolvedTicker {
                    ticker: with_default_qualifier(&target),
                    name: None,
                    alias_from,
                });
            }
        };

        let matches: Vec<&InstrumentMetadata> = instruments
            .iter()
            .filter(|entry| base_symbol(&entry.resolved_ticker).eq_ignore_ascii_case(&target))
            .collect();
        let chosen = matches
            .iter()
            .find(|entry| entry.resolved_ticker.ends_with(DEFAULT_QUALIFIER))
            .or_else(|| matches.first())
            .ok_or_else(|| SourceError::not_found(target.clone()))?;

        Ok(ResolvedTicker {
            ticker: chosen.resolved_ticker.clone(),
            name: chosen.name.clone(),
            alias_from,
        })
    }
}
