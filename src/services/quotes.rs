use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::error::SourceError;
use crate::fetch::{BrokerClient, Quote, StooqClient};
use crate::utils::symbol::{base_symbol, canonical_symbol, normalize_input};

use super::cache::QuoteCache;
use super::rate_limit::RateLimitGate;
use super::resolver::TickerResolver;

/// Cache-first access to both quote sources.
pub struct QuoteService {
    broker: Arc<BrokerClient>,
    stooq: Arc<StooqClient>,
    resolver: Arc<TickerResolver>,
    primary_cache: Arc<QuoteCache>,
    secondary_cache: Arc<QuoteCache>,
    primary_gate: Arc<RateLimitGate>,
    batch_size: usize,
}

impl QuoteService {
    pub fn new(
        broker: Arc<BrokerClient>,
        stooq: Arc<StooqClient>,
        resolver: Arc<TickerResolver>,
        primary_cache: Arc<QuoteCache>,
        secondary_cache: Arc<QuoteCache>,
        primary_gate: Arc<RateLimitGate>,
        batch_size: usize,
    ) -> Self {
        Self {
            broker,
            stooq,
            resolver,
            primary_cache,
            secondary_cache,
            primary_gate,
            batch_size: batch_size.max(1),
        }
    }

    /// Primary is only eligible when the broker can serve per-ticker quotes.
    pub fn primary_eligible(&self) -> bool {
        self.broker.supports_quotes()
    }

    pub fn primary_cache(&self) -> &QuoteCache {
        &self.primary_cache
    }

    pub fn primary_gate(&self) -> &Arc<RateLimitGate> {
        &self.primary_gate
    }

    /// Drop expired entries from both quote caches. Returns how many went.
    pub fn prune_expired(&self) -> usize {
        self.primary_cache.clear_expired() + self.secondary_cache.clear_expired()
    }

    /// Secondary quotes for `symbols`, keyed by canonical symbol.
    ///
    /// Fresh cache entries are served without network access unless `force`.
    /// The rest is fetched in batches; a failed batch only drops its own symbols.
    pub async fn get_quotes(&self, symbols: &[String], force: bool) -> HashMap<String, Quote> {
        let mut results = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        let mut raw_keys: HashMap<String, Vec<String>> = HashMap::new();

        for raw in symbols {
            let symbol = canonical_symbol(raw);
            if symbol.is_empty() {
                continue;
            }
            let normalized = normalize_input(raw);
            if normalized != symbol {
                raw_keys.entry(symbol.clone()).or_default().push(normalized);
            }
            if results.contains_key(&symbol) || missing.contains(&symbol) {
                continue;
            }
            if !force {
                if let Some(quote) = self.secondary_cache.get(&symbol) {
                    results.insert(symbol, quote);
                    continue;
                }
            }
            missing.push(symbol);
        }

        for chunk in missing.chunks(self.batch_size) {
            match self.stooq.fetch_batch(chunk).await {
                Ok(quotes) => {
                    for quote in quotes {
                        if !chunk.contains(&quote.symbol) {
                            continue;
                        }
                        let mut keys = vec![quote.symbol.clone()];
                        if let Some(extra) = raw_keys.get(&quote.symbol) {
                            keys.extend(extra.iter().cloned());
                        }
                        self.secondary_cache.insert_many(keys, quote.clone());
                        results.insert(quote.symbol.clone(), quote);
                    }
                }
                Err(err) => warn!("Secondary batch of {} symbols failed: {err}", chunk.len()),
            }
        }

        results
    }

    /// Resolve and fetch one ticker from the primary source.
    ///
    /// A 429 extends the primary gate. Successful quotes are cached under the
    /// resolved ticker, the base symbol and the raw input.
    pub async fn fetch_primary(&self, raw: &str) -> Result<Quote, SourceError> {
        self.primary_gate.check()?;

        let resolved = self
            .resolver
            .resolve(raw)
            .await
            .map_err(|err| self.note_rate_limit(err))?;
        let mut quote = self
            .broker
            .quote(&resolved.ticker)
            .await
            .map_err(|err| self.note_rate_limit(err))?;

        if quote.name.is_none() {
            quote.name = resolved.name.clone();
        }
        quote.alias_from = resolved.alias_from.clone();

        let keys = [
            resolved.ticker.clone(),
            base_symbol(&resolved.ticker).to_string(),
            normalize_input(raw),
        ];
        self.primary_cache.insert_many(keys, quote.clone());
        Ok(quote)
    }

    /// Close the primary gate when `err` carries a backoff.
    fn note_rate_limit(&self, err: SourceError) -> SourceError {
        if let Some(backoff) = err.retry_after() {
            self.primary_gate.block_for(backoff);
        }
        err
    }

    /// Explicit single-quote lookup: primary first when eligible, then secondary.
    ///
    /// When both fail the primary error is returned, or a generic transport
    /// failure if primary was never attempted.
    pub async fn lookup(&self, raw: &str, force: bool) -> Result<Quote, SourceError> {
        let normalized = normalize_input(raw);
        if normalized.is_empty() {
            return Err(SourceError::not_found("empty ticker"));
        }
        let symbol = canonical_symbol(&normalized);
        let alias_from = (symbol != base_symbol(&normalized)).then(|| normalized.clone());

        let mut primary_error = None;
        if self.primary_eligible() {
            let cached = if force {
                None
            } else {
                self.primary_cache.get(&normalized)
            };
            match cached {
                Some(quote) => return Ok(quote),
                None => match self.fetch_primary(&normalized).await {
                    Ok(quote) => return Ok(quote),
                    Err(err) => {
                        debug!("Primary lookup for {normalized} failed: {err}");
                        primary_error = Some(err);
                    }
                },
            }
        }

        let mut secondary = self.get_quotes(&[normalized.clone()], force).await;
        match secondary.remove(&symbol) {
            Some(mut quote) => {
                quote.alias_from = alias_from;
                Ok(quote)
            }
            None => Err(primary_error.unwrap_or_else(|| {
                SourceError::transport(format!("quote lookup failed for {symbol}"))
            })),
        }
    }
}
