use std::sync::Arc;

use crate::config::Config;
use crate::error::SourceError;
use crate::fetch::{BrokerClient, HttpClient, Quote, ReqwestHttpClient, StooqClient};
use crate::records::{CustomWatchlist, SnapshotStore};
use crate::services::{
    FetchDispatcher, InstrumentMetadataCache, QuoteCache, QuoteService, RateLimitGate,
    TickerResolver,
};
use crate::storage::{
    JsonFileStore, KeyValueStore, ACCOUNT_RATE_LIMIT_KEY, QUOTE_RATE_LIMIT_KEY,
};
use crate::utils::time::{Clock, SystemClock};

use super::controller::WatchlistController;
use super::coordinator::LoadCoordinator;

/// Every long-lived object of a running watchlist, built once and shared.
pub struct Engine {
    config: Config,
    broker: Arc<BrokerClient>,
    resolver: Arc<TickerResolver>,
    quotes: Arc<QuoteService>,
    dispatcher: Arc<FetchDispatcher>,
    coordinator: LoadCoordinator,
    watchlist: WatchlistController,
}

impl Engine {
    pub fn new(
        config: Config,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let broker = Arc::new(BrokerClient::new(
            &config,
            Arc::clone(&http),
            Arc::clone(&clock),
        ));
        let stooq = Arc::new(StooqClient::new(&config.stooq, http));

        let quote_gate = Arc::new(RateLimitGate::persisted(
            "quote",
            Arc::clone(&clock),
            Arc::clone(&store),
            QUOTE_RATE_LIMIT_KEY,
        ));
        let catalog = Arc::new(
            InstrumentMetadataCache::new(
                Arc::clone(&broker),
                Arc::clone(&clock),
                config.cache.metadata_ttl_ms,
            )
            .with_gate(Arc::clone(&quote_gate)),
        );
        let resolver = Arc::new(TickerResolver::new(catalog));

        let primary_cache = Arc::new(QuoteCache::new(
            config.cache.quote_ttl_ms,
            Arc::clone(&clock),
        ));
        let secondary_cache = Arc::new(QuoteCache::new(
            config.cache.quote_ttl_ms,
            Arc::clone(&clock),
        ));
        let account_gate = Arc::new(RateLimitGate::persisted(
            "account",
            Arc::clone(&clock),
            Arc::clone(&store),
            ACCOUNT_RATE_LIMIT_KEY,
        ));
        quote_gate.schedule_release();
        account_gate.schedule_release();

        let quotes = Arc::new(QuoteService::new(
            Arc::clone(&broker),
            stooq,
            Arc::clone(&resolver),
            primary_cache,
            secondary_cache,
            quote_gate,
            config.fetch.secondary_batch_size,
        ));
        let dispatcher = Arc::new(FetchDispatcher::new(
            Arc::clone(&quotes),
            config.fetch.concurrency,
        ));
        let coordinator = LoadCoordinator::new(
            Arc::clone(&broker),
            account_gate,
            Arc::clone(&store),
            clock,
            config.cache.account_ttl_ms,
        );

        let snapshots = Arc::new(SnapshotStore::with_cap(
            Arc::clone(&store),
            config.fetch.snapshot_cap,
        ));
        let custom = Arc::new(CustomWatchlist::new(store));
        let watchlist = WatchlistController::new(
            Arc::clone(&dispatcher),
            coordinator.clone(),
            snapshots,
            custom,
            config.default_watchlist.clone(),
        );

        Self {
            config,
            broker,
            resolver,
            quotes,
            dispatcher,
            coordinator,
            watchlist,
        }
    }

    /// Production wiring: reqwest transport, JSON file storage, wall clock.
    pub fn from_config(config: Config) -> Self {
        let store = Arc::new(JsonFileStore::new(config.storage_path.clone()));
        Self::new(
            config,
            Arc::new(ReqwestHttpClient::new()),
            store,
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> &Arc<BrokerClient> {
        &self.broker
    }

    pub fn resolver(&self) -> &Arc<TickerResolver> {
        &self.resolver
    }

    pub fn quotes(&self) -> &Arc<QuoteService> {
        &self.quotes
    }

    pub fn dispatcher(&self) -> &Arc<FetchDispatcher> {
        &self.dispatcher
    }

    pub fn coordinator(&self) -> &LoadCoordinator {
        &self.coordinator
    }

    pub fn watchlist(&self) -> &WatchlistController {
        &self.watchlist
    }

    pub async fn lookup(&self, raw: &str, force: bool) -> Result<Quote, SourceError> {
        self.quotes.lookup(raw, force).await
    }
}
