use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};

use crate::error::Result;
use crate::fetch::Quote;
use crate::records::{
    has_quote_data, merge, merge_with_previous, CustomWatchlist, SnapshotStore, WatchlistItem,
};
use crate::services::FetchDispatcher;
use crate::utils::symbol::canonical_symbol;

use super::coordinator::LoadCoordinator;

/// Owns the merged watchlist and runs refresh cycles over it.
pub struct WatchlistController {
    dispatcher: Arc<FetchDispatcher>,
    coordinator: LoadCoordinator,
    snapshots: Arc<SnapshotStore>,
    custom: Arc<CustomWatchlist>,
    defaults: Vec<String>,
    current: Mutex<Vec<WatchlistItem>>,
}

impl WatchlistController {
    /// The in-memory list starts from the persisted snapshot.
    pub fn new(
        dispatcher: Arc<FetchDispatcher>,
        coordinator: LoadCoordinator,
        snapshots: Arc<SnapshotStore>,
        custom: Arc<CustomWatchlist>,
        defaults: Vec<String>,
    ) -> Self {
        let seeded = snapshots.load();
        Self {
            dispatcher,
            coordinator,
            snapshots,
            custom,
            defaults,
            current: Mutex::new(seeded),
        }
    }

    pub fn current(&self) -> Vec<WatchlistItem> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_custom(&self, raw: &str, name: Option<&str>) -> Result<bool> {
        self.custom.add(raw, name)
    }

    pub fn remove_custom(&self, raw: &str) -> Result<bool> {
        let removed = self.custom.remove(raw)?;
        if removed {
            let symbol = canonical_symbol(raw);
            self.current
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|item| item.symbol != symbol);
        }
        Ok(removed)
    }

    /// One refresh cycle.
    ///
    /// Previous state is the in-memory list merged with the stored snapshot.
    /// Provider rows come from account positions, defaults and custom symbols
    /// from the dispatcher. The fresh list keeps last-known values for
    /// anything that failed, and is persisted when it carries quote data.
    pub async fn refresh(&self, force: bool) -> Vec<WatchlistItem> {
        let pruned = self.dispatcher.quotes().prune_expired();
        if pruned > 0 {
            debug!("Pruned {pruned} expired quote cache entries");
        }

        let current = self.current();
        let snapshot = self.snapshots.load();
        let previous = merge(&[current.as_slice(), snapshot.as_slice()]);

        let provider = self.provider_items(force).await;

        let custom = self.custom.load();
        let mut symbols = self.defaults.clone();
        symbols.extend(custom.iter().map(|item| item.symbol.clone()));
        let quotes = self.dispatcher.fetch_many(&symbols, force).await;

        let defaults: Vec<WatchlistItem> = self
            .defaults
            .iter()
            .map(|symbol| quote_item(symbol, &quotes))
            .collect();
        let custom: Vec<WatchlistItem> = custom
            .iter()
            .map(|item| {
                let mut enriched = quote_item(&item.symbol, &quotes);
                if !item.name.trim().is_empty() {
                    enriched.name = item.name.clone();
                }
                enriched
            })
            .collect();

        let fresh = merge(&[provider.as_slice(), defaults.as_slice(), custom.as_slice()]);
        let merged = merge_with_previous(&fresh, &previous);

        if has_quote_data(&merged) {
            if let Err(err) = self.snapshots.save(&merged) {
                warn!("Failed to persist watchlist snapshot: {err}");
            }
        } else {
            debug!("Refresh produced no quote data, snapshot left untouched");
        }

        info!(
            "Watchlist refreshed: {} rows, {} priced",
            merged.len(),
            merged.iter().filter(|item| item.price.is_some()).count()
        );
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = merged.clone();
        merged
    }

    async fn provider_items(&self, force: bool) -> Vec<WatchlistItem> {
        let account = match self.coordinator.load(force).await {
            Ok(account) => Some(account),
            Err(err) => {
                debug!("Provider watchlist unavailable: {err}");
                self.coordinator.cached()
            }
        };
        account
            .map(|account| {
                account
                    .positions
                    .iter()
                    .map(WatchlistItem::from_position)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn quote_item(symbol: &str, quotes: &HashMap<String, Quote>) -> WatchlistItem {
    match quotes.get(&canonical_symbol(symbol)) {
        Some(quote) => WatchlistItem::from_quote(quote),
        None => WatchlistItem::new(symbol),
    }
}
