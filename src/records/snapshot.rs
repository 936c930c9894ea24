use std::sync::Arc;

use log::{debug, warn};

use crate::error::Result;
use crate::fetch::SNAPSHOT_CAP;
use crate::storage::{load_value, save_value, KeyValueStore, CUSTOM_WATCHLIST_KEY, SNAPSHOT_KEY};
use crate::utils::symbol::canonical_symbol;

use super::watchlist::{has_quote_data, WatchlistItem};

/// Durable copy of the last good merged watchlist.
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
    cap: usize,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_cap(store, SNAPSHOT_CAP)
    }

    pub fn with_cap(store: Arc<dyn KeyValueStore>, cap: usize) -> Self {
        Self { store, cap }
    }

    /// Stored snapshot, or an empty list when absent or unreadable.
    pub fn load(&self) -> Vec<WatchlistItem> {
        match load_value::<Vec<WatchlistItem>>(self.store.as_ref(), SNAPSHOT_KEY) {
            Ok(items) => items.unwrap_or_default(),
            Err(err) => {
                warn!("Failed to load watchlist snapshot: {err}");
                Vec::new()
            }
        }
    }

    /// Persist `items` truncated to the cap. Lists without any quote data are
    /// skipped so a failed refresh cannot overwrite a good snapshot.
    pub fn save(&self, items: &[WatchlistItem]) -> Result<bool> {
        if !has_quote_data(items) {
            debug!("Skipping snapshot save, no quote data in {} items", items.len());
            return Ok(false);
        }
        let capped = &items[..items.len().min(self.cap)];
        save_value(self.store.as_ref(), SNAPSHOT_KEY, &capped)?;
        Ok(true)
    }
}

/// User-added watchlist symbols.
pub struct CustomWatchlist {
    store: Arc<dyn KeyValueStore>,
}

impl CustomWatchlist {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Vec<WatchlistItem> {
        match load_value::<Vec<WatchlistItem>>(self.store.as_ref(), CUSTOM_WATCHLIST_KEY) {
            Ok(items) => items.unwrap_or_default(),
            Err(err) => {
                warn!("Failed to load custom watchlist: {err}");
                Vec::new()
            }
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.load().into_iter().map(|item| item.symbol).collect()
    }

    /// Add `raw` under its canonical symbol. Returns false if it was already present.
    pub fn add(&self, raw: &str, name: Option<&str>) -> Result<bool> {
        let symbol = canonical_symbol(raw);
        if symbol.is_empty() {
            return Ok(false);
        }
        let mut items = self.load();
        if items.iter().any(|item| canonical_symbol(&item.symbol) == symbol) {
            return Ok(false);
        }
        let mut item = WatchlistItem::new(&symbol);
        item.name = name.unwrap_or_default().trim().to_string();
        items.push(item);
        save_value(self.store.as_ref(), CUSTOM_WATCHLIST_KEY, &items)?;
        Ok(true)
    }

    /// Remove `raw`. Returns false if it was not present.
    pub fn remove(&self, raw: &str) -> Result<bool> {
        let symbol = canonical_symbol(raw);
        let mut items = self.load();
        let before = items.len();
        items.retain(|item| canonical_symbol(&item.symbol) != symbol);
        if items.len() == before {
            return Ok(false);
        }
        save_value(self.store.as_ref(), CUSTOM_WATCHLIST_KEY, &items)?;
        Ok(true)
    }
}
