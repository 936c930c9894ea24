use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::fetch::{Position, Quote};
use crate::utils::symbol::canonical_symbol;

/// One display row of the merged watchlist. Identity is the canonical symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistItem {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub change: Option<f64>,
    #[serde(default)]
    pub change_pct: Option<f64>,
}

impl WatchlistItem {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self {
            symbol: canonical_symbol(symbol.as_ref()),
            ..Self::default()
        }
    }

    pub fn from_quote(quote: &Quote) -> Self {
        Self {
            symbol: canonical_symbol(&quote.symbol),
            name: quote.name.clone().unwrap_or_default(),
            price: quote.current_price,
            change: quote.change,
            change_pct: quote.change_pct,
        }
    }

    pub fn from_position(position: &Position) -> Self {
        let name = position
            .instrument
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_default();
        Self {
            symbol: position.symbol(),
            name,
            price: position.current_price,
            change: None,
            change_pct: None,
        }
    }

    pub fn has_quote_data(&self) -> bool {
        self.price.is_some() || self.change.is_some() || self.change_pct.is_some()
    }

    /// Fill null fields from `other` without touching non-null ones.
    fn absorb(&mut self, other: &WatchlistItem) {
        if self.name.trim().is_empty() && !other.name.trim().is_empty() {
            self.name = other.name.clone();
        }
        self.price = self.price.or(other.price);
        self.change = self.change.or(other.change);
        self.change_pct = self.change_pct.or(other.change_pct);
    }
}

/// Dedupe `lists` by canonical symbol, keeping first-occurrence order.
///
/// The first non-empty name seen for a symbol sticks. Null numeric fields are
/// filled from later occurrences but a non-null value is never replaced.
pub fn merge(lists: &[&[WatchlistItem]]) -> Vec<WatchlistItem> {
    let mut merged: Vec<WatchlistItem> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in lists.iter().flat_map(|list| list.iter()) {
        let symbol = canonical_symbol(&item.symbol);
        if symbol.is_empty() {
            continue;
        }
        match index.get(&symbol) {
            Some(&position) => merged[position].absorb(item),
            None => {
                let mut item = item.clone();
                item.symbol = symbol.clone();
                index.insert(symbol, merged.len());
                merged.push(item);
            }
        }
    }
    merged
}

/// Carry last-known-good values from `previous` into `next`.
///
/// Only items present in `next` are returned; numeric fields that are null in
/// `next` take the previous value when it is non-null.
pub fn merge_with_previous(
    next: &[WatchlistItem],
    previous: &[WatchlistItem],
) -> Vec<WatchlistItem> {
    let by_symbol: HashMap<String, &WatchlistItem> = previous
        .iter()
        .map(|item| (canonical_symbol(&item.symbol), item))
        .collect();

    next.iter()
        .map(|item| {
            let mut item = item.clone();
            if let Some(prior) = by_symbol.get(&canonical_symbol(&item.symbol)) {
                item.absorb(prior);
            }
            item
        })
        .collect()
}

pub fn has_quote_data(items: &[WatchlistItem]) -> bool {
    items.iter().any(WatchlistItem::has_quote_data)
}
