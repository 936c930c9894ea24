use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    /// Authenticated broker endpoint, one ticker per call.
    Primary,
    /// Public batched CSV feed.
    Secondary,
}

/// Canonical quote shared by both upstream sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub resolved_ticker: String,
    pub name: Option<String>,
    pub current_price: Option<f64>,
    pub change: Option<f64>,
    pub change_pct: Option<f64>,
    pub quantity: Option<f64>,
    pub source: QuoteSource,
    pub source_timestamp: Option<NaiveDateTime>,
    /// Raw input that was rewritten through the alias table, if any.
    pub alias_from: Option<String>,
}

impl Quote {
    pub fn new(symbol: impl Into<String>, resolved_ticker: impl Into<String>, source: QuoteSource) -> Self {
        Self {
            symbol: symbol.into(),
            resolved_ticker: resolved_ticker.into(),
            name: None,
            current_price: None,
            change: None,
            change_pct: None,
            quantity: None,
            source,
            source_timestamp: None,
            alias_from: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_price.is_some()
    }
}
