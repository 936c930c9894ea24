use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{AccessMode, Config, Credentials};
use crate::error::SourceError;
use crate::utils::symbol::canonical_symbol;
use crate::utils::time::Clock;

use super::quote::{Quote, QuoteSource};
use super::request::{HttpAuth, HttpClient, HttpRequest, HttpResponse};

const INSTRUMENTS_PATH: &str = "/equity/metadata/instruments";
const QUOTE_PATH: &str = "/equity/quote";
const SUMMARY_PATH: &str = "/equity/account/summary";
const POSITIONS_PATH: &str = "/equity/positions";

pub const MIN_BACKOFF: Duration = Duration::from_secs(20);
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// One entry of the tradable-instrument catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentMetadata {
    #[serde(rename = "ticker")]
    pub resolved_ticker: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuote {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "price", alias = "lastPrice")]
    current_price: Option<f64>,
    #[serde(default)]
    change: Option<f64>,
    #[serde(default, alias = "changePercent")]
    change_pct: Option<f64>,
    #[serde(default)]
    quantity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cash {
    pub available_to_trade: Option<f64>,
    pub blocked: Option<f64>,
    pub free: Option<f64>,
    pub invested: Option<f64>,
    pub payout: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investments {
    pub current_value: Option<f64>,
    pub unrealized_profit_loss: Option<f64>,
    pub realized_profit_loss: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub currency: Option<String>,
    pub total_value: Option<f64>,
    #[serde(default)]
    pub cash: Option<Cash>,
    #[serde(default)]
    pub investments: Option<Investments>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInstrument {
    #[serde(default)]
    pub ticker: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletImpact {
    pub current_value: Option<f64>,
    pub total_cost: Option<f64>,
    pub unrealized_profit_loss: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(default)]
    pub instrument: PositionInstrument,
    pub quantity: Option<f64>,
    pub current_price: Option<f64>,
    pub average_price_paid: Option<f64>,
    #[serde(default)]
    pub wallet_impact: Option<WalletImpact>,
}

impl Position {
    pub fn symbol(&self) -> String {
        canonical_symbol(&self.instrument.ticker)
    }

    pub fn display_name(&self) -> &str {
        self.instrument
            .name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.instrument.ticker)
    }

    /// Market value as reported by the broker, else quantity times price.
    pub fn market_value(&self) -> Option<f64> {
        self.wallet_impact
            .as_ref()
            .and_then(|impact| impact.current_value)
            .or_else(|| Some(self.quantity? * self.current_price?))
    }

    pub fn profit_loss(&self) -> Option<f64> {
        self.wallet_impact
            .as_ref()
            .and_then(|impact| impact.unrealized_profit_loss)
    }

    /// Unrealized P/L relative to cost, in percent.
    pub fn profit_loss_pct(&self) -> Option<f64> {
        let impact = self.wallet_impact.as_ref()?;
        let cost = impact.total_cost.filter(|cost| *cost != 0.0)?;
        Some(impact.unrealized_profit_loss? / cost * 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSort {
    #[default]
    Value,
    #[serde(alias = "pl")]
    ProfitLoss,
    Name,
}

/// Missing values always sort after present ones.
fn desc_missing_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn sort_positions(positions: &mut [Position], sort: PositionSort) {
    match sort {
        PositionSort::Value => {
            positions.sort_by(|a, b| desc_missing_last(a.market_value(), b.market_value()))
        }
        PositionSort::ProfitLoss => {
            positions.sort_by(|a, b| desc_missing_last(a.profit_loss(), b.profit_loss()))
        }
        PositionSort::Name => positions.sort_by(|a, b| {
            a.display_name()
                .to_lowercase()
                .cmp(&b.display_name().to_lowercase())
        }),
    }
}

/// Derive the backoff window from a 429 response.
///
/// `Retry-After` is read as seconds. `X-RateLimit-Reset` is read as an epoch
/// timestamp in seconds when large, else as a relative number of seconds.
/// The result is clamped to `[MIN_BACKOFF, MAX_BACKOFF]`.
pub fn backoff_from_headers(response: &HttpResponse, now_ms: i64) -> Duration {
    let parse = |name: &str| {
        response
            .header(name)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
    };

    let hinted_ms = parse("retry-after")
        .map(|seconds| seconds * 1000.0)
        .or_else(|| {
            parse("x-ratelimit-reset").map(|reset| {
                if reset > 1e9 {
                    reset * 1000.0 - now_ms as f64
                } else {
                    reset * 1000.0
                }
            })
        });

    match hinted_ms {
        Some(ms) if ms > 0.0 => Duration::from_millis(ms as u64).clamp(MIN_BACKOFF, MAX_BACKOFF),
        _ => MIN_BACKOFF,
    }
}

fn error_message(response: &HttpResponse) -> String {
    serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {}", response.status))
}

/// Authenticated broker API client.
pub struct BrokerClient {
    base_url: String,
    access_mode: AccessMode,
    credentials: Option<Credentials>,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
}

impl BrokerClient {
    pub fn new(config: &Config, http: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            base_url: config.broker_base_url(),
            access_mode: config.access_mode,
            credentials: config.credentials.clone(),
            http,
            clock,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Per-ticker quotes are only reachable through the proxy.
    pub fn supports_quotes(&self) -> bool {
        self.access_mode == AccessMode::Proxy
    }

    pub async fn instruments(&self) -> Result<Vec<InstrumentMetadata>, SourceError> {
        let request = HttpRequest::get(self.url(INSTRUMENTS_PATH));
        self.send_json(request, INSTRUMENTS_PATH).await
    }

    /// Fetch one quote for a qualified ticker. A response without a price is `Incomplete`.
    pub async fn quote(&self, ticker: &str) -> Result<Quote, SourceError> {
        let body = json!({ "ticker": ticker }).to_string();
        let request = HttpRequest::post(self.url(QUOTE_PATH)).with_json_body(body);
        let raw: RawQuote = self.send_json(request, QUOTE_PATH).await?;

        let Some(price) = raw.current_price else {
            return Err(SourceError::incomplete(format!("no price for {ticker}")));
        };

        let mut quote = Quote::new(canonical_symbol(ticker), ticker, QuoteSource::Primary);
        quote.name = raw.name.filter(|name| !name.trim().is_empty());
        quote.current_price = Some(price);
        quote.change = raw.change;
        quote.change_pct = raw.change_pct;
        quote.quantity = raw.quantity;
        Ok(quote)
    }

    pub async fn account_summary(&self) -> Result<AccountSummary, SourceError> {
        let request = HttpRequest::get(self.url(SUMMARY_PATH));
        self.send_json(request, SUMMARY_PATH).await
    }

    pub async fn positions(&self) -> Result<Vec<Position>, SourceError> {
        let request = HttpRequest::get(self.url(POSITIONS_PATH));
        self.send_json(request, POSITIONS_PATH).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: HttpRequest) -> Result<HttpRequest, SourceError> {
        match self.access_mode {
            AccessMode::Proxy => Ok(request),
            AccessMode::Direct => {
                let credentials = self.credentials.as_ref().ok_or_else(|| {
                    SourceError::unauthorized("API key and secret are not configured")
                })?;
                Ok(request.with_auth(HttpAuth::Basic {
                    username: credentials.api_key.clone(),
                    password: credentials.api_secret.clone(),
                }))
            }
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        path: &str,
    ) -> Result<T, SourceError> {
        let request = self.authorize(request)?;
        let response = self.http.execute(request).await?;
        debug!("broker {path} answered {}", response.status);

        match response.status {
            status if (200..300).contains(&status) => serde_json::from_str(&response.body)
                .map_err(|err| SourceError::transport(format!("invalid JSON from {path}: {err}"))),
            401 | 403 => Err(SourceError::unauthorized(error_message(&response))),
            404 => Err(SourceError::not_found(error_message(&response))),
            429 => Err(SourceError::rate_limited(backoff_from_headers(
                &response,
                self.clock.now_ms(),
            ))),
            _ => Err(SourceError::transport(error_message(&response))),
        }
    }
}
