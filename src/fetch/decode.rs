use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::debug;
use serde::Deserialize;

use super::quote::{Quote, QuoteSource};

/// Stooq's marker for a field with no data.
const NO_DATA: &str = "N/D";

#[derive(Debug, Deserialize)]
struct StooqRow {
    #[serde(rename = "Symbol")]
    symbol: String,
    #[serde(rename = "Date", default)]
    date: Option<String>,
    #[serde(rename = "Time", default)]
    time: Option<String>,
    #[serde(rename = "Open", default)]
    open: Option<String>,
    #[serde(rename = "Close", default)]
    close: Option<String>,
}

/// Parse a Stooq `sd2t2ohlcv` CSV body into quotes.
///
/// Rows whose close is missing, `N/D` or non-numeric are dropped. `change` is
/// only set when both open and close are numeric, and `change_pct` also needs
/// a non-zero open. `market_suffix` (e.g. `.us`) is stripped from the symbol
/// column and `-` is mapped back to `.` to recover the canonical ticker.
pub fn parse_stooq_csv(body: &str, market_suffix: &str) -> Vec<Quote> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut quotes = Vec::new();
    for record in reader.deserialize::<StooqRow>() {
        let row = match record {
            Ok(row) => row,
            Err(err) => {
                debug!("Skipping malformed stooq row: {err}");
                continue;
            }
        };

        let Some(close) = row.close.as_deref().and_then(parse_f64) else {
            debug!("Skipping stooq row without close for {}", row.symbol);
            continue;
        };
        let open = row.open.as_deref().and_then(parse_f64);

        let symbol = canonical_from_stooq(&row.symbol, market_suffix);
        let mut quote = Quote::new(symbol.clone(), symbol, QuoteSource::Secondary);
        quote.current_price = Some(close);
        if let Some(open) = open {
            let change = close - open;
            quote.change = Some(change);
            if open != 0.0 {
                quote.change_pct = Some(change / open * 100.0);
            }
        }
        quote.source_timestamp = parse_timestamp(row.date.as_deref(), row.time.as_deref());
        quotes.push(quote);
    }
    quotes
}

/// `brk-b.us` becomes `BRK.B`.
pub fn canonical_from_stooq(raw: &str, market_suffix: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let suffix = market_suffix.to_uppercase();
    let stripped = upper.strip_suffix(suffix.as_str()).unwrap_or(&upper);
    stripped.replace('-', ".")
}

/// `BRK.B` becomes `brk-b.us`.
pub fn stooq_symbol(symbol: &str, market_suffix: &str) -> String {
    format!("{}{}", symbol.to_lowercase().replace('.', "-"), market_suffix)
}

pub fn parse_f64(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NO_DATA) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_timestamp(date: Option<&str>, time: Option<&str>) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date?.trim(), "%Y-%m-%d").ok()?;
    match time.and_then(|value| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S").ok()) {
        Some(time) => Some(date.and_time(time)),
        None => date.and_hms_opt(0, 0, 0),
    }
}
