use std::sync::Arc;

use log::debug;

use crate::config::StooqSettings;
use crate::error::SourceError;

use super::decode::{parse_stooq_csv, stooq_symbol};
use super::quote::Quote;
use super::request::{HttpClient, HttpRequest};

/// Public batched quote feed.
pub struct StooqClient {
    endpoint: String,
    market_suffix: String,
    http: Arc<dyn HttpClient>,
}

impl StooqClient {
    pub fn new(settings: &StooqSettings, http: Arc<dyn HttpClient>) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            market_suffix: settings.market_suffix.clone(),
            http,
        }
    }

    /// Build the request URL for one batch of canonical symbols.
    pub fn batch_url(&self, symbols: &[String]) -> String {
        let joined = symbols
            .iter()
            .map(|symbol| stooq_symbol(symbol, &self.market_suffix))
            .collect::<Vec<_>>()
            .join("+");
        format!("{}?s={joined}&f=sd2t2ohlcv&h&e=csv", self.endpoint)
    }

    /// Issue a single call for `symbols`. Callers are responsible for batching.
    pub async fn fetch_batch(&self, symbols: &[String]) -> Result<Vec<Quote>, SourceError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .execute(HttpRequest::get(self.batch_url(symbols)))
            .await?;
        if !response.is_success() {
            return Err(SourceError::transport(format!(
                "stooq request for {} symbols failed with status {}",
                symbols.len(),
                response.status
            )));
        }

        let quotes = parse_stooq_csv(&response.body, &self.market_suffix);
        debug!(
            "stooq returned {} of {} requested quotes",
            quotes.len(),
            symbols.len()
        );
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fetch::request::{HttpMethod, HttpResponse, ScriptedHttpClient};

    #[test]
    fn builds_batch_url() {
        let http = Arc::new(ScriptedHttpClient::new());
        let client = StooqClient::new(&Config::builtin().stooq, http);
        let url = client.batch_url(&["AAPL".to_string(), "BRK.B".to_string()]);
        assert_eq!(
            url,
            "https://stooq.com/q/l/?s=aapl.us+brk-b.us&f=sd2t2ohlcv&h&e=csv"
        );
    }

    #[tokio::test]
    async fn fetches_and_parses_batch() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.respond(
            HttpMethod::Get,
            "stooq.com",
            HttpResponse::ok(
                "Symbol,Date,Time,Open,High,Low,Close,Volume\nAAPL.US,2024-05-01,22:00:09,100,101,99,101,10\n",
            ),
        );
        let client = StooqClient::new(&Config::builtin().stooq, http.clone());

        let quotes = client
            .fetch_batch(&["AAPL".to_string()])
            .await
            .expect("batch");
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "AAPL");
        assert!(client.fetch_batch(&[]).await.expect("empty").is_empty());
        assert_eq!(http.total_calls(), 1);
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.respond(HttpMethod::Get, "stooq.com", HttpResponse::new(503, ""));
        let client = StooqClient::new(&Config::builtin().stooq, http);

        let err = client
            .fetch_batch(&["AAPL".to_string()])
            .await
            .expect_err("503");
        assert!(matches!(err, SourceError::Transport(_)));
    }
}
