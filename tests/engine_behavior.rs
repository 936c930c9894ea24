use std::sync::Arc;
use std::time::Duration;

use quotewatch::app::Engine;
use quotewatch::config::{AccessMode, Config};
use quotewatch::fetch::decode::parse_stooq_csv;
use quotewatch::fetch::{
    HttpMethod, HttpResponse, QuoteSource, ScriptedHttpClient, PRIMARY_CONCURRENCY_LIMIT,
};
use quotewatch::records::{merge_with_previous, SnapshotStore, WatchlistItem};
use quotewatch::storage::{load_value, KeyValueStore, MemoryStore, QUOTE_RATE_LIMIT_KEY};
use quotewatch::utils::time::ManualClock;

const CATALOG: &str = r#"[
    {"ticker": "AAPL_US_EQ", "name": "Apple Inc"},
    {"ticker": "MSFT_US_EQ", "name": "Microsoft"},
    {"ticker": "NVDA_US_EQ", "name": "NVIDIA"},
    {"ticker": "MP_US_EQ", "name": "MP Materials"}
]"#;
const QUOTE: &str = r#"{"currentPrice": 42.0, "change": 1.0, "changePct": 2.4}"#;
const SUMMARY: &str = r#"{"currency": "USD", "totalValue": 1000.0}"#;
const POSITIONS: &str =
    r#"[{"instrument": {"ticker": "NVDA_US_EQ", "name": "NVIDIA"}, "quantity": 1, "currentPrice": 120.0}]"#;
const STOOQ_CSV: &str = "Symbol,Date,Time,Open,High,Low,Close,Volume
AAPL.US,2024-05-01,22:00:00,100,103,99,102,1000
MSFT.US,2024-05-01,22:00:00,400,405,398,404,2000
NVDA.US,2024-05-01,22:00:00,120,121,118,119,3000
";

struct Harness {
    http: Arc<ScriptedHttpClient>,
    clock: Arc<ManualClock>,
    store: Arc<dyn KeyValueStore>,
    engine: Engine,
}

fn config(mode: AccessMode, concurrency: usize) -> Config {
    let mut config = Config::builtin();
    config.access_mode = mode;
    config.fetch.concurrency = concurrency;
    config.default_watchlist = vec!["AAPL".to_string(), "MSFT".to_string()];
    config
}

fn harness(config: Config, http: ScriptedHttpClient) -> Harness {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    harness_with_store(config, http, store)
}

fn harness_with_store(
    config: Config,
    http: ScriptedHttpClient,
    store: Arc<dyn KeyValueStore>,
) -> Harness {
    let http = Arc::new(http);
    let clock = Arc::new(ManualClock::new(0));
    let engine = Engine::new(config, http.clone(), Arc::clone(&store), clock.clone());
    Harness {
        http,
        clock,
        store,
        engine,
    }
}

fn broker_routes(http: &ScriptedHttpClient) {
    http.respond(
        HttpMethod::Get,
        "/equity/metadata/instruments",
        HttpResponse::ok(CATALOG),
    );
    http.respond(HttpMethod::Post, "/equity/quote", HttpResponse::ok(QUOTE));
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|symbol| symbol.to_string()).collect()
}

#[tokio::test]
async fn qualified_input_resolves_to_itself_without_network() {
    let h = harness(config(AccessMode::Proxy, 4), ScriptedHttpClient::new());

    let first = h.engine.resolver().resolve("AAPL_US_EQ").await.expect("resolve");
    let again = h.engine.resolver().resolve(&first.ticker).await.expect("resolve");

    assert_eq!(first.ticker, "AAPL_US_EQ");
    assert_eq!(first, again);
    assert_eq!(h.http.total_calls(), 0);
}

#[tokio::test]
async fn fresh_cache_serves_quotes_without_network() {
    let http = ScriptedHttpClient::new();
    broker_routes(&http);
    let h = harness(config(AccessMode::Proxy, 4), http);
    let tickers = symbols(&["AAPL", "msft"]);

    let first = h.engine.dispatcher().fetch_many(&tickers, false).await;
    assert_eq!(first.len(), 2);
    assert_eq!(first["AAPL"].source, QuoteSource::Primary);
    assert_eq!(first["MSFT"].name.as_deref(), Some("Microsoft"));
    let calls = h.http.total_calls();

    h.clock.advance_ms(4_999);
    let second = h.engine.dispatcher().fetch_many(&tickers, false).await;
    assert_eq!(second, first);
    assert_eq!(h.http.total_calls(), calls);

    h.clock.advance_ms(1);
    h.engine.dispatcher().fetch_many(&tickers, false).await;
    assert_eq!(h.http.calls_to("/equity/quote"), 4);
}

#[tokio::test]
async fn rate_limited_primary_falls_back_to_secondary() {
    let http = ScriptedHttpClient::new();
    http.respond(
        HttpMethod::Get,
        "/equity/metadata/instruments",
        HttpResponse::ok(CATALOG),
    );
    http.respond(
        HttpMethod::Post,
        "/equity/quote",
        HttpResponse::new(429, "").with_header("Retry-After", "60"),
    );
    http.respond(HttpMethod::Get, "stooq.com", HttpResponse::ok(STOOQ_CSV));
    let h = harness(config(AccessMode::Proxy, 1), http);
    let tickers = symbols(&["AAPL", "MSFT", "NVDA"]);

    let quotes = h.engine.dispatcher().fetch_many(&tickers, false).await;
    assert_eq!(quotes.len(), 3);
    assert!(quotes.values().all(|quote| quote.source == QuoteSource::Secondary));
    assert_eq!(h.http.calls_to("/equity/quote"), 1);
    assert_eq!(h.http.calls_to("stooq.com"), 1);

    let blocked: Option<i64> =
        load_value(h.store.as_ref(), QUOTE_RATE_LIMIT_KEY).expect("persisted gate");
    assert_eq!(blocked, Some(60_000));

    h.clock.advance_ms(30_000);
    let quotes = h.engine.dispatcher().fetch_many(&tickers, true).await;
    assert_eq!(quotes.len(), 3);
    assert_eq!(h.http.calls_to("/equity/quote"), 1);
    assert_eq!(h.http.calls_to("stooq.com"), 2);
}

#[tokio::test]
async fn rate_limit_abandons_queued_primary_work() {
    let http = ScriptedHttpClient::new().with_latency(Duration::from_millis(5));
    http.respond(
        HttpMethod::Get,
        "/equity/metadata/instruments",
        HttpResponse::ok(CATALOG),
    );
    http.respond(
        HttpMethod::Post,
        "/equity/quote",
        HttpResponse::new(429, "").with_header("x-ratelimit-reset", "30"),
    );
    http.respond(HttpMethod::Get, "stooq.com", HttpResponse::ok(STOOQ_CSV));
    let h = harness(config(AccessMode::Proxy, 2), http);

    let tickers = symbols(&["AAPL", "MSFT", "NVDA", "TSLA", "SPY", "AMD"]);
    let quotes = h.engine.dispatcher().fetch_many(&tickers, false).await;

    assert!(h.http.calls_to("/equity/quote") <= 2);
    assert_eq!(h.http.calls_to("stooq.com"), 1);
    assert_eq!(quotes.len(), 3);
    assert_eq!(
        h.engine.quotes().primary_gate().remaining(),
        Some(Duration::from_secs(30))
    );
}

#[tokio::test]
async fn rate_limited_catalog_stops_primary_work() {
    let http = ScriptedHttpClient::new();
    http.respond(
        HttpMethod::Get,
        "/equity/metadata/instruments",
        HttpResponse::new(429, "").with_header("retry-after", "60"),
    );
    http.respond(HttpMethod::Post, "/equity/quote", HttpResponse::ok(QUOTE));
    http.respond(HttpMethod::Get, "stooq.com", HttpResponse::ok(STOOQ_CSV));
    let h = harness(config(AccessMode::Proxy, 4), http);

    let tickers = symbols(&[
        "AAPL", "MSFT", "NVDA", "TSLA", "SPY", "AMD", "META", "AMZN", "GOOG", "NFLX",
    ]);
    let quotes = h.engine.dispatcher().fetch_many(&tickers, false).await;

    assert_eq!(h.http.calls_to("/equity/metadata/instruments"), 1);
    assert_eq!(h.http.calls_to("/equity/quote"), 0);
    assert_eq!(h.http.calls_to("stooq.com"), 1);
    assert_eq!(quotes.len(), 3);
    let gate = h.engine.quotes().primary_gate();
    assert!(gate.is_blocked());
    assert_eq!(gate.remaining(), Some(Duration::from_secs(60)));
}

#[tokio::test]
async fn primary_workers_never_exceed_the_concurrency_limit() {
    let http = ScriptedHttpClient::new().with_latency(Duration::from_millis(20));
    http.respond(HttpMethod::Post, "/equity/quote", HttpResponse::ok(QUOTE));
    let h = harness(config(AccessMode::Proxy, 10), http);

    let tickers: Vec<String> = (0..10).map(|i| format!("T{i}_US_EQ")).collect();
    let quotes = h.engine.dispatcher().fetch_many(&tickers, false).await;

    assert_eq!(quotes.len(), 10);
    assert_eq!(h.http.calls_to("/equity/quote"), 10);
    assert_eq!(h.http.peak_in_flight(), PRIMARY_CONCURRENCY_LIMIT);
}

#[tokio::test]
async fn refresh_prunes_expired_quote_cache_entries() {
    let http = ScriptedHttpClient::new();
    broker_routes(&http);
    let mut config = config(AccessMode::Proxy, 4);
    config.default_watchlist = Vec::new();
    let h = harness(config, http);

    h.engine
        .dispatcher()
        .fetch_many(&symbols(&["AAPL", "MSFT"]), false)
        .await;
    assert!(!h.engine.quotes().primary_cache().is_empty());

    h.clock.advance_ms(5_000);
    h.engine.watchlist().refresh(false).await;
    assert!(h.engine.quotes().primary_cache().is_empty());
}

#[tokio::test]
async fn restart_inside_backoff_window_stays_gated() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let http = ScriptedHttpClient::new();
    http.respond(
        HttpMethod::Get,
        "/equity/metadata/instruments",
        HttpResponse::ok(CATALOG),
    );
    http.respond(
        HttpMethod::Post,
        "/equity/quote",
        HttpResponse::new(429, "").with_header("Retry-After", "120"),
    );
    http.respond(HttpMethod::Get, "stooq.com", HttpResponse::ok(STOOQ_CSV));
    let first = harness_with_store(config(AccessMode::Proxy, 1), http, Arc::clone(&store));
    first
        .engine
        .dispatcher()
        .fetch_many(&symbols(&["AAPL"]), false)
        .await;
    assert_eq!(first.http.calls_to("/equity/quote"), 1);

    let http = ScriptedHttpClient::new();
    broker_routes(&http);
    http.respond(HttpMethod::Get, "stooq.com", HttpResponse::ok(STOOQ_CSV));
    let restarted = harness_with_store(config(AccessMode::Proxy, 1), http, store);

    assert!(restarted.engine.quotes().primary_gate().is_blocked());
    let quotes = restarted
        .engine
        .dispatcher()
        .fetch_many(&symbols(&["AAPL"]), false)
        .await;
    assert_eq!(quotes["AAPL"].source, QuoteSource::Secondary);
    assert_eq!(restarted.http.calls_to("/equity/quote"), 0);
}

#[tokio::test]
async fn secondary_batches_twenty_five_symbols_per_call() {
    let http = ScriptedHttpClient::new();
    http.respond(HttpMethod::Get, "stooq.com", HttpResponse::ok(STOOQ_CSV));
    let h = harness(config(AccessMode::Direct, 4), http);

    let tickers: Vec<String> = (0..30).map(|i| format!("T{i:02}")).collect();
    h.engine.quotes().get_quotes(&tickers, false).await;

    let requests = h.http.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url.matches(".us").count(), 25);
    assert_eq!(requests[1].url.matches(".us").count(), 5);
}

#[tokio::test]
async fn renamed_ticker_is_looked_up_under_its_alias() {
    let http = ScriptedHttpClient::new();
    broker_routes(&http);
    let h = harness(config(AccessMode::Proxy, 4), http);

    let quote = h.engine.lookup("fvac", false).await.expect("quote");
    assert_eq!(quote.symbol, "MP");
    assert_eq!(quote.resolved_ticker, "MP_US_EQ");
    assert_eq!(quote.alias_from.as_deref(), Some("FVAC"));
    assert_eq!(quote.name.as_deref(), Some("MP Materials"));

    let requests = h.http.requests();
    let body = requests
        .iter()
        .find(|request| request.url.ends_with("/equity/quote"))
        .and_then(|request| request.body.clone())
        .expect("quote request");
    assert!(body.contains("MP_US_EQ"));

    assert!(h.engine.watchlist().add_custom("FVAC", None).expect("add"));
    assert!(!h.engine.watchlist().add_custom("mp", None).expect("dedupe"));
    assert!(h.engine.watchlist().remove_custom("fvac").expect("remove"));
    assert!(!h.engine.watchlist().remove_custom("MP").expect("already gone"));
}

#[tokio::test]
async fn concurrent_account_loads_share_one_round_trip() {
    let http = ScriptedHttpClient::new().with_latency(Duration::from_millis(20));
    http.respond(HttpMethod::Get, "/account/summary", HttpResponse::ok(SUMMARY));
    http.respond(HttpMethod::Get, "/positions", HttpResponse::ok(POSITIONS));
    let h = harness(config(AccessMode::Proxy, 4), http);
    let coordinator = h.engine.coordinator();

    let (a, b, c) = tokio::join!(
        coordinator.load(false),
        coordinator.load(false),
        coordinator.load(false)
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(h.http.calls_to("/account/summary"), 1);
    assert_eq!(h.http.calls_to("/positions"), 1);
}

#[tokio::test]
async fn refresh_keeps_last_known_values_when_sources_fail() {
    let http = ScriptedHttpClient::new();
    http.enqueue(HttpMethod::Get, "stooq.com", HttpResponse::ok(STOOQ_CSV));
    http.respond(HttpMethod::Get, "stooq.com", HttpResponse::new(503, ""));
    let h = harness(config(AccessMode::Direct, 4), http);

    let first = h.engine.watchlist().refresh(false).await;
    let symbols: Vec<&str> = first.iter().map(|item| item.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    assert_eq!(first[0].price, Some(102.0));
    assert_eq!(first[1].change, Some(4.0));

    h.clock.advance_ms(10_000);
    let second = h.engine.watchlist().refresh(false).await;
    assert_eq!(h.http.calls_to("stooq.com"), 2);
    assert_eq!(second, first);

    let snapshot = SnapshotStore::new(Arc::clone(&h.store)).load();
    assert_eq!(snapshot, first);
}

#[tokio::test]
async fn provider_positions_lead_the_merged_watchlist() {
    let http = ScriptedHttpClient::new();
    broker_routes(&http);
    http.respond(HttpMethod::Get, "/account/summary", HttpResponse::ok(SUMMARY));
    http.respond(HttpMethod::Get, "/positions", HttpResponse::ok(POSITIONS));
    let h = harness(config(AccessMode::Proxy, 4), http);
    h.engine.watchlist().add_custom("FVAC", None).expect("add");

    let items = h.engine.watchlist().refresh(false).await;
    let symbols: Vec<&str> = items.iter().map(|item| item.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["NVDA", "AAPL", "MSFT", "MP"]);
    assert_eq!(items[0].price, Some(120.0));
    assert_eq!(items[3].name, "MP Materials");
    assert_eq!(items[3].price, Some(42.0));
}

#[test]
fn merge_never_replaces_a_known_value_with_null() {
    let mut previous = WatchlistItem::new("AAPL");
    previous.price = Some(190.0);
    previous.change_pct = Some(0.4);
    let mut next = WatchlistItem::new("AAPL");
    next.change = Some(1.2);

    let merged = merge_with_previous(&[next], &[previous]);
    assert_eq!(merged[0].price, Some(190.0));
    assert_eq!(merged[0].change, Some(1.2));
    assert_eq!(merged[0].change_pct, Some(0.4));
}

#[test]
fn snapshot_round_trip_is_capped() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let snapshots = SnapshotStore::new(Arc::clone(&store));
    let items: Vec<WatchlistItem> = (0..350)
        .map(|i| {
            let mut item = WatchlistItem::new(format!("S{i}"));
            item.price = Some(i as f64);
            item
        })
        .collect();

    assert!(snapshots.save(&items).expect("save"));
    let loaded = snapshots.load();
    assert_eq!(loaded.len(), 300);
    assert_eq!(loaded[..], items[..300]);

    let unpriced = vec![WatchlistItem::new("AAPL")];
    assert!(!snapshots.save(&unpriced).expect("skip"));
    assert_eq!(snapshots.load().len(), 300);
}

#[test]
fn csv_rows_without_data_are_dropped() {
    let body = "Symbol,Date,Time,Open,High,Low,Close,Volume
AAPL.US,2024-05-01,22:00:00,N/D,N/D,N/D,190.5,N/D
ZZZZ.US,N/D,N/D,N/D,N/D,N/D,N/D,N/D
BRK-B.US,2024-05-01,22:00:00,400,405,398,404,2000
";
    let quotes = parse_stooq_csv(body, ".us");

    assert_eq!(quotes.len(), 2);
    assert_eq!(quotes[0].symbol, "AAPL");
    assert_eq!(quotes[0].current_price, Some(190.5));
    assert_eq!(quotes[0].change, None);
    assert_eq!(quotes[0].change_pct, None);
    assert_eq!(quotes[1].symbol, "BRK.B");
    assert_eq!(quotes[1].change, Some(4.0));
}
