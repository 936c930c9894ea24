use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::app::coordinator::AccountSnapshot;
use crate::app::state::Engine;
use crate::config::{load_or_builtin, validate_config, ConfigWatcher};
use crate::error::Result;
use crate::fetch::{sort_positions, PositionSort};
use crate::records::WatchlistItem;
use crate::utils::time::format_local_ms;

const CONFIG_ENV: &str = "QUOTEWATCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "quotewatch.json";

/// Entry point used by `main`: one refresh, then periodic refreshes while
/// `autoRefreshSeconds` is non-zero. A changed configuration rebuilds the engine.
pub async fn run() -> Result<()> {
    let path = std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load_or_builtin(&path)?;
    validate_config(&config)?;

    let watcher = Arc::new(ConfigWatcher::new(&path, config.clone()));
    if let Err(err) = watcher.start_watching() {
        warn!("Configuration changes will not be picked up: {err}");
    }
    let mut updates = watcher.subscribe();

    let mut engine = Engine::from_config(config);
    loop {
        refresh_once(&engine, false).await;

        let interval = engine.config().auto_refresh_seconds;
        if interval == 0 {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            changed = updates.changed() => {
                if changed.is_ok() {
                    let next = (**updates.borrow_and_update()).clone();
                    info!("Applying updated configuration");
                    engine = Engine::from_config(next);
                }
            }
        }
    }
}

async fn refresh_once(engine: &Engine, force: bool) {
    let items = engine.watchlist().refresh(force).await;
    println!("{}", render_watchlist(&items));

    match engine.coordinator().load(force).await {
        Ok(account) => println!("{}", render_account(account, PositionSort::default())),
        Err(err) => info!("Account unavailable: {err}"),
    }
}

fn format_number(value: Option<f64>, suffix: &str) -> String {
    value
        .map(|value| format!("{value:.2}{suffix}"))
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_watchlist(items: &[WatchlistItem]) -> String {
    let mut lines = vec![format!(
        "{:<10} {:<28} {:>12} {:>10} {:>9}",
        "Symbol", "Name", "Price", "Change", "Chg%"
    )];
    for item in items {
        lines.push(format!(
            "{:<10} {:<28} {:>12} {:>10} {:>9}",
            item.symbol,
            truncate(&item.name, 28),
            format_number(item.price, ""),
            format_number(item.change, ""),
            format_number(item.change_pct, "%"),
        ));
    }
    lines.join("\n")
}

pub fn render_account(mut account: AccountSnapshot, sort: PositionSort) -> String {
    sort_positions(&mut account.positions, sort);

    let currency = account.summary.currency.as_deref().unwrap_or("");
    let mut lines = vec![format!(
        "Account value {} {} (as of {})",
        format_number(account.summary.total_value, ""),
        currency,
        format_local_ms(account.fetched_at_ms)
    )];
    for position in &account.positions {
        lines.push(format!(
            "{:<10} {:<28} {:>12} {:>10} {:>9}",
            position.symbol(),
            truncate(position.display_name(), 28),
            format_number(position.market_value(), ""),
            format_number(position.profit_loss(), ""),
            format_number(position.profit_loss_pct(), "%"),
        ));
    }
    lines.join("\n")
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(width.saturating_sub(1)).collect();
    cut.push('~');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{AccountSummary, Position, PositionInstrument, WalletImpact};

    #[test]
    fn watchlist_rows_show_dash_for_missing_values() {
        let mut item = WatchlistItem::new("aapl");
        item.name = "Apple".to_string();
        item.price = Some(190.5);

        let rendered = render_watchlist(&[item]);
        let row = rendered.lines().nth(1).expect("row");
        assert!(row.starts_with("AAPL"));
        assert!(row.contains("190.50"));
        assert!(row.trim_end().ends_with('-'));
    }

    #[test]
    fn account_positions_are_sorted_by_value() {
        let position = |ticker: &str, value: f64| Position {
            instrument: PositionInstrument {
                ticker: ticker.to_string(),
                name: None,
            },
            wallet_impact: Some(WalletImpact {
                current_value: Some(value),
                ..WalletImpact::default()
            }),
            ..Position::default()
        };
        let account = AccountSnapshot {
            summary: AccountSummary::default(),
            positions: vec![position("MSFT_US_EQ", 10.0), position("AAPL_US_EQ", 50.0)],
            fetched_at_ms: 0,
        };

        let rendered = render_account(account, PositionSort::Value);
        let symbols: Vec<&str> = rendered
            .lines()
            .skip(1)
            .filter_map(|line| line.split_whitespace().next())
            .collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("abcdef", 4), "abc~");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
