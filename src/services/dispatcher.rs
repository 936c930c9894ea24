use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use log::{debug, info, warn};

use crate::error::SourceError;
use crate::fetch::{ensure_concurrency_limit, Quote};
use crate::utils::symbol::{canonical_symbol, normalize_input};

use super::quotes::QuoteService;

/// Shared queue drained by primary workers.
///
/// Once cancelled, `pop` yields nothing and the remaining tickers are abandoned
/// for this cycle.
pub struct WorkQueue {
    items: Mutex<VecDeque<String>>,
    cancelled: AtomicBool,
}

impl WorkQueue {
    pub fn new<I: IntoIterator<Item = String>>(items: I) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn pop(&self) -> Option<String> {
        if self.is_cancelled() {
            return None;
        }
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Stop handing out work. Returns how many tickers were abandoned.
    pub fn cancel(&self) -> usize {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let abandoned = items.len();
        items.clear();
        abandoned
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded-concurrency primary fetch with secondary fallback for whatever is left.
pub struct FetchDispatcher {
    quotes: Arc<QuoteService>,
    concurrency: usize,
}

impl FetchDispatcher {
    pub fn new(quotes: Arc<QuoteService>, concurrency: usize) -> Self {
        Self {
            quotes,
            concurrency: ensure_concurrency_limit(concurrency),
        }
    }

    pub fn quotes(&self) -> &Arc<QuoteService> {
        &self.quotes
    }

    /// Quotes for `tickers`, keyed by canonical symbol. Never fails as a whole.
    pub async fn fetch_many(&self, tickers: &[String], force: bool) -> HashMap<String, Quote> {
        let mut results: HashMap<String, Quote> = HashMap::new();
        let mut pending: Vec<(String, String)> = Vec::new();

        for raw in tickers {
            let normalized = normalize_input(raw);
            let symbol = canonical_symbol(&normalized);
            if symbol.is_empty()
                || results.contains_key(&symbol)
                || pending.iter().any(|(_, queued)| *queued == symbol)
            {
                continue;
            }
            if !force {
                if let Some(quote) = self.quotes.primary_cache().get(&symbol) {
                    results.insert(symbol, quote);
                    continue;
                }
            }
            pending.push((normalized, symbol));
        }

        let gate = self.quotes.primary_gate();
        if pending.is_empty() {
            return results;
        }

        if !self.quotes.primary_eligible() {
            debug!("Primary quotes unavailable in this access mode");
        } else if gate.is_blocked() {
            debug!(
                "Primary source gated, routing {} tickers to secondary",
                pending.len()
            );
        } else {
            let queue = WorkQueue::new(pending.iter().map(|(raw, _)| raw.clone()));
            let workers = self.concurrency.min(pending.len());
            let fetched = join_all((0..workers).map(|id| self.run_worker(id, &queue))).await;
            for quote in fetched.into_iter().flatten() {
                results.insert(quote.symbol.clone(), quote);
            }
        }

        let leftover: Vec<String> = pending
            .into_iter()
            .filter(|(_, symbol)| !results.contains_key(symbol))
            .map(|(raw, _)| raw)
            .collect();
        if !leftover.is_empty() {
            results.extend(self.quotes.get_quotes(&leftover, force).await);
        }

        results
    }

    async fn run_worker(&self, id: usize, queue: &WorkQueue) -> Vec<Quote> {
        let mut fetched = Vec::new();
        while let Some(raw) = queue.pop() {
            if self.quotes.primary_gate().is_blocked() {
                let abandoned = queue.cancel() + 1;
                debug!("worker {id} stopping, primary gated with {abandoned} tickers left");
                break;
            }

            match self.quotes.fetch_primary(&raw).await {
                Ok(quote) => fetched.push(quote),
                Err(SourceError::RateLimited { .. }) => {
                    let abandoned = queue.cancel();
                    info!("Primary rate limited on {raw}, abandoning {abandoned} queued tickers");
                    break;
                }
                Err(err) => warn!("Primary quote for {raw} failed: {err}"),
            }
        }
        fetched
    }
}
