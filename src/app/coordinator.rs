use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::fetch::{AccountSummary, BrokerClient, Position};
use crate::services::RateLimitGate;
use crate::storage::{load_value, save_value, KeyValueStore, ACCOUNT_CACHE_KEY};
use crate::utils::time::Clock;

/// Account summary and positions fetched together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub summary: AccountSummary,
    pub positions: Vec<Position>,
    pub fetched_at_ms: i64,
}

type LoadFuture = Shared<BoxFuture<'static, Result<AccountSnapshot, SourceError>>>;

struct Inner {
    broker: Arc<BrokerClient>,
    gate: Arc<RateLimitGate>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    cached: Mutex<Option<AccountSnapshot>>,
    in_flight: Mutex<Option<(u64, LoadFuture)>>,
    next_id: Mutex<u64>,
}

/// Deduplicates concurrent account loads behind a coarse rate-limit gate.
#[derive(Clone)]
pub struct LoadCoordinator {
    inner: Arc<Inner>,
}

impl LoadCoordinator {
    pub fn new(
        broker: Arc<BrokerClient>,
        gate: Arc<RateLimitGate>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        ttl_ms: i64,
    ) -> Self {
        let cached = match load_value::<AccountSnapshot>(store.as_ref(), ACCOUNT_CACHE_KEY) {
            Ok(cached) => cached,
            Err(err) => {
                warn!("Ignoring unreadable account cache: {err}");
                None
            }
        };

        Self {
            inner: Arc::new(Inner {
                broker,
                gate,
                store,
                clock,
                ttl_ms,
                cached: Mutex::new(cached),
                in_flight: Mutex::new(None),
                next_id: Mutex::new(0),
            }),
        }
    }

    pub fn gate(&self) -> &Arc<RateLimitGate> {
        &self.inner.gate
    }

    /// Last successful snapshot regardless of age.
    pub fn cached(&self) -> Option<AccountSnapshot> {
        self.inner.cached_snapshot()
    }

    /// Load summary and positions.
    ///
    /// Callers that arrive while a load is running await that same load. A
    /// forced caller waits for it and then starts its own. While the gate is
    /// closed, non-forced callers get the last snapshot if there is one and
    /// everyone else gets `RateLimited` without any network access.
    pub async fn load(&self, force: bool) -> Result<AccountSnapshot, SourceError> {
        if !force {
            if let Some(fresh) = self.inner.fresh_snapshot() {
                return Ok(fresh);
            }
        }

        loop {
            let (id, future, owner) = {
                let mut in_flight = self
                    .inner
                    .in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                match in_flight.as_ref() {
                    Some((id, future)) => (*id, future.clone(), false),
                    None => {
                        if let Err(err) = self.inner.gate.check() {
                            drop(in_flight);
                            return self.gated(force, err);
                        }
                        let id = self.inner.next_id();
                        let future = Arc::clone(&self.inner).fetch(id).boxed().shared();
                        *in_flight = Some((id, future.clone()));
                        (id, future, true)
                    }
                }
            };

            if !owner {
                debug!("Joining in-flight account load #{id}");
            }
            let result = future.await;
            if owner || !force {
                return result;
            }
            // Forced callers re-check the cache and gate after the shared load.
            debug!("Account load #{id} finished, starting forced reload");
        }
    }

    fn gated(&self, force: bool, err: SourceError) -> Result<AccountSnapshot, SourceError> {
        if !force {
            if let Some(stale) = self.inner.cached_snapshot() {
                debug!("Account gated, serving cached snapshot");
                return Ok(stale);
            }
        }
        Err(err)
    }
}

impl Inner {
    fn next_id(&self) -> u64 {
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        *next += 1;
        *next
    }

    fn cached_snapshot(&self) -> Option<AccountSnapshot> {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fresh_snapshot(&self) -> Option<AccountSnapshot> {
        let now_ms = self.clock.now_ms();
        self.cached_snapshot()
            .filter(|snapshot| now_ms - snapshot.fetched_at_ms < self.ttl_ms)
    }

    async fn fetch(self: Arc<Self>, id: u64) -> Result<AccountSnapshot, SourceError> {
        debug!("Account load #{id} started");
        let result = futures::try_join!(self.broker.account_summary(), self.broker.positions());

        let outcome = match result {
            Ok((summary, positions)) => {
                let snapshot = AccountSnapshot {
                    summary,
                    positions,
                    fetched_at_ms: self.clock.now_ms(),
                };
                *self.cached.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(snapshot.clone());
                if let Err(err) = save_value(self.store.as_ref(), ACCOUNT_CACHE_KEY, &snapshot) {
                    warn!("Failed to persist account cache: {err}");
                }
                info!(
                    "Loaded account with {} positions",
                    snapshot.positions.len()
                );
                Ok(snapshot)
            }
            Err(err) => {
                if let Some(backoff) = err.retry_after() {
                    self.gate.block_for(backoff);
                    self.gate.schedule_release();
                } else {
                    warn!("Account load #{id} failed: {err}");
                }
                Err(err)
            }
        };

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(in_flight.as_ref(), Some((current, _)) if *current == id) {
            *in_flight = None;
        }
        outcome
    }
}
