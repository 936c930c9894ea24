use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::SourceError;
use crate::storage::{load_value, save_value, KeyValueStore};
use crate::utils::time::Clock;

struct Persistence {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
}

/// Single "blocked until" timestamp guarding one upstream source.
pub struct RateLimitGate {
    name: &'static str,
    blocked_until_ms: AtomicI64,
    clock: Arc<dyn Clock>,
    persistence: Option<Persistence>,
}

impl RateLimitGate {
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            blocked_until_ms: AtomicI64::new(0),
            clock,
            persistence: None,
        }
    }

    /// Gate whose window survives restarts through `store[key]`.
    pub fn persisted(
        name: &'static str,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        key: &'static str,
    ) -> Self {
        let restored = match load_value::<i64>(store.as_ref(), key) {
            Ok(value) => value.unwrap_or(0),
            Err(err) => {
                warn!("Failed to restore {name} rate limit from `{key}`: {err}");
                0
            }
        };

        let gate = Self {
            name,
            blocked_until_ms: AtomicI64::new(restored),
            clock,
            persistence: Some(Persistence { store, key }),
        };
        if let Some(remaining) = gate.remaining() {
            info!(
                "{} source still rate limited for {}s",
                name,
                remaining.as_secs()
            );
        }
        gate
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn blocked_until_ms(&self) -> i64 {
        self.blocked_until_ms.load(Ordering::SeqCst)
    }

    pub fn is_blocked(&self) -> bool {
        self.clock.now_ms() < self.blocked_until_ms()
    }

    /// Time left in the current window, if any.
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.blocked_until_ms() - self.clock.now_ms();
        (left > 0).then(|| Duration::from_millis(left as u64))
    }

    /// `Err(RateLimited)` carrying the remaining wait while the window is open.
    pub fn check(&self) -> Result<(), SourceError> {
        match self.remaining() {
            Some(remaining) => Err(SourceError::rate_limited(remaining)),
            None => Ok(()),
        }
    }

    /// Extend the window to at least `now + backoff`. Returns the new deadline.
    pub fn block_for(&self, backoff: Duration) -> i64 {
        let candidate = self.clock.now_ms() + backoff.as_millis() as i64;
        let previous = self.blocked_until_ms.fetch_max(candidate, Ordering::SeqCst);
        let until = previous.max(candidate);
        info!(
            "{} source rate limited, backing off for {}s",
            self.name,
            backoff.as_secs()
        );
        self.persist(until);
        until
    }

    pub fn clear(&self) {
        self.blocked_until_ms.store(0, Ordering::SeqCst);
        self.persist(0);
    }

    /// Reset the gate once its window has elapsed. Returns whether it was cleared.
    pub fn clear_if_expired(&self) -> bool {
        let until = self.blocked_until_ms();
        if until == 0 || self.clock.now_ms() < until {
            return false;
        }
        let cleared = self
            .blocked_until_ms
            .compare_exchange(until, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if cleared {
            debug!("{} rate limit window elapsed", self.name);
            self.persist(0);
        }
        cleared
    }

    /// Clear the gate on expiry from a background timer. No-op outside a runtime.
    pub fn schedule_release(self: &Arc<Self>) {
        let Some(remaining) = self.remaining() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let gate = Arc::clone(self);
        handle.spawn(async move {
            tokio::time::sleep(remaining).await;
            gate.clear_if_expired();
        });
    }

    fn persist(&self, until: i64) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(err) = save_value(persistence.store.as_ref(), persistence.key, &until) {
            warn!(
                "Failed to persist {} rate limit to `{}`: {err}",
                self.name, persistence.key
            );
        }
    }
}
