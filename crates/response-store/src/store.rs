//! Pending request table with timeout-based eviction.

use crate::{CorrelationStrategy, StoreError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, trace};

/// A request waiting for its answer.
#[derive(Debug, Clone)]
pub struct PendingRequest<R> {
    /// The original request.
    pub request: R,
    /// When the request was recorded.
    pub timestamp: Instant,
}

/// Counters for a [`ResponseStore`].
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Requests recorded.
    pub total_sent: AtomicU64,
    /// Answers that reclaimed a request.
    pub total_answered: AtomicU64,
    /// Answers with no pending request (unknown, duplicate or late).
    pub total_unmatched: AtomicU64,
    /// Requests evicted by `clear`.
    pub total_expired: AtomicU64,
}

/// Correlation table mapping outstanding message ids to their requests.
pub struct ResponseStore<S: CorrelationStrategy> {
    strategy: S,
    timeout: Duration,
    pending: DashMap<S::Id, PendingRequest<S::Request>>,
    last_sweep: Mutex<Option<Instant>>,
    stats: StoreStats,
}

impl<S: CorrelationStrategy> ResponseStore<S> {
    /// Create a store. A zero `timeout` disables eviction.
    pub fn new(strategy: S, timeout: Duration) -> Self {
        Self {
            strategy,
            timeout,
            pending: DashMap::new(),
            last_sweep: Mutex::new(None),
            stats: StoreStats::default(),
        }
    }

    /// Record a request under the message id it carries.
    pub fn sent(&self, request: S::Request) -> Result<S::Id, StoreError> {
        let id = self
            .strategy
            .request_id(&request)
            .ok_or(StoreError::MissingId)?;
        self.record(id.clone(), request, Instant::now());
        Ok(id)
    }

    /// Record a request under an explicit message id.
    pub fn sent_with_id(&self, request: S::Request, id: S::Id) {
        self.record(id, request, Instant::now());
    }

    /// Narrow a generic event to a request and record it.
    pub fn sent_event(&self, event: &S::Event) -> Result<S::Id, StoreError> {
        let request = self
            .strategy
            .as_request(event)
            .ok_or(StoreError::NotARequest)?;
        self.sent(request)
    }

    fn record(&self, id: S::Id, request: S::Request, timestamp: Instant) {
        trace!(id = ?id, "Recording pending request");
        self.pending
            .insert(id, PendingRequest { request, timestamp });
        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Match an answer against the pending table.
    ///
    /// Returns the original request at most once per id. Unknown, duplicate
    /// and late answers return `None`.
    pub fn received(&self, answer: &S::Answer) -> Option<S::Request> {
        let Some(id) = self.strategy.answer_id(answer) else {
            self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let removed = self
            .pending
            .remove_if(&id, |_, pending| {
                self.strategy.should_remove(&pending.request, answer)
            });

        match removed {
            Some((_, pending)) => {
                self.stats.total_answered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    id = ?id,
                    elapsed_ms = pending.timestamp.elapsed().as_millis(),
                    "Answer matched pending request"
                );
                Some(pending.request)
            }
            None => {
                if !self.pending.contains_key(&id) {
                    self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
                    trace!(id = ?id, "Answer for unknown or reclaimed id");
                }
                None
            }
        }
    }

    /// Narrow a generic event to an answer and match it.
    pub fn received_event(&self, event: &S::Event) -> Option<S::Request> {
        self.strategy
            .as_answer(event)
            .and_then(|answer| self.received(answer))
    }

    /// Evict entries older than the timeout.
    ///
    /// Sweeps at most once per timeout window; returns the number evicted.
    pub fn clear(&self) -> usize {
        self.clear_at(Instant::now())
    }

    fn clear_at(&self, now: Instant) -> usize {
        if self.timeout.is_zero() {
            return 0;
        }

        {
            let mut last_sweep = self.last_sweep.lock();
            if let Some(last) = *last_sweep {
                if now.saturating_duration_since(last) < self.timeout {
                    return 0;
                }
            }
            *last_sweep = Some(now);
        }

        let timeout = self.timeout;
        let mut removed = 0;
        self.pending.retain(|id, pending| {
            let age = now.saturating_duration_since(pending.timestamp);
            if age > timeout {
                debug!(id = ?id, age_ms = age.as_millis(), "Evicting expired request");
                removed += 1;
                false
            } else {
                true
            }
        });

        self.stats
            .total_expired
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Whether a request with this id is pending.
    pub fn registered(&self, id: &S::Id) -> bool {
        self.pending.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Configured eviction timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }
}

/// Background task calling [`ResponseStore::clear`] until shutdown.
pub async fn cleanup_task<S>(
    store: Arc<ResponseStore<S>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    S: CorrelationStrategy,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let removed = store.clear();
                if removed > 0 {
                    debug!(removed = removed, "Cleaned up expired requests");
                }
            }
        }
    }
}
