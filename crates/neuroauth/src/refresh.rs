// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight token refresh and proactive renewal.
//!
//! At most one refresh call is in flight per coordinator. Concurrent callers
//! join the outstanding ticket and observe the same outcome. A
//! failed refresh ends the session: tokens are cleared and
//! [`SessionEvent::SessionExpired`] is emitted. Failures are never returned to
//! callers; they read as `None`.
//!
//! There is no timeout here beyond the gateway's own. A hung gateway call keeps
//! the ticket outstanding until it settles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::events::{EventNotifier, SessionEvent};
use crate::gateway::IdentityGateway;
use crate::store::TokenStore;
use crate::token::TokenPair;

type RefreshOutcome = Shared<BoxFuture<'static, Option<TokenPair>>>;

/// Handle on the refresh currently in flight.
struct RefreshTicket {
    id: u64,
    outcome: RefreshOutcome,
}

/// How a refresh call settled, decided under the ticket lock.
enum Settled {
    Renewed(TokenPair),
    /// The backend refused; the session is over.
    Ended,
    /// The session was torn down while the call was in flight.
    Discarded,
}

/// Handle on the armed proactive timer.
struct ArmedTimer {
    id: u64,
    cancel: CancellationToken,
}

/// Timing knobs for proactive renewal.
#[derive(Debug, Clone, Copy)]
pub struct RefreshTiming {
    /// Refresh this long before expiry.
    pub buffer: Duration,
    /// Minimum delay when re-arming right after a successful refresh.
    pub min_interval: Duration,
}

impl Default for RefreshTiming {
    fn default() -> Self {
        Self { buffer: crate::expiry::DEFAULT_REFRESH_BUFFER, min_interval: Duration::from_secs(30) }
    }
}

struct Inner {
    gateway: Arc<dyn IdentityGateway>,
    store: Arc<TokenStore>,
    events: Arc<dyn EventNotifier>,
    clock: Arc<dyn Clock>,
    timing: RefreshTiming,
    ticket: Mutex<Option<RefreshTicket>>,
    timer: Mutex<Option<ArmedTimer>>,
    next_id: AtomicU64,
    /// Bumped whenever the session is torn down; stale refreshes compare it.
    epoch: AtomicU64,
}

/// Deduplicates refresh calls and owns the proactive refresh timer.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        gateway: Arc<dyn IdentityGateway>,
        store: Arc<TokenStore>,
        events: Arc<dyn EventNotifier>,
        clock: Arc<dyn Clock>,
        timing: RefreshTiming,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                store,
                events,
                clock,
                timing,
                ticket: Mutex::new(None),
                timer: Mutex::new(None),
                next_id: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Refresh the stored pair, joining an in-flight attempt if there is one.
    ///
    /// Resolves to the new pair, or `None` when there was nothing to refresh
    /// or the refresh failed.
    pub async fn refresh(&self) -> Option<TokenPair> {
        self.ticket().await
    }

    /// Start (or join) a refresh without waiting for it.
    ///
    /// Needs a tokio runtime; outside one this logs and does nothing.
    pub fn refresh_in_background(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no async runtime, skipping background refresh");
            return;
        }
        // The refresh runs on its own task; dropping the handle does not cancel it.
        drop(self.ticket());
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.ticket.lock().is_some()
    }

    fn ticket(&self) -> RefreshOutcome {
        let mut slot = self.inner.ticket.lock();
        if let Some(ticket) = slot.as_ref() {
            debug!(ticket = ticket.id, "joining in-flight refresh");
            return ticket.outcome.clone();
        }

        let Some(pair) = self.inner.store.load() else {
            debug!("no stored tokens, nothing to refresh");
            return future::ready(None).boxed().shared();
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_refresh(id, epoch, pair).await });
        let outcome = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("refresh task failed: {e}");
                    None
                }
            }
        }
        .boxed()
        .shared();

        debug!(ticket = id, "refresh started");
        *slot = Some(RefreshTicket { id, outcome: outcome.clone() });
        outcome
    }

    async fn run_refresh(&self, id: u64, epoch: u64, current: TokenPair) -> Option<TokenPair> {
        let result = self.inner.gateway.refresh_token(&current.refresh_token).await;

        // Commit under the ticket lock: `invalidate` takes it too, so a teardown
        // lands either before the epoch check or after the store update.
        let settled = {
            let mut slot = self.inner.ticket.lock();
            if slot.as_ref().is_some_and(|t| t.id == id) {
                *slot = None;
            }
            let stale = self.inner.epoch.load(Ordering::SeqCst) != epoch;

            match result {
                Ok(_) if stale => {
                    info!(ticket = id, "session ended during refresh, discarding new tokens");
                    Settled::Discarded
                }
                Ok(pair) => {
                    self.inner.store.save(&pair);
                    self.rearm_after_refresh(&pair);
                    Settled::Renewed(pair)
                }
                Err(e) if stale => {
                    debug!(ticket = id, "refresh failed after session ended: {e}");
                    Settled::Discarded
                }
                Err(e) => {
                    warn!(ticket = id, err = %e, "token refresh failed, ending session");
                    self.inner.epoch.fetch_add(1, Ordering::SeqCst);
                    self.cancel_timer();
                    self.inner.store.clear();
                    Settled::Ended
                }
            }
        };

        // Listeners run outside the lock so they may call back into the coordinator.
        match settled {
            Settled::Renewed(pair) => {
                self.inner.events.emit(SessionEvent::TokensRefreshed { tokens: pair.clone() });
                info!(ticket = id, expires_at = pair.expires_at, "tokens refreshed");
                Some(pair)
            }
            Settled::Ended => {
                self.inner.events.emit(SessionEvent::SessionExpired);
                None
            }
            Settled::Discarded => None,
        }
    }

    /// Arm the one-shot proactive refresh for the stored pair.
    ///
    /// Replaces any armed timer. Refreshes immediately when the pair is already
    /// inside the buffer.
    pub fn schedule_proactive_refresh(&self) {
        let Some(pair) = self.inner.store.load() else {
            return;
        };
        let delay = self.delay_until_refresh(&pair);
        self.arm(delay);
    }

    fn rearm_after_refresh(&self, pair: &TokenPair) {
        let delay = self.delay_until_refresh(pair).max(self.inner.timing.min_interval);
        self.arm(delay);
    }

    fn delay_until_refresh(&self, pair: &TokenPair) -> Duration {
        let now = self.inner.clock.now_ms();
        let buffer_ms = self.inner.timing.buffer.as_millis() as u64;
        Duration::from_millis(pair.expires_at.saturating_sub(now).saturating_sub(buffer_ms))
    }

    fn arm(&self, delay: Duration) {
        self.cancel_timer();

        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no async runtime, proactive refresh not armed");
            return;
        }

        if delay.is_zero() {
            debug!("tokens inside refresh buffer, refreshing now");
        }

        // Deadline fixed at arm time, not at the task's first poll.
        let deadline = tokio::time::Instant::now() + delay;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *self.inner.timer.lock() = Some(ArmedTimer { id, cancel: cancel.clone() });

        let this = self.clone();
        debug!(timer = id, delay_secs = delay.as_secs(), "proactive refresh armed");
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = cancel.cancelled() => return,
            }
            {
                let mut slot = this.inner.timer.lock();
                if slot.as_ref().is_some_and(|t| t.id == id) {
                    *slot = None;
                }
            }
            debug!(timer = id, "proactive refresh firing");
            this.refresh().await;
        });
    }

    /// Whether a proactive refresh timer is armed.
    pub fn has_pending_timer(&self) -> bool {
        self.inner.timer.lock().is_some()
    }

    pub fn cancel_timer(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            debug!(timer = timer.id, "proactive refresh cancelled");
            timer.cancel.cancel();
        }
    }

    /// Tear down: cancel the timer and disown any refresh still in flight.
    ///
    /// The next `refresh` starts a fresh call instead of joining the
    /// disowned one.
    pub fn invalidate(&self) {
        {
            let mut slot = self.inner.ticket.lock();
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            if let Some(ticket) = slot.take() {
                debug!(ticket = ticket.id, "in-flight refresh disowned");
            }
        }
        self.cancel_timer();
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
