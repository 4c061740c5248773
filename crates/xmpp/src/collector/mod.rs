//! Filter-scoped inboxes for awaited inbound stanzas.
//!
//! A [`Collector`] is created through a [`CollectorRegistry`] before the
//! request that triggers the awaited stanzas is sent. From then on every
//! inbound stanza offered to the registry is tested against the collector's
//! filter and, on a match, appended to its buffer in arrival order. Callers
//! wait for the next stanza with [`Collector::next`], or harvest everything
//! buffered with [`Collector::drain_all`].
//!
//! A collector may name another collector as its *reset target*. Every match
//! then pushes the target's inactivity deadline forward, which keeps a
//! terminal wait alive while interim stanzas keep arriving. A collector may
//! also be made to stop after another: once that collector accepts a stanza,
//! this one is canceled in the same dispatch step and takes nothing more.
//!
//! Collectors are canceled explicitly with [`Collector::cancel`] (or several
//! at once with [`CollectorRegistry::cancel_together`]) and implicitly when
//! dropped. Canceling stops further enqueues but never discards what is
//! already buffered.

mod registry;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};
use tracing::{debug, warn};

use crate::{error::CollectorError, filter::StanzaFilter, stanza::Stanza};

pub use registry::CollectorRegistry;
use registry::RegistryShared;

/// Default maximum number of buffered stanzas per collector.
pub const DEFAULT_SIZE_LIMIT: usize = 5000;

pub struct CollectorConfig {
    filter: Box<dyn StanzaFilter>,
    size_limit: usize,
    reset_target: Option<Arc<CollectorShared>>,
    stop_after: Option<Arc<CollectorShared>>,
}

impl CollectorConfig {
    pub fn new(filter: impl StanzaFilter) -> Self {
        Self {
            filter: Box::new(filter),
            size_limit: DEFAULT_SIZE_LIMIT,
            reset_target: None,
            stop_after: None,
        }
    }

    /// Maximum number of buffered stanzas. When full, the oldest stanza is
    /// evicted to make room. Values below 1 are raised to 1.
    pub fn size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = size_limit.max(1);
        self
    }

    /// Refresh `target`'s inactivity deadline on every stanza this collector
    /// accepts.
    pub fn reset_on_match(mut self, target: &Collector) -> Self {
        self.reset_target = Some(Arc::clone(&target.shared));
        self
    }

    /// Stop accepting stanzas once `target` has accepted one. A stanza
    /// dispatched after `target`'s match is refused and cancels this collector.
    pub fn stop_after(mut self, target: &Collector) -> Self {
        self.stop_after = Some(Arc::clone(&target.shared));
        self
    }
}

struct CollectorState {
    buffer: VecDeque<Stanza>,
    canceled: bool,
    collected: u64,
    last_activity: Option<Instant>,
}

pub(crate) struct CollectorShared {
    id: u64,
    filter: Box<dyn StanzaFilter>,
    size_limit: usize,
    reset_target: Option<Arc<CollectorShared>>,
    stop_after: Option<Arc<CollectorShared>>,
    state: Mutex<CollectorState>,
    notify: Notify,
}

impl CollectorShared {
    fn new(id: u64, config: CollectorConfig) -> Self {
        Self {
            id,
            filter: config.filter,
            size_limit: config.size_limit,
            reset_target: config.reset_target,
            stop_after: config.stop_after,
            state: Mutex::new(CollectorState {
                buffer: VecDeque::new(),
                canceled: false,
                collected: 0,
                last_activity: None,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `stanza` if the filter accepts it and the collector is active.
    /// Only called by the registry while it holds its dispatch lock.
    fn offer(&self, stanza: &Stanza) -> bool {
        if !self.filter.accept(stanza) {
            return false;
        }
        if self
            .stop_after
            .as_ref()
            .is_some_and(|target| target.lock().collected > 0)
        {
            if self.mark_canceled() {
                debug!(collector = self.id, "linked collector finished, stanza refused");
            }
            return false;
        }

        {
            let mut state = self.lock();
            if state.canceled {
                return false;
            }
            if state.buffer.len() >= self.size_limit {
                state.buffer.pop_front();
                warn!(
                    collector = self.id,
                    size_limit = self.size_limit,
                    "collector full, evicted oldest stanza"
                );
            }
            state.buffer.push_back(stanza.clone());
            state.collected += 1;
        }
        self.notify.notify_waiters();

        if let Some(target) = &self.reset_target {
            target.reset_timeout();
        }
        true
    }

    fn reset_timeout(&self) {
        {
            let mut state = self.lock();
            if state.canceled {
                return;
            }
            state.last_activity = Some(Instant::now());
        }
        self.notify.notify_waiters();
    }

    /// Returns `true` if this call moved the collector from active to canceled.
    fn mark_canceled(&self) -> bool {
        let newly_canceled = {
            let mut state = self.lock();
            !std::mem::replace(&mut state.canceled, true)
        };
        self.notify.notify_waiters();
        newly_canceled
    }
}

/// Handle to a registered collector. Dropping it cancels the collector.
pub struct Collector {
    shared: Arc<CollectorShared>,
    registry: Weak<RegistryShared>,
}

impl Collector {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Wait for the next matching stanza.
    ///
    /// Returns at once if a stanza is already buffered. Otherwise waits until
    /// one arrives or `timeout` passes without activity; activity is the start
    /// of this call or any refresh from a collector that targets this one.
    /// A canceled collector with an empty buffer reports
    /// [`CollectorError::Canceled`] immediately.
    pub async fn next(&self, timeout: Duration) -> Result<Stanza, CollectorError> {
        let started = Instant::now();
        self.shared.lock().last_activity = Some(started);

        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register interest before inspecting the buffer so an enqueue in
            // between cannot be missed.
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.shared.lock();
                if let Some(stanza) = state.buffer.pop_front() {
                    return Ok(stanza);
                }
                if state.canceled {
                    return Err(CollectorError::Canceled);
                }
                state.last_activity.unwrap_or(started) + timeout
            };

            if Instant::now() >= deadline {
                return Err(CollectorError::Timeout {
                    waited: started.elapsed(),
                });
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Take the oldest buffered stanza without waiting.
    pub fn poll(&self) -> Option<Stanza> {
        self.shared.lock().buffer.pop_front()
    }

    /// Take everything buffered, oldest first, without waiting.
    pub fn drain_all(&self) -> Vec<Stanza> {
        self.shared.lock().buffer.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stanzas accepted over the collector's lifetime.
    pub fn collected_count(&self) -> u64 {
        self.shared.lock().collected
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.lock().canceled
    }

    /// Stop collecting. Idempotent; buffered stanzas remain retrievable.
    pub fn cancel(&self) {
        match self.registry.upgrade() {
            Some(registry) => registry.cancel(&[&self.shared]),
            None => {
                self.shared.mark_canceled();
            }
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Collector")
            .field("id", &self.shared.id)
            .field("buffered", &state.buffer.len())
            .field("canceled", &state.canceled)
            .finish()
    }
}
