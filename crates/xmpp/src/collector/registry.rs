use std::sync::{
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicU64, Ordering},
};

use tracing::{debug, instrument, trace};

use super::{Collector, CollectorConfig, CollectorShared};
use crate::stanza::Stanza;

/// The live collectors of one connection.
///
/// Dispatch holds the read side of the lock for the whole of one stanza while
/// registration and cancellation take the write side. A collector therefore
/// sees either all of a stanza's dispatch or none of it, and once
/// registration returns the next offered stanza is tested against it.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    shared: Arc<RegistryShared>,
}

#[derive(Default)]
pub(crate) struct RegistryShared {
    collectors: RwLock<Vec<Arc<CollectorShared>>>,
    next_id: AtomicU64,
}

impl RegistryShared {
    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<CollectorShared>>> {
        self.collectors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<CollectorShared>>> {
        self.collectors.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn cancel(&self, targets: &[&Arc<CollectorShared>]) {
        let mut collectors = self.write();
        for target in targets {
            if target.mark_canceled() {
                debug!(collector = target.id, "collector canceled");
            }
        }
        collectors.retain(|live| !targets.iter().any(|target| Arc::ptr_eq(live, target)));
    }
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and activate a collector.
    pub fn create_collector(&self, config: CollectorConfig) -> Collector {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let shared = Arc::new(CollectorShared::new(id, config));

        self.shared.write().push(Arc::clone(&shared));
        debug!(collector = id, "collector registered");

        Collector {
            shared,
            registry: Arc::downgrade(&self.shared),
        }
    }

    /// Offer an inbound stanza to every live collector, in registration order.
    ///
    /// Never blocks on waiters: matching collectors are woken, not run.
    /// Returns the number of collectors that accepted the stanza.
    pub fn offer(&self, stanza: &Stanza) -> usize {
        let collectors = self.shared.read();
        let accepted = collectors
            .iter()
            .filter(|collector| collector.offer(stanza))
            .count();

        if accepted == 0 {
            trace!(
                stanza = stanza.name(),
                id = stanza.id().unwrap_or_default(),
                "stanza matched no collector"
            );
        }
        accepted
    }

    /// Cancel several collectors in one step, so no stanza can be dispatched
    /// to some of them but not the others.
    pub fn cancel_together(&self, collectors: &[&Collector]) {
        let (own, foreign): (Vec<&Collector>, Vec<&Collector>) =
            collectors.iter().copied().partition(|collector| {
                collector
                    .registry
                    .upgrade()
                    .is_some_and(|registry| Arc::ptr_eq(&registry, &self.shared))
            });

        let targets: Vec<&Arc<CollectorShared>> =
            own.iter().map(|collector| &collector.shared).collect();
        self.shared.cancel(&targets);

        for collector in foreign {
            collector.cancel();
        }
    }

    /// Cancel every live collector, waking all waiters. Used on connection
    /// teardown.
    #[instrument(skip(self))]
    pub fn cancel_all(&self) -> usize {
        let mut collectors = self.shared.write();
        let count = collectors.len();
        for collector in collectors.drain(..) {
            collector.mark_canceled();
        }
        debug!(count, "canceled all collectors");
        count
    }

    /// Number of live (not yet canceled) collectors.
    pub fn len(&self) -> usize {
        self.shared.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
