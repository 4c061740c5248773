use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::connection::{ConnectionId, XmppConnection};

/// A per-connection service created on first use.
pub trait Manager: Send + Sync + 'static {
    fn create(connection: &Arc<XmppConnection>) -> Self;
}

/// At most one `M` per connection.
///
/// Instances are created lazily by [`ManagerRegistry::instance_for`] and
/// removed when their connection closes, so a closed connection never keeps
/// its manager alive through the registry.
pub struct ManagerRegistry<M> {
    instances: Arc<DashMap<ConnectionId, Arc<M>>>,
}

impl<M: Manager> ManagerRegistry<M> {
    pub fn new() -> Self {
        Self {
            instances: Arc::new(DashMap::new()),
        }
    }

    pub fn instance_for(&self, connection: &Arc<XmppConnection>) -> Arc<M> {
        let id = connection.id();
        if let Some(existing) = self.instances.get(&id) {
            return Arc::clone(existing.value());
        }

        let mut created = false;
        let manager = Arc::clone(
            self.instances
                .entry(id)
                .or_insert_with(|| {
                    created = true;
                    Arc::new(M::create(connection))
                })
                .value(),
        );

        if created {
            debug!(connection = %id, manager = std::any::type_name::<M>(), "manager created");
            let instances = Arc::downgrade(&self.instances);
            connection.on_close(move |id| {
                if let Some(instances) = instances.upgrade() {
                    instances.remove(&id);
                }
            });
        }
        manager
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<M>> {
        self.instances.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn discard(&self, id: ConnectionId) -> Option<Arc<M>> {
        self.instances.remove(&id).map(|(_, manager)| manager)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl<M: Manager> Default for ManagerRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
