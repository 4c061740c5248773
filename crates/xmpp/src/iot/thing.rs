use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use super::element::{DataField, NodeInfo};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadOutError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),

    #[error("read-out failed: {0}")]
    Failed(String),
}

/// Produces the current sensor values of a thing on demand.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MomentaryReadOut: Send + Sync + 'static {
    async fn momentary_read_out(&self) -> Result<Vec<DataField>, ReadOutError>;
}

/// [`MomentaryReadOut`] backed by an async closure.
pub struct ReadOutFn<F>(F);

pub fn read_out_fn<F, Fut>(read_out: F) -> ReadOutFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<DataField>, ReadOutError>> + Send + 'static,
{
    ReadOutFn(read_out)
}

#[async_trait]
impl<F, Fut> MomentaryReadOut for ReadOutFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<DataField>, ReadOutError>> + Send + 'static,
{
    async fn momentary_read_out(&self) -> Result<Vec<DataField>, ReadOutError> {
        (self.0)().await
    }
}

/// Something that can be asked for its sensor data.
#[derive(Clone)]
pub struct Thing {
    node_info: NodeInfo,
    momentary_read_out: Option<Arc<dyn MomentaryReadOut>>,
}

impl Thing {
    pub fn new(node_info: NodeInfo) -> Self {
        Self {
            node_info,
            momentary_read_out: None,
        }
    }

    pub fn with_momentary_read_out(mut self, read_out: impl MomentaryReadOut) -> Self {
        self.momentary_read_out = Some(Arc::new(read_out));
        self
    }

    pub fn node_info(&self) -> &NodeInfo {
        &self.node_info
    }

    pub fn momentary_read_out(&self) -> Option<Arc<dyn MomentaryReadOut>> {
        self.momentary_read_out.clone()
    }
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thing")
            .field("node_info", &self.node_info)
            .field("momentary_read_out", &self.momentary_read_out.is_some())
            .finish()
    }
}

/// Installed things of one connection, keyed by node.
#[derive(Debug, Default)]
pub struct ThingRegistry {
    things: DashMap<NodeInfo, Arc<Thing>>,
}

impl ThingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `thing`, returning the one it replaced at the same node.
    pub fn install(&self, thing: Thing) -> Option<Arc<Thing>> {
        self.things
            .insert(thing.node_info().clone(), Arc::new(thing))
    }

    pub fn uninstall(&self, node_info: &NodeInfo) -> Option<Arc<Thing>> {
        self.things.remove(node_info).map(|(_, thing)| thing)
    }

    pub fn lookup(&self, node_info: &NodeInfo) -> Option<Arc<Thing>> {
        self.things
            .get(node_info)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.things.len()
    }

    pub fn is_empty(&self) -> bool {
        self.things.is_empty()
    }
}
