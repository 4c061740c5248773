//! Off-path handling of inbound IQ requests.
//!
//! Handlers are keyed by the request's payload element name, namespace and IQ
//! type. The reading path only looks up the handler and hands the request to
//! another task, so a slow handler never delays delivery of other stanzas.
//!
//! A handler either answers immediately ([`IqHandlerOutcome::Reply`]) or
//! defers ([`IqHandlerOutcome::Deferred`]): it sends nothing now and the real
//! answer reaches the requester later in separately correlated stanzas.
//! Handler errors and panics are turned into IQ error replies through
//! [`RequestHandlerError::condition`]. A request nobody registered for is
//! answered the same way, as [`RequestHandlerError::NoHandler`], which RFC 6120
//! reports as `service-unavailable`.

use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

use crate::{
    error::RequestHandlerError,
    stanza::{IqType, Stanza},
    transport::StanzaTransport,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IqHandlerKey {
    element: String,
    namespace: String,
    iq_type: IqType,
}

impl IqHandlerKey {
    pub fn new(element: impl Into<String>, namespace: impl Into<String>, iq_type: IqType) -> Self {
        Self {
            element: element.into(),
            namespace: namespace.into(),
            iq_type,
        }
    }

    fn of(request: &Stanza) -> Option<Self> {
        let iq_type = request.iq_type()?;
        let payload = request.payload()?;
        Some(Self::new(payload.name(), payload.ns(), iq_type))
    }
}

/// Where a handler runs relative to other requests for the same handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerMode {
    /// One request at a time, in arrival order, on a dedicated worker task.
    Sync,
    /// Every request on its own task.
    #[default]
    Async,
}

#[derive(Debug, Clone)]
pub enum IqHandlerOutcome {
    Reply(Stanza),
    Deferred,
}

#[async_trait]
pub trait IqRequestHandler: Send + Sync + 'static {
    async fn handle_iq_request(
        &self,
        request: Stanza,
    ) -> Result<IqHandlerOutcome, RequestHandlerError>;
}

/// What the reading path did with an inbound stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to a registered handler.
    Handler(HandlerMode),
    /// No handler registered; a `service-unavailable` error is being sent.
    Unhandled,
    /// Not an IQ `get` or `set`.
    NotARequest,
}

#[derive(Clone)]
struct RegisteredHandler {
    mode: HandlerMode,
    handler: Arc<dyn IqRequestHandler>,
    serial: Arc<OnceLock<mpsc::UnboundedSender<Stanza>>>,
}

pub struct IqRequestDispatcher {
    handlers: DashMap<IqHandlerKey, RegisteredHandler>,
    transport: Arc<dyn StanzaTransport>,
}

impl IqRequestDispatcher {
    pub fn new(transport: Arc<dyn StanzaTransport>) -> Self {
        Self {
            handlers: DashMap::new(),
            transport,
        }
    }

    /// Register a handler, replacing and returning any handler previously
    /// registered for the same key.
    pub fn register(
        &self,
        key: IqHandlerKey,
        mode: HandlerMode,
        handler: Arc<dyn IqRequestHandler>,
    ) -> Option<Arc<dyn IqRequestHandler>> {
        debug!(element = %key.element, namespace = %key.namespace, iq_type = %key.iq_type, ?mode, "registered IQ request handler");
        self.handlers
            .insert(
                key,
                RegisteredHandler {
                    mode,
                    handler,
                    serial: Arc::new(OnceLock::new()),
                },
            )
            .map(|previous| previous.handler)
    }

    pub fn unregister(&self, key: &IqHandlerKey) -> Option<Arc<dyn IqRequestHandler>> {
        self.handlers.remove(key).map(|(_, entry)| entry.handler)
    }

    pub fn is_registered(&self, key: &IqHandlerKey) -> bool {
        self.handlers.contains_key(key)
    }

    /// Drop every handler. Sync-mode workers stop once their queue drains.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Route an inbound stanza. Never awaits; all handler work and reply
    /// sending happens on spawned tasks.
    #[instrument(skip_all, fields(id = request.id().unwrap_or_default()))]
    pub fn dispatch(&self, request: Stanza) -> Dispatch {
        if !request.is_iq_request() {
            return Dispatch::NotARequest;
        }

        let entry = IqHandlerKey::of(&request)
            .and_then(|key| self.handlers.get(&key).map(|entry| entry.value().clone()));

        let Some(entry) = entry else {
            debug!("no handler for IQ request, replying service-unavailable");
            let payload = request
                .payload()
                .map(|payload| format!("<{}/> in {}", payload.name(), payload.ns()))
                .unwrap_or_else(|| "empty request".to_string());
            let reply = error_reply(&request, &RequestHandlerError::no_handler(payload));
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move { send_reply(transport.as_ref(), reply).await });
            return Dispatch::Unhandled;
        };

        match entry.mode {
            HandlerMode::Async => {
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    run_handler(entry.handler.as_ref(), transport.as_ref(), request).await;
                });
            }
            HandlerMode::Sync => {
                let queue = entry.serial.get_or_init(|| {
                    spawn_serial_worker(Arc::clone(&entry.handler), Arc::clone(&self.transport))
                });
                if queue.send(request).is_err() {
                    error!("serial IQ handler worker is gone, request dropped");
                }
            }
        }
        Dispatch::Handler(entry.mode)
    }
}

fn spawn_serial_worker(
    handler: Arc<dyn IqRequestHandler>,
    transport: Arc<dyn StanzaTransport>,
) -> mpsc::UnboundedSender<Stanza> {
    let (sender, mut queue) = mpsc::unbounded_channel::<Stanza>();
    tokio::spawn(async move {
        while let Some(request) = queue.recv().await {
            run_handler(handler.as_ref(), transport.as_ref(), request).await;
        }
        debug!("serial IQ handler worker stopped");
    });
    sender
}

async fn run_handler(
    handler: &dyn IqRequestHandler,
    transport: &dyn StanzaTransport,
    request: Stanza,
) {
    let outcome = AssertUnwindSafe(handler.handle_iq_request(request.clone()))
        .catch_unwind()
        .await;

    let reply = match outcome {
        Ok(Ok(IqHandlerOutcome::Reply(reply))) => reply,
        Ok(Ok(IqHandlerOutcome::Deferred)) => {
            debug!(
                id = request.id().unwrap_or_default(),
                "IQ request deferred, no direct reply"
            );
            return;
        }
        Ok(Err(handler_error)) => {
            warn!(
                id = request.id().unwrap_or_default(),
                error = %handler_error,
                "IQ request handler failed"
            );
            error_reply(&request, &handler_error)
        }
        Err(_) => {
            error!(
                id = request.id().unwrap_or_default(),
                "IQ request handler panicked"
            );
            error_reply(&request, &RequestHandlerError::internal("handler panicked"))
        }
    };

    send_reply(transport, reply).await;
}

fn error_reply(request: &Stanza, handler_error: &RequestHandlerError) -> Stanza {
    let (condition, error_type) = handler_error.condition();
    Stanza::iq_error_for(request, condition, error_type, Some(&handler_error.to_string()))
}

async fn send_reply(transport: &dyn StanzaTransport, reply: Stanza) {
    let id = reply.id().unwrap_or_default().to_string();
    if let Err(error) = transport.send(reply).await {
        warn!(id, %error, "failed to send IQ reply");
    }
}
