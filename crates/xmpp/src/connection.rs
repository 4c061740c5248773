use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace};

use crate::{
    collector::{Collector, CollectorConfig, CollectorRegistry},
    config::XmppConfig,
    error::{ConnectionError, ExchangeError},
    filter::{IqReplyFilter, StanzaFilter},
    iq_request::{HandlerMode, IqHandlerKey, IqRequestDispatcher, IqRequestHandler},
    stanza::{IqType, Stanza},
    transport::{StanzaReceiver, StanzaSender, StanzaTransport, stanza_channel},
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

type CloseHook = Box<dyn FnOnce(ConnectionId) + Send>;

/// One authenticated XMPP session as seen by the correlation layer.
///
/// Every inbound stanza goes through [`XmppConnection::process_inbound`],
/// which offers it to the live collectors and routes IQ requests to their
/// handlers without waiting on either.
pub struct XmppConnection {
    id: ConnectionId,
    config: XmppConfig,
    transport: Arc<dyn StanzaTransport>,
    collectors: CollectorRegistry,
    iq_handlers: IqRequestDispatcher,
    closed: AtomicBool,
    close_hooks: Mutex<Vec<CloseHook>>,
}

impl XmppConnection {
    pub fn new(transport: Arc<dyn StanzaTransport>, config: XmppConfig) -> Arc<Self> {
        let id = ConnectionId::next();
        debug!(connection = %id, "connection created");
        Arc::new(Self {
            id,
            config,
            iq_handlers: IqRequestDispatcher::new(Arc::clone(&transport)),
            transport,
            collectors: CollectorRegistry::new(),
            closed: AtomicBool::new(false),
            close_hooks: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn config(&self) -> &XmppConfig {
        &self.config
    }

    pub fn collectors(&self) -> &CollectorRegistry {
        &self.collectors
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.transport.is_connected()
    }

    /// Register a collector for `filter` using the configured size limit.
    pub fn create_collector(&self, filter: impl StanzaFilter) -> Collector {
        self.create_collector_with(
            CollectorConfig::new(filter).size_limit(self.config.collectors.size_limit),
        )
    }

    pub fn create_collector_with(&self, config: CollectorConfig) -> Collector {
        self.collectors.create_collector(config)
    }

    pub async fn send(&self, stanza: Stanza) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::NotConnected);
        }
        self.transport.send(stanza).await
    }

    /// Send an IQ request and wait for its `result` or `error` answer.
    ///
    /// The reply collector is registered before the request leaves, so an
    /// answer can never overtake the registration. An `error` answer is
    /// returned as [`ExchangeError::Stanza`].
    #[instrument(skip(self, request), fields(connection = %self.id, id = request.id().unwrap_or_default()))]
    pub async fn send_iq_and_wait(&self, request: Stanza) -> Result<Stanza, ExchangeError> {
        if !request.is_iq_request() {
            return Err(ExchangeError::UnexpectedReply(format!(
                "<{}/> is not an IQ request",
                request.name()
            )));
        }

        let reply_collector = self.create_collector(IqReplyFilter::new(&request));
        self.send(request).await?;
        let reply = reply_collector.next(self.config.reply_timeout()).await;
        reply_collector.cancel();
        let reply = reply?;

        if let Some((condition, error_type, text)) = reply.stanza_error() {
            debug!(%condition, %error_type, "IQ request answered with error");
            return Err(ExchangeError::Stanza {
                condition,
                error_type,
                text,
            });
        }
        Ok(reply)
    }

    pub fn register_iq_request_handler(
        &self,
        element: &str,
        namespace: &str,
        iq_type: IqType,
        mode: HandlerMode,
        handler: Arc<dyn IqRequestHandler>,
    ) -> Option<Arc<dyn IqRequestHandler>> {
        self.iq_handlers
            .register(IqHandlerKey::new(element, namespace, iq_type), mode, handler)
    }

    pub fn unregister_iq_request_handler(
        &self,
        element: &str,
        namespace: &str,
        iq_type: IqType,
    ) -> Option<Arc<dyn IqRequestHandler>> {
        self.iq_handlers
            .unregister(&IqHandlerKey::new(element, namespace, iq_type))
    }

    /// Hand one inbound stanza to collectors and request handlers.
    ///
    /// Collectors see every stanza, requests included. Returns without
    /// waiting for any handler.
    pub fn process_inbound(&self, stanza: Stanza) {
        if self.is_closed() {
            trace!(connection = %self.id, stanza = stanza.name(), "dropping stanza on closed connection");
            return;
        }

        self.collectors.offer(&stanza);
        if stanza.is_iq_request() {
            self.iq_handlers.dispatch(stanza);
        }
    }

    /// Drain `inbound` into [`Self::process_inbound`] until the channel closes.
    pub fn spawn_reader(self: &Arc<Self>, mut inbound: StanzaReceiver) -> JoinHandle<()> {
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(stanza) = inbound.recv().await {
                connection.process_inbound(stanza);
            }
            debug!(connection = %connection.id, "inbound stream ended");
        })
    }

    /// Create the inbound channel, sized from the configuration, and start
    /// the reader task draining it.
    pub fn attach_inbound(self: &Arc<Self>) -> (StanzaSender, JoinHandle<()>) {
        let (sender, receiver) = stanza_channel(self.config.connection.inbound_capacity);
        (sender, self.spawn_reader(receiver))
    }

    /// Run `hook` once when the connection closes. Runs immediately if the
    /// connection is already closed.
    pub fn on_close(&self, hook: impl FnOnce(ConnectionId) + Send + 'static) {
        {
            let mut hooks = self
                .close_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.is_closed() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook(self.id);
    }

    /// Tear the connection down: stop the transport, wake every waiter with
    /// [`ExchangeError::Canceled`], drop request handlers and run close hooks.
    /// Idempotent.
    pub fn close(&self) {
        let hooks = {
            let mut hooks = self
                .close_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *hooks)
        };

        self.transport.close();
        let canceled = self.collectors.cancel_all();
        self.iq_handlers.clear();
        for hook in hooks {
            hook(self.id);
        }
        info!(connection = %self.id, canceled, "connection closed");
    }
}

impl std::fmt::Debug for XmppConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmppConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("collectors", &self.collectors.len())
            .finish()
    }
}
