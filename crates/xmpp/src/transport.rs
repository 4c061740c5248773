use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{error::ConnectionError, stanza::Stanza};

pub type StanzaSender = mpsc::Sender<Stanza>;
pub type StanzaReceiver = mpsc::Receiver<Stanza>;

pub fn stanza_channel(buffer: usize) -> (StanzaSender, StanzaReceiver) {
    mpsc::channel(buffer)
}

/// Outbound half of an established XMPP stream.
///
/// Stream negotiation and framing happen behind this trait; the correlation
/// layer only hands it complete stanzas. Inbound stanzas are pushed into
/// [`crate::XmppConnection::process_inbound`] by whoever reads the stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StanzaTransport: Send + Sync + 'static {
    async fn send(&self, stanza: Stanza) -> Result<(), ConnectionError>;

    fn is_connected(&self) -> bool;

    /// Stop accepting outbound stanzas. Idempotent.
    fn close(&self);
}

/// In-process transport that forwards outbound stanzas into a tokio channel.
///
/// Used to wire two connections back to back, and by tests to observe what a
/// connection sends.
pub struct ChannelTransport {
    sender: StanzaSender,
    connected: AtomicBool,
}

impl ChannelTransport {
    pub fn new(sender: StanzaSender) -> Self {
        Self {
            sender,
            connected: AtomicBool::new(true),
        }
    }

    /// A transport plus the receiver that observes everything it sends.
    pub fn channel(buffer: usize) -> (Self, StanzaReceiver) {
        let (sender, receiver) = stanza_channel(buffer);
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl StanzaTransport for ChannelTransport {
    async fn send(&self, stanza: Stanza) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }

        self.sender.send(stanza).await.map_err(|_| {
            self.connected.store(false, Ordering::Release);
            ConnectionError::InterruptedWait
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    fn close(&self) {
        self.connected.store(false, Ordering::Release);
    }
}
