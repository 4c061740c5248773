//! Requester side of a momentary read-out.
//!
//! The request is acknowledged by an IQ result, but the values arrive later
//! in `<fields/>` messages that carry only the read-out's sequence number. Two
//! collectors are registered before the request leaves: one for interim
//! batches and one for the terminal `done='true'` batch. Every interim batch
//! refreshes the terminal collector's inactivity deadline, so a long read-out
//! that keeps producing data does not time out. The interim collector stops
//! the moment the terminal batch is dispatched, so data that arrives after it
//! is never part of the result, even before the waiting task wakes up.

use std::sync::Arc;

use jid::Jid;
use tracing::{debug, instrument, warn};

use crate::{
    collector::{Collector, CollectorConfig},
    connection::XmppConnection,
    error::ExchangeError,
    stanza::Stanza,
};

use super::{
    element::{DataRequest, FieldsExtension, NAMESPACE, ReadOutAccepted},
    filter::FieldsFilter,
};

/// One in-flight read-out. Both collectors are canceled together when the
/// session finishes or is dropped midway.
pub struct ReadOutSession {
    connection: Arc<XmppConnection>,
    seq_nr: u64,
    done: Collector,
    data: Collector,
}

impl ReadOutSession {
    /// Register the collectors for read-out `seq_nr`. Nothing is sent yet.
    pub fn open(connection: &Arc<XmppConnection>, seq_nr: u64) -> Self {
        let done = connection.create_collector(FieldsFilter::new(seq_nr, true));
        let data = connection.create_collector_with(
            CollectorConfig::new(FieldsFilter::new(seq_nr, false))
                .size_limit(connection.config().collectors.size_limit)
                .reset_on_match(&done)
                .stop_after(&done),
        );

        Self {
            connection: Arc::clone(connection),
            seq_nr,
            done,
            data,
        }
    }

    pub fn seq_nr(&self) -> u64 {
        self.seq_nr
    }

    /// Send the request to `to` and collect the interim result batches, in
    /// arrival order.
    ///
    /// The terminal `done='true'` batch only ends the read-out; its content is
    /// not part of the result, so a read-out whose terminal batch arrives
    /// first yields nothing. Malformed batches are logged and skipped.
    #[instrument(skip(self, to), fields(seqnr = self.seq_nr, to = %to))]
    pub async fn run(self, to: &Jid) -> Result<Vec<FieldsExtension>, ExchangeError> {
        let outcome = self.exchange(to).await;
        self.cancel();
        let terminal = outcome?;
        if self.parse(&terminal).is_some_and(|fields| !fields.is_empty()) {
            warn!("terminal read-out batch carries values, ignoring them");
        }

        let interim = self.data.drain_all();
        debug!(interim = interim.len(), "read-out complete");
        Ok(interim.iter().filter_map(|stanza| self.parse(stanza)).collect())
    }

    async fn exchange(&self, to: &Jid) -> Result<Stanza, ExchangeError> {
        let request = DataRequest::momentary(self.seq_nr).into_iq(to);
        let ack = self.connection.send_iq_and_wait(request).await?;

        match ack
            .child(ReadOutAccepted::ELEMENT, NAMESPACE)
            .map(ReadOutAccepted::from_element)
        {
            Some(Ok(accepted)) if accepted.seq_nr != self.seq_nr => {
                warn!(acked = accepted.seq_nr, "read-out acknowledged with another sequence number");
            }
            Some(Err(error)) => warn!(%error, "malformed read-out acknowledgement"),
            _ => {}
        }

        let timeout = self.connection.config().read_out_timeout();
        Ok(self.done.next(timeout).await?)
    }

    fn parse(&self, stanza: &Stanza) -> Option<FieldsExtension> {
        match FieldsExtension::from_stanza(stanza)? {
            Ok(fields) => Some(fields),
            Err(error) => {
                warn!(seqnr = self.seq_nr, %error, "ignoring malformed read-out batch");
                None
            }
        }
    }

    fn cancel(&self) {
        self.connection
            .collectors()
            .cancel_together(&[&self.done, &self.data]);
    }
}

impl Drop for ReadOutSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::{config::XmppConfig, error::ConnectionError, transport::MockStanzaTransport};

    fn failing_connection(error: ConnectionError) -> Arc<XmppConnection> {
        let mut transport = MockStanzaTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(move |_| Err(error.clone()));
        transport.expect_close().return_const(());
        XmppConnection::new(Arc::new(transport), XmppConfig::default())
    }

    #[tokio::test]
    async fn transport_failure_aborts_the_read_out_and_cleans_up() {
        for error in [ConnectionError::NotConnected, ConnectionError::InterruptedWait] {
            let connection = failing_connection(error.clone());
            let session = ReadOutSession::open(&connection, 12);
            assert_eq!(connection.collectors().len(), 2);

            let sensor = Jid::from_str("sensor@example.com/node").unwrap();
            let result = session.run(&sensor).await;

            assert_eq!(result, Err(ExchangeError::Connection(error)));
            assert!(connection.collectors().is_empty());
        }
    }
}
