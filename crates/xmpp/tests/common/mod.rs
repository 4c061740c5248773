//! Test utilities for stanza correlation.
//!
//! Provides a connection whose outbound stanzas the test can read, builders
//! for the stanzas a remote sensor would send back, and a pair of
//! connections wired back to back as if through a server.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use jid::Jid;
use perch_xmpp::{
    ChannelTransport, IqType, MessageType, Stanza, XmppConfig, XmppConnection,
    iot::{DataField, DataRequest, FieldsExtension, NAMESPACE, NodeInfo, ReadOutAccepted},
};
use tokio::{sync::mpsc, time::timeout};

pub const SENSOR: &str = "sensor@example.com/node";
pub const OWNER: &str = "owner@example.com/app";

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn jid(raw: &str) -> Jid {
    raw.parse().expect("valid test JID")
}

/// A connection plus the receiving end of everything it sends.
pub fn requester() -> (Arc<XmppConnection>, mpsc::Receiver<Stanza>) {
    requester_with(XmppConfig::default())
}

pub fn requester_with(config: XmppConfig) -> (Arc<XmppConnection>, mpsc::Receiver<Stanza>) {
    let (transport, outbound) = ChannelTransport::channel(64);
    (XmppConnection::new(Arc::new(transport), config), outbound)
}

pub async fn next_sent(outbound: &mut mpsc::Receiver<Stanza>) -> Stanza {
    timeout(DEFAULT_TIMEOUT, outbound.recv())
        .await
        .expect("timed out waiting for outbound stanza")
        .expect("transport closed")
}

/// Sequence number of a sent `<req/>` IQ.
pub fn seq_nr_of(request: &Stanza) -> u64 {
    DataRequest::from_stanza(request)
        .expect("stanza carries a read-out request")
        .seq_nr
}

/// The sensor's `<accepted/>` answer to `request`.
pub fn accepted_for(request: &Stanza) -> Stanza {
    let accepted = ReadOutAccepted::new(seq_nr_of(request));
    Stanza::iq_with_id(
        IqType::Result,
        request.id().expect("request id"),
        Some(&jid(OWNER)),
        Some(accepted.to_element()),
    )
    .with_from(&jid(SENSOR))
}

/// A `<fields/>` batch from the sensor. An empty `fields` slice yields a
/// batch without nodes.
pub fn fields_message(seq_nr: u64, done: bool, fields: &[DataField]) -> Stanza {
    let extension = if fields.is_empty() {
        FieldsExtension {
            seq_nr,
            done,
            nodes: Vec::new(),
        }
    } else {
        FieldsExtension::build_for(seq_nr, done, NodeInfo::EMPTY, fields.to_vec())
    };
    Stanza::message(MessageType::Normal, Some(&jid(OWNER)), [extension.to_element()])
        .with_from(&jid(SENSOR))
}

/// An IQ error answer to `request`.
pub fn error_for(request: &Stanza, condition: &str) -> Stanza {
    Stanza::parse(
        format!(
            "<iq xmlns='jabber:client' type='error' id='{}' from='{SENSOR}' to='{OWNER}'>\
             <error type='cancel'><{condition} xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
             </error></iq>",
            request.id().expect("request id")
        )
        .as_bytes(),
    )
    .expect("valid error stanza")
}

/// A raw `<req/>` IQ as a remote requester would send it.
pub fn read_out_request(seq_nr: u64, momentary: bool) -> Stanza {
    let momentary = if momentary { " momentary='true'" } else { "" };
    Stanza::parse(
        format!(
            "<iq xmlns='jabber:client' type='get' id='req-{seq_nr}' from='{OWNER}' to='{SENSOR}'>\
             <req xmlns='{NAMESPACE}' seqnr='{seq_nr}'{momentary}/></iq>"
        )
        .as_bytes(),
    )
    .expect("valid request stanza")
}

/// Two connections whose outbound stanzas are delivered to each other,
/// stamped with the sender's address the way a server would.
pub struct LinkedPair {
    pub owner: Arc<XmppConnection>,
    pub sensor: Arc<XmppConnection>,
}

impl LinkedPair {
    pub fn new() -> Self {
        let (owner_transport, owner_outbound) = ChannelTransport::channel(64);
        let (sensor_transport, sensor_outbound) = ChannelTransport::channel(64);
        let owner = XmppConnection::new(Arc::new(owner_transport), XmppConfig::default());
        let sensor = XmppConnection::new(Arc::new(sensor_transport), XmppConfig::default());

        pump(owner_outbound, jid(OWNER), Arc::clone(&sensor));
        pump(sensor_outbound, jid(SENSOR), Arc::clone(&owner));

        Self { owner, sensor }
    }
}

fn pump(mut outbound: mpsc::Receiver<Stanza>, from: Jid, to: Arc<XmppConnection>) {
    tokio::spawn(async move {
        while let Some(stanza) = outbound.recv().await {
            to.process_inbound(stanza.with_from(&from));
        }
    });
}
