use std::sync::{Arc, LazyLock, Weak};

use async_trait::async_trait;
use jid::Jid;
use tracing::{debug, error, info, instrument};

use crate::{
    connection::XmppConnection,
    error::{ExchangeError, RequestHandlerError},
    iq_request::{HandlerMode, IqHandlerOutcome, IqRequestHandler},
    manager::{Manager, ManagerRegistry},
    sequence::SequenceAllocator,
    stanza::{IqType, MessageType, Stanza},
};

use super::{
    element::{DataRequest, FieldsExtension, NAMESPACE, NodeInfo, ReadOutAccepted},
    read_out::ReadOutSession,
    thing::{MomentaryReadOut, Thing, ThingRegistry},
};

static INSTANCES: LazyLock<ManagerRegistry<IotDataManager>> = LazyLock::new(ManagerRegistry::new);

/// Sensor-data read-outs on one connection, both as requester and as thing.
pub struct IotDataManager {
    connection: Arc<XmppConnection>,
    sequence: SequenceAllocator,
    things: Arc<ThingRegistry>,
}

impl Manager for IotDataManager {
    fn create(connection: &Arc<XmppConnection>) -> Self {
        let things = Arc::new(ThingRegistry::new());
        connection.register_iq_request_handler(
            DataRequest::ELEMENT,
            NAMESPACE,
            IqType::Get,
            HandlerMode::Async,
            Arc::new(ReadOutRequestHandler {
                connection: Arc::downgrade(connection),
                things: Arc::clone(&things),
            }),
        );

        Self {
            connection: Arc::clone(connection),
            sequence: SequenceAllocator::new(),
            things,
        }
    }
}

impl IotDataManager {
    /// The manager of `connection`, created on first use.
    pub fn instance_for(connection: &Arc<XmppConnection>) -> Arc<Self> {
        INSTANCES.instance_for(connection)
    }

    pub fn connection(&self) -> &Arc<XmppConnection> {
        &self.connection
    }

    pub fn install_thing(&self, thing: Thing) -> Option<Arc<Thing>> {
        info!(node = ?thing.node_info(), "installing thing");
        self.things.install(thing)
    }

    pub fn uninstall_thing(&self, thing: &Thing) -> Option<Arc<Thing>> {
        self.uninstall_node(thing.node_info())
    }

    pub fn uninstall_node(&self, node_info: &NodeInfo) -> Option<Arc<Thing>> {
        self.things.uninstall(node_info)
    }

    pub fn things(&self) -> &ThingRegistry {
        &self.things
    }

    /// Ask `jid` for its current sensor values and wait for all of them.
    ///
    /// Fails with [`ExchangeError::Timeout`] if the request is not
    /// acknowledged in time, or if no result arrives within the read-out
    /// inactivity timeout of the previous one.
    #[instrument(skip(self), fields(connection = %self.connection.id()))]
    pub async fn request_momentary_values_read_out(
        &self,
        jid: &Jid,
    ) -> Result<Vec<FieldsExtension>, ExchangeError> {
        let seq_nr = self.sequence.next();
        ReadOutSession::open(&self.connection, seq_nr).run(jid).await
    }
}

/// Answers `<req/>` with `<accepted/>` and delivers the values later: one
/// `done='false'` batch with the values, then an empty `done='true'` batch.
struct ReadOutRequestHandler {
    connection: Weak<XmppConnection>,
    things: Arc<ThingRegistry>,
}

#[async_trait]
impl IqRequestHandler for ReadOutRequestHandler {
    async fn handle_iq_request(
        &self,
        request: Stanza,
    ) -> Result<IqHandlerOutcome, RequestHandlerError> {
        let data_request = DataRequest::from_stanza(&request)
            .map_err(|error| RequestHandlerError::bad_request(error.to_string()))?;
        if !data_request.momentary {
            return Err(RequestHandlerError::not_implemented(
                "only momentary read-outs are supported",
            ));
        }

        let node_info = requested_node(&request);
        let thing = self.things.lookup(&node_info).ok_or_else(|| {
            RequestHandlerError::capability_not_found("no thing installed for node")
        })?;
        let read_out = thing.momentary_read_out().ok_or_else(|| {
            RequestHandlerError::capability_not_found("thing does not support momentary read-out")
        })?;
        let requester = request
            .from()
            .ok_or_else(|| RequestHandlerError::bad_request("read-out request without sender"))?;

        debug!(seqnr = data_request.seq_nr, %requester, "accepted momentary read-out");
        tokio::spawn(deliver_read_out(
            self.connection.clone(),
            read_out,
            node_info,
            data_request.seq_nr,
            requester,
        ));

        let accepted = ReadOutAccepted::new(data_request.seq_nr);
        Ok(IqHandlerOutcome::Reply(Stanza::iq_result_for(
            &request,
            Some(accepted.to_element()),
        )))
    }
}

/// The `<node/>` named inside `<req/>`, or the empty node.
fn requested_node(request: &Stanza) -> NodeInfo {
    request
        .child(DataRequest::ELEMENT, NAMESPACE)
        .and_then(|req| req.children().find(|child| child.is("node", NAMESPACE)))
        .map(NodeInfo::from_element)
        .unwrap_or_default()
}

async fn deliver_read_out(
    connection: Weak<XmppConnection>,
    read_out: Arc<dyn MomentaryReadOut>,
    node_info: NodeInfo,
    seq_nr: u64,
    requester: Jid,
) {
    let fields = match read_out.momentary_read_out().await {
        Ok(fields) => fields,
        Err(read_out_error) => {
            error!(seqnr = seq_nr, error = %read_out_error, "momentary read-out failed");
            return;
        }
    };

    let Some(connection) = connection.upgrade() else {
        debug!(seqnr = seq_nr, "connection gone before read-out result could be sent");
        return;
    };

    // Values travel in an interim batch; the terminal batch only ends the
    // read-out.
    let batches = [
        FieldsExtension::build_for(seq_nr, false, node_info, fields),
        FieldsExtension {
            seq_nr,
            done: true,
            nodes: Vec::new(),
        },
    ];
    for batch in batches {
        let message = Stanza::message(MessageType::Normal, Some(&requester), [batch.to_element()]);
        if let Err(send_error) = connection.send(message).await {
            error!(seqnr = seq_nr, error = %send_error, "failed to send read-out result");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        config::XmppConfig,
        iot::{element::DataField, thing::read_out_fn},
        transport::ChannelTransport,
    };

    fn connection() -> (Arc<XmppConnection>, mpsc::Receiver<Stanza>) {
        let (transport, outbound) = ChannelTransport::channel(16);
        (
            XmppConnection::new(Arc::new(transport), XmppConfig::default()),
            outbound,
        )
    }

    fn request_from(requester: &str, body: &str) -> Stanza {
        Stanza::parse(
            format!(
                "<iq xmlns='jabber:client' type='get' id='r1' from='{requester}'>{body}</iq>"
            )
            .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn requested_node_defaults_to_empty() {
        let plain = request_from(
            "a@example.com/x",
            "<req xmlns='urn:xmpp:iot:sensordata' seqnr='1' momentary='true'/>",
        );
        assert_eq!(requested_node(&plain), NodeInfo::EMPTY);

        let named = request_from(
            "a@example.com/x",
            "<req xmlns='urn:xmpp:iot:sensordata' seqnr='1' momentary='true'>\
             <node nodeId='pump'/></req>",
        );
        assert_eq!(requested_node(&named), NodeInfo::new("pump"));
    }

    #[tokio::test]
    async fn same_manager_for_same_connection() {
        let (connection, _outbound) = connection();
        let first = IotDataManager::instance_for(&connection);
        let second = IotDataManager::instance_for(&connection);
        assert!(Arc::ptr_eq(&first, &second));

        connection.close();
        let (other, _outbound) = self::connection();
        assert!(!Arc::ptr_eq(&first, &IotDataManager::instance_for(&other)));
    }

    #[tokio::test]
    async fn thing_answers_with_accepted_then_values_then_done() {
        let (connection, mut outbound) = connection();
        let manager = IotDataManager::instance_for(&connection);
        manager.install_thing(Thing::new(NodeInfo::EMPTY).with_momentary_read_out(
            read_out_fn(|| async { Ok(vec![DataField::int("temperature", 19)]) }),
        ));

        connection.process_inbound(request_from(
            "owner@example.com/app",
            "<req xmlns='urn:xmpp:iot:sensordata' seqnr='4' momentary='true'/>",
        ));

        let mut accepted = None;
        let mut batches = Vec::new();
        for _ in 0..3 {
            let stanza = outbound.recv().await.unwrap();
            if stanza.iq_type() == Some(IqType::Result) {
                accepted = Some(stanza);
            } else {
                batches.push(stanza);
            }
        }

        let accepted = accepted.unwrap();
        let ack = ReadOutAccepted::from_element(
            accepted.child(ReadOutAccepted::ELEMENT, NAMESPACE).unwrap(),
        )
        .unwrap();
        assert_eq!(ack.seq_nr, 4);

        let [values, terminal] = <[Stanza; 2]>::try_from(batches).unwrap();
        assert_eq!(values.to().unwrap().to_string(), "owner@example.com/app");
        let values = FieldsExtension::from_stanza(&values).unwrap().unwrap();
        assert_eq!(values.seq_nr, 4);
        assert!(!values.done);
        assert_eq!(values.nodes[0].fields().count(), 1);

        let terminal = FieldsExtension::from_stanza(&terminal).unwrap().unwrap();
        assert_eq!(terminal.seq_nr, 4);
        assert!(terminal.done);
        assert!(terminal.is_empty());
    }
}
