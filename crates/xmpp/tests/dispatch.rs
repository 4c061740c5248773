mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use perch_xmpp::{
    ExchangeError, HandlerMode, IqHandlerOutcome, IqRequestHandler, IqType, RequestHandlerError,
    Stanza, StanzaErrorCondition, StanzaKindFilter,
    iot::{IotDataManager, NodeInfo, Thing},
};
use tokio::sync::Notify;
use tokio_test::assert_err;

use common::{LinkedPair, SENSOR, jid, next_sent, read_out_request, requester};

const SLOW_NS: &str = "urn:example:slow";

/// Blocks until released, counting how many requests it has started.
struct Stuck {
    started: Arc<AtomicUsize>,
    release: Arc<Notify>,
}

#[async_trait]
impl IqRequestHandler for Stuck {
    async fn handle_iq_request(
        &self,
        request: Stanza,
    ) -> Result<IqHandlerOutcome, RequestHandlerError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(IqHandlerOutcome::Reply(Stanza::iq_result_for(&request, None)))
    }
}

fn slow_request(id: &str) -> Stanza {
    Stanza::parse(
        format!(
            "<iq xmlns='jabber:client' type='set' id='{id}' from='{}'>\
             <work xmlns='{SLOW_NS}'/></iq>",
            common::OWNER
        )
        .as_bytes(),
    )
    .unwrap()
}

#[tokio::test]
async fn slow_handler_does_not_hold_up_other_stanzas() {
    let (connection, mut outbound) = requester();
    let started = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());
    connection.register_iq_request_handler(
        "work",
        SLOW_NS,
        IqType::Set,
        HandlerMode::Sync,
        Arc::new(Stuck {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        }),
    );
    let messages = connection.create_collector(StanzaKindFilter::Message);

    connection.process_inbound(slow_request("w1"));
    connection.process_inbound(slow_request("w2"));
    connection.process_inbound(common::fields_message(1, false, &[]));

    // Delivery to the collector happened on the reading path already.
    assert_eq!(messages.len(), 1);

    // An unrelated request is answered while the handler is still stuck.
    connection.process_inbound(read_out_request(1, true));
    let reply = next_sent(&mut outbound).await;
    assert_eq!(reply.id(), Some("req-1"));
    assert_eq!(
        reply.stanza_error().unwrap().0,
        StanzaErrorCondition::ServiceUnavailable
    );

    // Sync mode: the second request waits for the first.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);

    release.notify_one();
    assert_eq!(next_sent(&mut outbound).await.id(), Some("w1"));
    release.notify_one();
    assert_eq!(next_sent(&mut outbound).await.id(), Some("w2"));
    assert_eq!(started.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn read_out_of_missing_thing_is_item_not_found() {
    let pair = LinkedPair::new();
    // Registers the request handler on the sensor side without any thing.
    IotDataManager::instance_for(&pair.sensor);

    let owner = IotDataManager::instance_for(&pair.owner);
    let error = assert_err!(owner.request_momentary_values_read_out(&jid(SENSOR)).await);

    assert!(matches!(
        error,
        ExchangeError::Stanza {
            condition: StanzaErrorCondition::ItemNotFound,
            ..
        }
    ));
    assert!(pair.owner.collectors().is_empty());
}

#[tokio::test]
async fn thing_without_momentary_read_out_is_item_not_found() {
    let pair = LinkedPair::new();
    IotDataManager::instance_for(&pair.sensor).install_thing(Thing::new(NodeInfo::EMPTY));

    let owner = IotDataManager::instance_for(&pair.owner);
    let error = assert_err!(owner.request_momentary_values_read_out(&jid(SENSOR)).await);

    assert!(matches!(
        error,
        ExchangeError::Stanza {
            condition: StanzaErrorCondition::ItemNotFound,
            ..
        }
    ));
}

#[tokio::test]
async fn non_momentary_request_is_not_implemented() {
    let (connection, mut outbound) = requester();
    IotDataManager::instance_for(&connection).install_thing(Thing::new(NodeInfo::EMPTY));

    connection.process_inbound(read_out_request(2, false));

    let reply = next_sent(&mut outbound).await;
    let (condition, _, text) = reply.stanza_error().unwrap();
    assert_eq!(condition, StanzaErrorCondition::FeatureNotImplemented);
    assert!(text.unwrap().contains("momentary"));
}

#[tokio::test]
async fn peer_without_sensor_support_is_service_unavailable() {
    let pair = LinkedPair::new();

    let owner = IotDataManager::instance_for(&pair.owner);
    let error = assert_err!(owner.request_momentary_values_read_out(&jid(SENSOR)).await);

    assert!(matches!(
        error,
        ExchangeError::Stanza {
            condition: StanzaErrorCondition::ServiceUnavailable,
            ..
        }
    ));
}
