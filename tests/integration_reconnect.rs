//! Reconnect and connect-per-send integration tests. These run with short
//! keepalive budgets and real backoff delays, so they are the slowest tests
//! in the suite.

mod common;

use std::time::Duration;

use anyhow::Result;
use parodus_client::{Config, ParodusClient, WrpEvent, WrpMessage};
use tokio::time::sleep;

use common::{free_port, init_logging, url_for, MockBroker};

/// Broker silence beyond the keepalive budget drives the reconnect loop:
/// after the broker comes back, it observes a fresh registration and the
/// reconnect counter has advanced.
#[tokio::test]
async fn silence_triggers_reconnect_and_reregistration() -> Result<()> {
    init_logging();
    let broker_port = free_port();
    let mut broker = MockBroker::start(broker_port).await?;
    let client_url = url_for(free_port());

    let cfg = Config {
        parodus_url: url_for(broker_port),
        client_url,
        keepalive_timeout_secs: 1,
        ..Config::new("iot")
    };
    let mut client = ParodusClient::init(cfg).await?;
    broker.expect_message(Duration::from_secs(2)).await?; // initial registration

    // take the broker away; the first backoff window expires against a dead
    // endpoint, then the revived broker sees the re-registration
    broker.stop();
    sleep(Duration::from_secs(2)).await;
    let mut broker = MockBroker::start(broker_port).await?;

    match broker.expect_message(Duration::from_secs(15)).await? {
        WrpMessage::ServiceRegistration { service_name, .. } => {
            assert_eq!(service_name, "iot");
        }
        other => panic!("expected re-registration, got {}", other.kind()),
    }
    assert!(client.reconnect_count() >= 1);
    assert!(!client.is_auth_received());

    client.shutdown().await?;
    Ok(())
}

/// Connect-per-send (via the `test:` URL prefix): every send opens its own
/// connection to the broker and closes it afterwards.
#[tokio::test]
async fn test_prefix_connects_once_per_send() -> Result<()> {
    init_logging();
    let mut broker = MockBroker::start(0).await?;

    let cfg = Config {
        receive: false,
        parodus_url: format!("test:{}", broker.url()),
        client_url: url_for(free_port()),
        ..Config::new("iot")
    };
    let mut client = ParodusClient::init(cfg).await?;

    for n in 0..10u8 {
        let event = WrpMessage::Event(WrpEvent::new("iot", "event:counter/tick", vec![n]));
        client.send(&event).await?;
    }
    for _ in 0..10 {
        assert_eq!(
            broker.expect_message(Duration::from_secs(2)).await?.kind(),
            "event"
        );
    }
    assert_eq!(broker.connection_count(), 10);

    client.shutdown().await?;
    Ok(())
}
