//! Lifecycle integration tests: init/registration, send-only clients,
//! close_receiver semantics, and idempotent shutdown.

mod common;

use std::time::Duration;

use anyhow::Result;
use parodus_client::{
    Config, Error, ParodusClient, ReceiveOutcome, WrpEvent, WrpMessage,
};

use common::{connect_to_client, free_port, init_logging, push_message, url_for, MockBroker};

/// Happy path: init against a live broker produces exactly one registration
/// frame carrying the service name and the inbound URL.
#[tokio::test]
async fn init_sends_one_registration_frame() -> Result<()> {
    init_logging();
    let mut broker = MockBroker::start(0).await?;
    let client_url = url_for(free_port());

    let cfg = Config {
        parodus_url: broker.url().to_string(),
        client_url: client_url.clone(),
        keepalive_timeout_secs: 30,
        ..Config::new("iot")
    };
    let mut client = ParodusClient::init(cfg).await?;

    match broker.expect_message(Duration::from_secs(2)).await? {
        WrpMessage::ServiceRegistration { service_name, url } => {
            assert_eq!(service_name, "iot");
            assert_eq!(url, client_url);
        }
        other => panic!("expected registration, got {}", other.kind()),
    }
    broker.expect_silence(Duration::from_millis(300)).await?;

    client.shutdown().await?;
    Ok(())
}

/// A send-only client creates no inbound machinery: receive and
/// close_receiver report the missing receive option, sends still work.
#[tokio::test]
async fn send_only_client_has_no_receive_path() -> Result<()> {
    init_logging();
    let mut broker = MockBroker::start(0).await?;

    let cfg = Config {
        receive: false,
        parodus_url: broker.url().to_string(),
        client_url: url_for(free_port()),
        ..Config::new("iot")
    };
    let mut client = ParodusClient::init(cfg).await?;

    assert!(matches!(
        client.receive(Duration::from_millis(50)).await,
        Err(Error::ReceiveCfg)
    ));
    assert!(matches!(
        client.close_receiver().await,
        Err(Error::CloseReceiverCfg)
    ));

    let event = WrpMessage::Event(WrpEvent::new("iot", "event:status/up", b"hi".to_vec()));
    client.send(&event).await?;
    assert_eq!(
        broker.expect_message(Duration::from_secs(2)).await?.kind(),
        "event"
    );

    client.shutdown().await?;
    Ok(())
}

/// close_receiver is a consumer-side signal: the first non-timeout receive
/// returns Closed, and the broker can still enqueue messages afterwards.
#[tokio::test]
async fn close_receiver_delivers_closed_marker_only_to_the_consumer() -> Result<()> {
    init_logging();
    let mut broker = MockBroker::start(0).await?;
    let client_url = url_for(free_port());

    let cfg = Config {
        parodus_url: broker.url().to_string(),
        client_url: client_url.clone(),
        ..Config::new("iot")
    };
    let mut client = ParodusClient::init(cfg).await?;
    broker.expect_message(Duration::from_secs(2)).await?; // registration

    client.close_receiver().await?;
    let outcome = loop {
        match client.receive(Duration::from_millis(100)).await? {
            ReceiveOutcome::TimedOut => continue,
            outcome => break outcome,
        }
    };
    assert!(matches!(outcome, ReceiveOutcome::Closed));

    // inbound traffic still flows after the marker
    let mut push = connect_to_client(&client_url).await?;
    let event = WrpMessage::Event(WrpEvent::new(
        "mac:112233445566",
        "event:foo/iot/",
        b"post-close".to_vec(),
    ));
    push_message(&mut push, &event).await?;

    match client.receive(Duration::from_secs(2)).await? {
        ReceiveOutcome::Message(WrpMessage::Event(ev)) => {
            assert_eq!(ev.payload, b"post-close".to_vec());
        }
        other => panic!("expected event, got {:?}", other),
    }

    client.shutdown().await?;
    Ok(())
}

/// Shutdown is idempotent and gates the API afterwards.
#[tokio::test]
async fn shutdown_twice_succeeds_and_gates_the_api() -> Result<()> {
    init_logging();
    let mut broker = MockBroker::start(0).await?;

    let cfg = Config {
        parodus_url: broker.url().to_string(),
        client_url: url_for(free_port()),
        ..Config::new("iot")
    };
    let mut client = ParodusClient::init(cfg).await?;
    broker.expect_message(Duration::from_secs(2)).await?; // registration

    client.shutdown().await?;
    client.shutdown().await?;

    let event = WrpMessage::Event(WrpEvent::new("iot", "event:status/up", vec![]));
    assert!(matches!(client.send(&event).await, Err(Error::SendState)));
    assert!(matches!(
        client.receive(Duration::from_millis(50)).await,
        Err(Error::ReceiveState)
    ));
    assert!(matches!(
        client.close_receiver().await,
        Err(Error::CloseReceiverState)
    ));
    Ok(())
}
