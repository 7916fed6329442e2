use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use broker::{Broker, BrokerConfig};
use broker_client::{BrokerClient, ClientConfig, ClientError, Endpoint, ProcessEvent, TransmissionError};

const TOKEN: &str = "secret";

struct Running {
    tcp: SocketAddr,
    ws: SocketAddr,
}

async fn start_broker() -> Running {
    let mut config = BrokerConfig::new(TOKEN);
    config.bind_addr = Ipv4Addr::LOCALHOST.into();
    config.tcp_port = Some(0);
    config.ws_port = Some(0);
    let broker = Broker::bind(config).await.expect("bind broker");
    let running = Running {
        tcp: broker.tcp_addr().expect("tcp addr"),
        ws: broker.ws_addr().expect("ws addr"),
    };
    tokio::spawn(broker.serve());
    running
}

fn tcp(name: &str, running: &Running) -> ClientConfig {
    ClientConfig::new(name, TOKEN, Endpoint::Tcp(running.tcp)).with_request_timeout(Duration::from_secs(2))
}

fn ws(name: &str, running: &Running) -> ClientConfig {
    ClientConfig::new(name, TOKEN, Endpoint::Ws(format!("ws://{}/ws", running.ws)))
        .with_request_timeout(Duration::from_secs(2))
}

async fn next_event(events: &mut tokio::sync::mpsc::UnboundedReceiver<ProcessEvent>) -> ProcessEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn a_sends_test_to_b_and_gets_ok() {
    let running = start_broker().await;
    let b = BrokerClient::connect(tcp("B", &running)).await.expect("B connects");
    b.on_transmission("TEST", |t| async move {
        if t.origin == "A" && t.data == "1" {
            Ok("ok".to_owned())
        } else {
            Err(format!("unexpected transmission from {} with {}", t.origin, t.data))
        }
    });
    let a = BrokerClient::connect(tcp("A", &running)).await.expect("A connects");

    assert_eq!(a.transmit_value("TEST", "B", "1").await, Ok("ok".to_owned()));
}

#[tokio::test]
async fn absent_target_is_process_not_found() {
    let running = start_broker().await;
    let a = BrokerClient::connect(tcp("A", &running)).await.expect("A connects");

    let outcome = a.transmit_value("TEST", "B", "1").await;
    assert!(matches!(outcome, Err(TransmissionError::ProcessNotFound(_))), "{outcome:?}");
}

#[tokio::test]
async fn invalid_token_is_rejected_and_never_listed() {
    let running = start_broker().await;
    let a = BrokerClient::connect(tcp("A", &running)).await.expect("A connects");

    let mut bad = tcp("X", &running);
    bad.token = "wrong".into();
    let err = BrokerClient::connect(bad).await.err().expect("X rejected");
    assert!(matches!(err, ClientError::Rejected(ref name) if name == "X"), "{err:?}");

    let listed = a.list_available_processes().await.expect("listing");
    assert!(!listed.contains(&"X".to_owned()));
}

#[tokio::test]
async fn peers_see_registration_and_termination() {
    let running = start_broker().await;
    let a = BrokerClient::connect(tcp("A", &running)).await.expect("A connects");
    let (_id, mut events) = a.events();

    let b = BrokerClient::connect(tcp("B", &running)).await.expect("B connects");
    assert_eq!(next_event(&mut events).await, ProcessEvent::Registered("B".into()));

    b.disconnect().await.expect("B disconnects");
    assert_eq!(next_event(&mut events).await, ProcessEvent::Ended("B".into()));
}

#[tokio::test]
async fn websocket_and_tcp_clients_interoperate() {
    let running = start_broker().await;
    let b = BrokerClient::connect(ws("B", &running)).await.expect("B connects over ws");
    b.on_transmission("ECHO", |t| async move { Ok(t.data) });
    let a = BrokerClient::connect(tcp("A", &running)).await.expect("A connects over tcp");

    let large = "x".repeat(10_000);
    assert_eq!(a.transmit_value("ECHO", "B", large.clone()).await, Ok(large));
}

#[tokio::test]
async fn broadcast_reaches_every_peer() {
    let running = start_broker().await;
    let mut peers = Vec::new();
    for name in ["B", "C", "D"] {
        let peer = BrokerClient::connect(tcp(name, &running)).await.expect("peer connects");
        let own = name.to_owned();
        peer.on_transmission("WHO", move |_| {
            let own = own.clone();
            async move { Ok(own) }
        });
        peers.push(peer);
    }
    let a = BrokerClient::connect(tcp("A", &running)).await.expect("A connects");

    let mut outcomes = a.broadcast("WHO", "").await.expect("broadcast");
    outcomes.sort_by(|x, y| x.0.cmp(&y.0));
    let replies: Vec<(String, Result<String, TransmissionError>)> = ["B", "C", "D"]
        .iter()
        .map(|n| ((*n).to_owned(), Ok((*n).to_owned())))
        .collect();
    assert_eq!(outcomes, replies);
}

#[tokio::test]
async fn silent_peer_times_out() {
    let running = start_broker().await;
    let b = BrokerClient::connect(tcp("B", &running)).await.expect("B connects");
    b.on_transmission("HANG", |_| std::future::pending::<Result<String, String>>());
    let a = BrokerClient::connect(tcp("A", &running).with_request_timeout(Duration::from_millis(200)))
        .await
        .expect("A connects");

    let started = std::time::Instant::now();
    assert_eq!(a.transmit_value("HANG", "B", "").await, Err(TransmissionError::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn reconnecting_under_same_name_replaces_old_client() {
    let running = start_broker().await;
    let old = BrokerClient::connect(tcp("A", &running)).await.expect("first A");
    let (_id, mut old_events) = old.events();
    let _new = BrokerClient::connect(tcp("A", &running)).await.expect("second A");

    assert_eq!(next_event(&mut old_events).await, ProcessEvent::Disconnected);
    let observer = BrokerClient::connect(tcp("P", &running)).await.expect("observer");
    assert_eq!(observer.list_available_processes().await, Ok(vec!["A".to_owned()]));
}
