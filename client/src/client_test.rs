use super::*;
use crate::config::Endpoint;
use frames::{Framer, WireConfig};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

const TOKEN: &str = "secret";

/// Plays the broker's side of a link.
struct FakeBroker {
    to_client: Option<mpsc::Sender<Vec<u8>>>,
    from_client: mpsc::Receiver<Vec<u8>>,
    codec: Codec,
    framer: Framer,
    inbox: VecDeque<Message>,
    factory: MessageFactory,
}

impl FakeBroker {
    async fn send(&self, message: &Message) {
        let bytes = self.codec.encode_frame(message).expect("encode");
        self.to_client.as_ref().expect("link open").send(bytes).await.expect("client gone");
    }

    async fn recv(&mut self) -> Message {
        loop {
            if let Some(message) = self.inbox.pop_front() {
                return message;
            }
            let bytes = tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
                .await
                .expect("timed out waiting for client")
                .expect("client link closed");
            self.inbox.extend(self.framer.append(&bytes));
        }
    }

    async fn update(&self, identifier: &str, target: &str, accepted: bool, name: &str) {
        let update = ProcessUpdateData { accepted, name: name.into() };
        let message = self.factory.process_update(identifier, target, &update).expect("update");
        self.send(&message).await;
    }

    fn close(&mut self) {
        self.to_client = None;
    }
}

fn config(name: &str) -> ClientConfig {
    ClientConfig::new(name, TOKEN, Endpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], 0))))
        .with_request_timeout(Duration::from_millis(500))
}

fn link(wire: &WireConfig) -> (Link, FakeBroker) {
    let (outbound, from_client) = mpsc::channel(64);
    let (to_client, inbound) = mpsc::channel(64);
    let broker = FakeBroker {
        to_client: Some(to_client),
        from_client,
        codec: wire.codec(),
        framer: wire.framer(),
        inbox: VecDeque::new(),
        factory: wire.factory(),
    };
    (Link { outbound, inbound }, broker)
}

async fn connected(name: &str) -> (BrokerClient, FakeBroker) {
    let config = config(name);
    let (link, mut broker) = link(&config.wire);
    let connecting = tokio::spawn(BrokerClient::establish(config, link, CancellationToken::new()));

    let register = broker.recv().await;
    assert_eq!(register.identifier, PROCESS_REGISTER);
    assert_eq!(register.origin, name);
    assert_eq!(register.payload().expect("payload"), TOKEN);
    broker.update(PROCESS_REGISTER, name, true, name).await;

    let client = connecting.await.expect("join").expect("connect");
    (client, broker)
}

#[tokio::test]
async fn connect_registers_with_token() {
    let (client, _broker) = connected("A").await;
    assert_eq!(client.name(), "A");
    assert!(client.is_connected());
}

#[tokio::test]
async fn rejected_registration_is_an_error() {
    let config = config("X");
    let (link, mut broker) = link(&config.wire);
    let connecting = tokio::spawn(BrokerClient::establish(config, link, CancellationToken::new()));
    broker.recv().await;
    broker.update(PROCESS_REGISTER, "X", false, "X").await;

    let err = connecting.await.expect("join").err().expect("rejected");
    assert!(matches!(err, ClientError::Rejected(name) if name == "X"));
}

#[tokio::test]
async fn link_closing_before_confirmation_is_disconnected() {
    let config = config("A");
    let (link, mut broker) = link(&config.wire);
    let connecting = tokio::spawn(BrokerClient::establish(config, link, CancellationToken::new()));
    broker.recv().await;
    broker.close();

    let err = connecting.await.expect("join").err().expect("disconnected");
    assert!(matches!(err, ClientError::Disconnected));
}

#[tokio::test]
async fn transmit_value_resolves_with_response() {
    let (client, mut broker) = connected("A").await;

    let call = tokio::spawn(async move {
        let outcome = client.transmit_value("TEST", "B", "1").await;
        (client, outcome)
    });
    let request = broker.recv().await;
    assert_eq!(request.kind, MessageType::Request);
    assert_eq!(request.origin, "A");
    assert_eq!(request.target, "B");
    assert_eq!(request.data, "1");

    let reply = broker.factory.response(&request, "B", Ok("ok".into())).expect("reply");
    broker.send(&reply).await;

    let (_client, outcome) = call.await.expect("join");
    assert_eq!(outcome, Ok("ok".to_owned()));
}

#[tokio::test]
async fn process_not_found_is_distinct_from_timeout() {
    let (client, mut broker) = connected("A").await;
    let call = tokio::spawn(async move {
        let outcome = client.transmit_value("TEST", "B", "1").await;
        (client, outcome)
    });
    let request = broker.recv().await;
    broker.send(&MessageFactory::failure(&request, MessageStatus::ProcessNotFound)).await;

    let (_client, outcome) = call.await.expect("join");
    assert!(matches!(outcome, Err(TransmissionError::ProcessNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let (client, mut broker) = connected("A").await;
    let started = tokio::time::Instant::now();
    let call = tokio::spawn(async move {
        let outcome = client.transmit_value("TEST", "B", "1").await;
        (client, outcome)
    });
    let request = broker.recv().await;

    let (client, outcome) = call.await.expect("join");
    assert_eq!(outcome, Err(TransmissionError::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(500));

    // A response after the deadline is dropped without effect.
    let late = broker.factory.response(&request, "B", Ok("late".into())).expect("reply");
    broker.send(&late).await;
    tokio::task::yield_now().await;
    assert!(client.inner.pending.is_empty());
}

#[tokio::test]
async fn transmit_object_round_trips_json() {
    #[derive(serde::Serialize)]
    struct Query {
        n: u32,
    }
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Answer {
        doubled: u32,
    }

    let (client, mut broker) = connected("A").await;
    let call = tokio::spawn(async move {
        let outcome: Result<Answer, _> = client.transmit_object("DOUBLE", "B", &Query { n: 21 }).await;
        (client, outcome)
    });
    let request = broker.recv().await;
    assert_eq!(request.data, r#"{"n":21}"#);
    broker
        .send(&broker.factory.response(&request, "B", Ok(r#"{"doubled":42}"#.into())).expect("reply"))
        .await;

    let (_client, outcome) = call.await.expect("join");
    assert_eq!(outcome, Ok(Answer { doubled: 42 }));
}

#[tokio::test]
async fn handler_success_becomes_success_response() {
    let (client, mut broker) = connected("B").await;
    client.on_transmission("TEST", |t| async move {
        assert_eq!(t.origin, "A");
        assert_eq!(t.data, "1");
        Ok("ok".to_owned())
    });

    let request = broker.factory.request("TEST", "A", "B", "1").expect("request");
    broker.send(&request).await;

    let reply = broker.recv().await;
    assert_eq!(reply.id, request.id);
    assert_eq!(reply.kind, MessageType::Response);
    assert_eq!(reply.status, MessageStatus::Success);
    assert_eq!(reply.origin, "B");
    assert_eq!(reply.target, "A");
    assert_eq!(reply.data, "ok");
}

#[tokio::test]
async fn handler_failure_becomes_target_error() {
    let (client, mut broker) = connected("B").await;
    client.on_transmission("TEST", |_| async { Err("nope".to_owned()) });

    broker.send(&broker.factory.request("TEST", "A", "B", "1").expect("request")).await;

    let reply = broker.recv().await;
    assert_eq!(reply.status, MessageStatus::TargetError);
    assert_eq!(reply.error.as_deref(), Some("nope"));
}

#[tokio::test]
async fn missing_handler_becomes_target_error() {
    let (_client, mut broker) = connected("B").await;
    broker.send(&broker.factory.request("UNHANDLED", "A", "B", "1").expect("request")).await;

    let reply = broker.recv().await;
    assert_eq!(reply.status, MessageStatus::TargetError);
    assert!(reply.error.as_deref().is_some_and(|e| e.contains("UNHANDLED")));
}

#[tokio::test]
async fn slow_handler_does_not_block_others() {
    let (client, mut broker) = connected("B").await;
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);
    client.on_transmission("SLOW", move |_| {
        let mut release = release_rx.clone();
        async move {
            let _ = release.wait_for(|go| *go).await;
            Ok("slow".to_owned())
        }
    });
    client.on_transmission("FAST", |_| async { Ok("fast".to_owned()) });

    broker.send(&broker.factory.request("SLOW", "A", "B", "").expect("request")).await;
    broker.send(&broker.factory.request("FAST", "A", "B", "").expect("request")).await;

    assert_eq!(broker.recv().await.data, "fast");
    release_tx.send(true).expect("release");
    assert_eq!(broker.recv().await.data, "slow");
}

#[tokio::test]
async fn notify_does_not_expect_a_response() {
    let (client, mut broker) = connected("A").await;
    client.notify("PING", "B", "hi").await.expect("notify");

    let message = broker.recv().await;
    assert_eq!(message.kind, MessageType::Unknown);
    assert_eq!(message.identifier, "PING");
    assert!(client.inner.pending.is_empty());
}

#[tokio::test]
async fn notification_runs_handler_without_reply() {
    let (client, mut broker) = connected("B").await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    client.on_transmission("PING", move |t| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(t.data);
            Ok(String::new())
        }
    });

    let mut message = broker.factory.request("PING", "A", "B", "hi").expect("request");
    message.kind = MessageType::Unknown;
    broker.send(&message).await;

    assert_eq!(seen_rx.recv().await.as_deref(), Some("hi"));
    tokio::task::yield_now().await;
    assert!(broker.from_client.try_recv().is_err());
}

#[tokio::test]
async fn list_available_processes_returns_names() {
    let (client, mut broker) = connected("A").await;
    let call = tokio::spawn(async move {
        let outcome = client.list_available_processes().await;
        (client, outcome)
    });

    let request = broker.recv().await;
    assert_eq!(request.identifier, REQUEST_PROCESSES_INFO);
    assert_eq!(request.target, BROKER_NAME);
    let processes = vec![RemoteProcessData { name: "B".into() }, RemoteProcessData { name: "C".into() }];
    broker.send(&broker.factory.process_listing("A", &processes).expect("listing")).await;

    let (_client, outcome) = call.await.expect("join");
    assert_eq!(outcome, Ok(vec!["B".to_owned(), "C".to_owned()]));
}

#[tokio::test(start_paused = true)]
async fn late_listing_reply_is_not_handed_to_next_caller() {
    let (client, mut broker) = connected("A").await;
    assert_eq!(client.list_available_processes().await, Err(TransmissionError::Timeout));
    assert_eq!(broker.recv().await.identifier, REQUEST_PROCESSES_INFO);

    let call = tokio::spawn(async move {
        let outcome = client.list_available_processes().await;
        (client, outcome)
    });
    assert_eq!(broker.recv().await.identifier, REQUEST_PROCESSES_INFO);
    let stale = vec![RemoteProcessData { name: "OLD".into() }];
    let fresh = vec![RemoteProcessData { name: "B".into() }];
    broker.send(&broker.factory.process_listing("A", &stale).expect("listing")).await;
    broker.send(&broker.factory.process_listing("A", &fresh).expect("listing")).await;

    let (client, outcome) = call.await.expect("join");
    assert_eq!(outcome, Ok(vec!["B".to_owned()]));
    assert!(client.inner.listings.lock().unwrap_or_else(PoisonError::into_inner).is_empty());
}

#[tokio::test(start_paused = true)]
async fn full_outbound_queue_times_out_instead_of_hanging() {
    let (client, _broker) = connected("A").await;
    // The broker side never reads, so the link's 64 slots fill up.
    for i in 0..64 {
        client.notify("FILL", "B", i.to_string()).await.expect("queued");
    }

    let started = tokio::time::Instant::now();
    let outcome = tokio::time::timeout(Duration::from_secs(60), client.transmit_value("TEST", "B", "1"))
        .await
        .expect("transmit returns within its own deadline");
    assert_eq!(outcome, Err(TransmissionError::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(client.inner.pending.is_empty());

    let listing = tokio::time::timeout(Duration::from_secs(60), client.list_available_processes())
        .await
        .expect("listing returns within its own deadline");
    assert_eq!(listing, Err(TransmissionError::Timeout));
    assert!(client.inner.listings.lock().unwrap_or_else(PoisonError::into_inner).is_empty());

    let notified = tokio::time::timeout(Duration::from_secs(60), client.notify("FILL", "B", "late"))
        .await
        .expect("notify returns within its own deadline");
    assert_eq!(notified, Err(TransmissionError::Timeout));
}

#[tokio::test]
async fn broadcast_collects_each_peer_outcome() {
    let (client, mut broker) = connected("A").await;
    let call = tokio::spawn(async move {
        let outcome = client.broadcast("TEST", "x").await;
        (client, outcome)
    });

    broker.recv().await;
    let processes = vec![RemoteProcessData { name: "B".into() }, RemoteProcessData { name: "C".into() }];
    broker.send(&broker.factory.process_listing("A", &processes).expect("listing")).await;

    for _ in 0..2 {
        let request = broker.recv().await;
        let reply = if request.target == "B" {
            broker.factory.response(&request, "B", Ok("from B".into())).expect("reply")
        } else {
            MessageFactory::failure(&request, MessageStatus::TargetError)
        };
        broker.send(&reply).await;
    }

    let (_client, outcome) = call.await.expect("join");
    let mut outcome = outcome.expect("listing");
    outcome.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(outcome[0], ("B".to_owned(), Ok("from B".to_owned())));
    assert_eq!(outcome[1].0, "C");
    assert!(matches!(outcome[1].1, Err(TransmissionError::TargetError(_))));
}

#[tokio::test]
async fn events_arrive_in_order() {
    let (client, broker) = connected("A").await;
    let (_id, mut events) = client.events();

    broker.update(PROCESS_REGISTER, "A", true, "B").await;
    broker.update(PROCESS_REGISTER, "A", false, "X").await;
    broker.update(PROCESS_TERMINATE, "A", true, "B").await;
    broker
        .send(&broker.factory.process_listing("A", &[RemoteProcessData { name: "C".into() }]).expect("listing"))
        .await;

    assert_eq!(events.recv().await, Some(ProcessEvent::Registered("B".into())));
    assert_eq!(events.recv().await, Some(ProcessEvent::Ended("B".into())));
    assert_eq!(events.recv().await, Some(ProcessEvent::Fetched(vec!["C".into()])));
}

#[tokio::test]
async fn broker_closing_fails_pending_and_emits_disconnected() {
    let (client, mut broker) = connected("A").await;
    let (_id, mut events) = client.events();
    let client = Arc::new(client);

    let caller = client.clone();
    let call = tokio::spawn(async move { caller.transmit_value("TEST", "B", "1").await });
    broker.recv().await;
    broker.close();

    assert_eq!(call.await.expect("join"), Err(TransmissionError::Disconnected));
    assert_eq!(events.recv().await, Some(ProcessEvent::Disconnected));
    assert!(!client.is_connected());
    assert_eq!(client.transmit_value("TEST", "B", "2").await, Err(TransmissionError::Disconnected));
}

#[tokio::test]
async fn disconnect_sends_termination() {
    let (client, mut broker) = connected("A").await;
    client.disconnect().await.expect("disconnect");

    let message = broker.recv().await;
    assert_eq!(message.identifier, PROCESS_TERMINATE);
    assert_eq!(message.payload().expect("payload"), TOKEN);
    assert!(!client.is_connected());
}
