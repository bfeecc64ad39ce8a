//! Router integration tests on the in-memory bus.

use bytes::Bytes;
use chrono::{Duration, Utc};
use echonet_identity::{Identity, SecureChannel};
use echonet_p2p::{
    Announcement, DispatchMode, Envelope, InboundMessage, MemoryBus, MemoryTransport,
    MessageCategory, MessageRouter, OverflowPolicy, P2pError, RouterConfig, RouterEvent,
    RouterState, Transport,
};
use echonet_types::{NodeId, BROADCAST_TOPIC};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;

fn id(s: &str) -> NodeId {
    NodeId::new(s).unwrap()
}

struct TestNode {
    router: Arc<MessageRouter>,
    transport: Arc<MemoryTransport>,
    identity: Arc<Identity>,
}

fn node(bus: &Arc<MemoryBus>, name: &str, config: RouterConfig) -> TestNode {
    let transport = Arc::new(bus.transport());
    let identity = Arc::new(Identity::generate().unwrap());
    let router = MessageRouter::new(id(name), identity.clone(), transport.clone(), config);
    TestNode {
        router,
        transport,
        identity,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn collector(router: &MessageRouter, category: MessageCategory) -> mpsc::UnboundedReceiver<InboundMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    router.register_handler(category, move |message: &InboundMessage| {
        let _ = tx.send(message.clone());
    });
    rx
}

async fn connected_pair(bus: &Arc<MemoryBus>) -> (TestNode, TestNode) {
    let a = node(bus, "alpha", RouterConfig::default());
    let b = node(bus, "beta", RouterConfig::default());
    a.router.connect("memory://test").await.unwrap();
    b.router.connect("memory://test").await.unwrap();

    let (ra, rb) = (a.router.clone(), b.router.clone());
    eventually(move || ra.directory().contains(&id("beta")) && rb.directory().contains(&id("alpha"))).await;
    (a, b)
}

#[tokio::test]
async fn peers_discover_each_other_and_exchange_messages() {
    let bus = MemoryBus::new();
    let (a, b) = connected_pair(&bus).await;
    let mut inbox = collector(&b.router, MessageCategory::General);

    a.router
        .send_secure(&id("beta"), json!({"type": "general", "content": "hello beta"}))
        .await
        .unwrap();

    let message = tokio::time::timeout(StdDuration::from_secs(2), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.from, id("alpha"));
    assert_eq!(message.to, id("beta"));
    assert_eq!(message.category, MessageCategory::General);
    assert_eq!(message.payload["content"], json!("hello beta"));
    assert_eq!(a.router.stats().envelopes_sent, 1);
}

#[tokio::test]
async fn late_joiner_learns_earlier_nodes() {
    let bus = MemoryBus::new();
    let a = node(&bus, "alpha", RouterConfig::default());
    a.router.connect("memory://test").await.unwrap();

    let b = node(&bus, "beta", RouterConfig::default());
    b.router.connect("memory://test").await.unwrap();

    let rb = b.router.clone();
    eventually(move || rb.directory().contains(&id("alpha"))).await;
}

#[tokio::test]
async fn send_to_unknown_peer_does_no_io() {
    let bus = MemoryBus::new();
    let a = node(&bus, "alpha", RouterConfig::default());
    a.router.connect("memory://test").await.unwrap();
    let published = a.transport.published_count();

    let err = a
        .router
        .send_secure(&id("nobody"), json!({"type": "general"}))
        .await
        .unwrap_err();

    assert!(matches!(err, P2pError::PeerUnknown(ref n) if *n == id("nobody")));
    assert_eq!(err.reason_code(), "peer_unknown");
    assert_eq!(a.transport.published_count(), published);
}

#[tokio::test]
async fn newest_announced_key_is_used() {
    let bus = MemoryBus::new();
    let a = node(&bus, "alpha", RouterConfig {
        reannounce_on_new_peer: false,
        ..RouterConfig::default()
    });
    a.router.connect("memory://test").await.unwrap();

    let old = Identity::generate().unwrap();
    let new = Arc::new(Identity::generate().unwrap());
    let t0 = Utc::now();

    for (identity, at) in [(&old, t0), (new.as_ref(), t0 + Duration::seconds(1))] {
        let ann = Announcement::signed(identity, id("beta"), at, None);
        bus.publish(BROADCAST_TOPIC, Bytes::from(ann.to_bytes().unwrap()))
            .unwrap();
    }
    let ra = a.router.clone();
    let new_key = new.public_key();
    eventually(move || ra.directory().lookup(&id("beta")).ok() == Some(new_key)).await;

    let mut beta_inbox = bus.subscribe(&id("beta").inbox_topic());
    a.router
        .send_secure(&id("beta"), json!({"type": "general", "content": "x"}))
        .await
        .unwrap();

    let bytes = beta_inbox.receiver.recv().await.unwrap();
    let envelope = Envelope::from_slice(&bytes).unwrap();
    let aad = Envelope::associated_data(&envelope.from, &envelope.to);

    let beta = SecureChannel::new(new);
    let plaintext = beta
        .decrypt(&id("alpha"), &a.identity.public_key(), &envelope.sealed(), &aad)
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
    assert_eq!(value["payload"]["content"], json!("x"));
}

#[tokio::test]
async fn tampered_and_replayed_envelopes_are_dropped() {
    let bus = MemoryBus::new();
    let (a, b) = connected_pair(&bus).await;
    let mut inbox = collector(&b.router, MessageCategory::General);
    let mut events = b.router.subscribe_events();

    let mut tap = bus.subscribe(&id("beta").inbox_topic());
    a.router
        .send_secure(&id("beta"), json!({"type": "general", "content": "once"}))
        .await
        .unwrap();
    let original = tap.receiver.recv().await.unwrap();
    assert!(inbox.recv().await.is_some());

    // Replay.
    bus.publish(&id("beta").inbox_topic(), original.clone()).unwrap();

    // Tamper.
    let mut envelope = Envelope::from_slice(&original).unwrap();
    envelope.ciphertext[0] ^= 0xff;
    bus.publish(&id("beta").inbox_topic(), Bytes::from(envelope.to_bytes().unwrap()))
        .unwrap();

    let mut failures = 0;
    while failures < 2 {
        let event = tokio::time::timeout(StdDuration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let RouterEvent::AuthenticationFailure { from, .. } = event {
            assert_eq!(from, id("alpha"));
            failures += 1;
        }
    }
    assert_eq!(b.router.stats().authentication_failures, 2);
    assert!(inbox.try_recv().is_err());
}

#[tokio::test]
async fn forged_sender_uses_only_declared_key() {
    let bus = MemoryBus::new();
    let (_a, b) = connected_pair(&bus).await;

    // Mallory knows beta's key but claims to be alpha.
    let mallory = SecureChannel::new(Arc::new(Identity::generate().unwrap()));
    let aad = Envelope::associated_data(&id("alpha"), &id("beta"));
    let plaintext = serde_json::to_vec(&json!({
        "from": "alpha", "to": "beta", "timestamp": Utc::now(),
        "payload": {"type": "general", "content": "trust me"}
    }))
    .unwrap();
    let sealed = mallory
        .encrypt(&id("beta"), &b.identity.public_key(), &plaintext, &aad)
        .unwrap();
    let envelope = Envelope::new(sealed, id("alpha"), id("beta"), Utc::now());

    let err = b.router.handle_inbox(&envelope.to_bytes().unwrap()).unwrap_err();
    assert_eq!(err.reason_code(), "authentication_failure");
}

#[tokio::test]
async fn unknown_sender_is_recoverable() {
    let bus = MemoryBus::new();
    let b = node(&bus, "beta", RouterConfig::default());
    b.router.connect("memory://test").await.unwrap();

    let stranger = SecureChannel::new(Arc::new(Identity::generate().unwrap()));
    let aad = Envelope::associated_data(&id("gamma"), &id("beta"));
    let sealed = stranger
        .encrypt(&id("beta"), &b.identity.public_key(), b"{}", &aad)
        .unwrap();
    let envelope = Envelope::new(sealed, id("gamma"), id("beta"), Utc::now());

    let err = b.router.handle_inbox(&envelope.to_bytes().unwrap()).unwrap_err();
    assert!(matches!(err, P2pError::PeerUnknown(_)));
    assert_eq!(b.router.stats().unknown_senders, 1);
}

#[tokio::test]
async fn handlers_are_selected_by_category() {
    let bus = MemoryBus::new();
    let (a, b) = connected_pair(&bus).await;
    let mut proposals = collector(&b.router, MessageCategory::Proposal);
    let mut votes = collector(&b.router, MessageCategory::Vote);
    let mut general = collector(&b.router, MessageCategory::General);

    for payload in [
        json!({"type": "new_proposal", "proposal": {}}),
        json!({"type": "proposal_vote", "vote": "resonant"}),
        json!({"type": "something_else"}),
    ] {
        a.router.send_secure(&id("beta"), payload).await.unwrap();
    }

    assert_eq!(proposals.recv().await.unwrap().category, MessageCategory::Proposal);
    assert_eq!(votes.recv().await.unwrap().category, MessageCategory::Vote);
    assert_eq!(general.recv().await.unwrap().payload["type"], json!("something_else"));
}

#[tokio::test]
async fn inline_dispatch_preserves_inbox_order() {
    let bus = MemoryBus::new();
    let a = node(&bus, "alpha", RouterConfig::default());
    let b = node(&bus, "beta", RouterConfig {
        dispatch: DispatchMode::Inline,
        ..RouterConfig::default()
    });
    a.router.connect("memory://test").await.unwrap();
    b.router.connect("memory://test").await.unwrap();
    let ra = a.router.clone();
    eventually(move || ra.directory().contains(&id("beta"))).await;

    let mut inbox = collector(&b.router, MessageCategory::General);
    for i in 0..20 {
        a.router
            .send_secure(&id("beta"), json!({"type": "general", "seq": i}))
            .await
            .unwrap();
    }
    for i in 0..20 {
        assert_eq!(inbox.recv().await.unwrap().payload["seq"], json!(i));
    }
}

#[tokio::test]
async fn drop_oldest_queue_delivers_without_blocking() {
    let bus = MemoryBus::new();
    let a = node(&bus, "alpha", RouterConfig::default());
    let b = node(&bus, "beta", RouterConfig {
        dispatch: DispatchMode::Queued {
            capacity: 4,
            overflow: OverflowPolicy::DropOldest,
        },
        ..RouterConfig::default()
    });
    a.router.connect("memory://test").await.unwrap();
    b.router.connect("memory://test").await.unwrap();
    let ra = a.router.clone();
    eventually(move || ra.directory().contains(&id("beta"))).await;

    let mut inbox = collector(&b.router, MessageCategory::General);
    a.router
        .send_secure(&id("beta"), json!({"type": "general", "content": "q"}))
        .await
        .unwrap();
    assert_eq!(inbox.recv().await.unwrap().payload["content"], json!("q"));
}

#[tokio::test]
async fn disconnect_fails_fast_and_reconnects() {
    let bus = MemoryBus::new();
    let (a, _b) = connected_pair(&bus).await;

    a.router.disconnect().await.unwrap();
    assert_eq!(a.router.state(), RouterState::Disconnected);
    assert_eq!(bus.subscriber_count(&id("alpha").inbox_topic()), 0);

    let err = a
        .router
        .send_secure(&id("beta"), json!({"type": "general"}))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "not_connected");

    // Idempotent.
    a.router.disconnect().await.unwrap();

    a.router.connect("memory://test").await.unwrap();
    assert_eq!(a.router.state(), RouterState::Connected);
    assert!(a.transport.is_connected());
}

#[tokio::test]
async fn failed_connect_returns_to_disconnected() {
    let bus = MemoryBus::new();
    let a = node(&bus, "alpha", RouterConfig::default());

    bus.set_available(false);
    let err = a.router.connect("memory://test").await.unwrap_err();
    assert_eq!(err.reason_code(), "transport_unavailable");
    assert_eq!(a.router.state(), RouterState::Disconnected);

    let err = a.router.connect("udp://elsewhere").await.unwrap_err();
    assert_eq!(err.reason_code(), "transport_unavailable");

    bus.set_available(true);
    a.router.connect("memory://test").await.unwrap();
    assert!(matches!(
        a.router.connect("memory://test").await,
        Err(P2pError::AlreadyConnected)
    ));
}

#[tokio::test]
async fn broadcast_ignores_non_announcements_and_rejects_forgeries() {
    let bus = MemoryBus::new();
    let a = node(&bus, "alpha", RouterConfig::default());
    a.router.connect("memory://test").await.unwrap();

    assert!(a.router.handle_broadcast(b"{\"type\":\"chatter\"}").await.unwrap().is_none());

    let honest = Identity::generate().unwrap();
    let other = Identity::generate().unwrap();
    let mut forged = Announcement::signed(&honest, id("beta"), Utc::now(), None);
    forged.public_key = other.public_key();

    let err = a
        .router
        .handle_broadcast(&forged.to_bytes().unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "invalid_announcement");
    assert!(!a.router.directory().contains(&id("beta")));

    let stats = a.router.stats();
    assert_eq!(stats.broadcasts_ignored, 1);
    assert_eq!(stats.announcements_rejected, 1);
}

#[tokio::test]
async fn unhandled_category_is_reported() {
    let bus = MemoryBus::new();
    let (a, b) = connected_pair(&bus).await;
    let mut events = b.router.subscribe_events();

    a.router
        .send_secure(&id("beta"), json!({"type": "proposal_vote"}))
        .await
        .unwrap();

    loop {
        let event = tokio::time::timeout(StdDuration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let RouterEvent::Unhandled { category, .. } = event {
            assert_eq!(category, MessageCategory::Vote);
            break;
        }
    }
    let _ = a.transport.close().await;
}
