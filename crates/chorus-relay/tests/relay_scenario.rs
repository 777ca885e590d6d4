//! End-to-end relay behavior through real channel-backed handles.

use std::sync::Arc;

use chorus_relay::{
    BrokerConfig, ChannelHandle, CloseReason, Envelope, Identity, OutboundFrame, Recipient, Relay,
    RelayConfig, RelayError, RouteOutcome, RouterConfig, Session, SubscriptionMode,
};
use serde_json::json;
use tokio::sync::mpsc;

struct Peer {
    session: Arc<Session>,
    rx: mpsc::Receiver<OutboundFrame>,
}

impl Peer {
    fn connect(relay: &Relay) -> Self {
        let (handle, rx) = ChannelHandle::channel(64);
        let session = relay.connect(Arc::new(handle));
        Self { session, rx }
    }

    fn id(&self) -> &Identity {
        self.session.identity()
    }

    fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            out.push(frame.decode().expect("relay emits valid envelopes"));
        }
        out
    }
}

fn system_notices(envelopes: &[Envelope], text: &str) -> usize {
    envelopes
        .iter()
        .filter(|e| e.is_system() && e.message == json!(text))
        .count()
}

#[test]
fn three_peers_connect_chat_and_leave() {
    let relay = Relay::default();

    let mut a = Peer::connect(&relay);
    let mut b = Peer::connect(&relay);
    let mut c = Peer::connect(&relay);

    let (ida, idb, idc) = (a.id().clone(), b.id().clone(), c.id().clone());
    assert_ne!(ida, idb);
    assert_ne!(idb, idc);
    assert_ne!(ida, idc);

    let got_a = a.drain();
    let got_b = b.drain();
    let got_c = c.drain();

    // Each peer learns its own identity privately.
    for (got, id) in [(&got_a, &ida), (&got_b, &idb), (&got_c, &idc)] {
        assert_eq!(got[0].to, Recipient::Peer(id.clone()));
        assert_eq!(got[0].message, json!(format!("Connected as {}", id)));
    }

    // Join announcements count only peers that arrived later.
    let joins = |got: &[Envelope]| {
        got.iter()
            .filter(|e| e.is_system() && e.to == Recipient::All)
            .count()
    };
    assert_eq!(joins(&got_a), 2);
    assert_eq!(joins(&got_b), 1);
    assert_eq!(joins(&got_c), 0);
    assert_eq!(system_notices(&got_a, &format!("User {} Connected", idb)), 1);
    assert_eq!(system_notices(&got_a, &format!("User {} Connected", idc)), 1);
    assert_eq!(system_notices(&got_b, &format!("User {} Connected", idc)), 1);

    // A broadcasts; with echo on, all three receive it.
    let outcome = relay
        .dispatch(&a.session, r#"{"to": "ALL", "message": "hi"}"#)
        .unwrap();
    assert!(matches!(outcome, RouteOutcome::Broadcast(ref r) if r.delivered == 3 && r.failed == 0));
    for peer in [&mut a, &mut b, &mut c] {
        let got = peer.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].from, ida);
        assert_eq!(got[0].to, Recipient::All);
        assert_eq!(got[0].message, json!("hi"));
    }

    // B leaves; A and C each see exactly one departure notice.
    assert!(relay.disconnect(&b.session, CloseReason::Normal));
    let leave = format!("User {} Disconnected", idb);
    assert_eq!(system_notices(&a.drain(), &leave), 1);
    assert_eq!(system_notices(&c.drain(), &leave), 1);
    assert!(b.drain().is_empty());
    assert!(relay.registry().lookup(&idb).is_none());

    // A unicast to the departed peer is reported, and nobody receives it.
    let raw = json!({"to": idb.as_str(), "message": "still there?"}).to_string();
    assert_eq!(
        relay.dispatch(&a.session, &raw).unwrap(),
        RouteOutcome::RecipientNotFound(idb)
    );
    assert!(a.drain().is_empty());
    assert!(c.drain().is_empty());
}

#[test]
fn broadcast_without_echo_skips_sender() {
    let relay = Relay::new(
        RelayConfig::default().with_router(RouterConfig::new().with_echo_broadcasts(false)),
    );
    let mut a = Peer::connect(&relay);
    let mut b = Peer::connect(&relay);
    a.drain();
    b.drain();

    relay.dispatch(&a.session, "plain text").unwrap();
    assert!(a.drain().is_empty());
    let got = b.drain();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].message, json!("plain text"));
}

#[test]
fn dropped_writers_do_not_block_others() {
    let relay = Relay::default();
    let mut peers: Vec<Peer> = (0..5).map(|_| Peer::connect(&relay)).collect();
    for peer in &mut peers {
        peer.drain();
    }

    // Two writers go away without a teardown signal.
    let dead_1 = peers.remove(4);
    let dead_2 = peers.remove(2);
    let dead_ids = [dead_1.id().clone(), dead_2.id().clone()];
    drop(dead_1.rx);
    drop(dead_2.rx);

    let sender = Arc::clone(&peers[0].session);
    let outcome = relay.dispatch(&sender, "fan-out").unwrap();
    let report = match outcome {
        RouteOutcome::Broadcast(report) => report,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(report.delivered, 3);
    assert_eq!(report.failed, 2);

    for peer in &mut peers {
        assert_eq!(peer.drain().len(), 1);
    }
    // Only the teardown signal removes an entry.
    for id in &dead_ids {
        assert!(relay.registry().contains(id));
    }
}

#[test]
fn full_queue_reports_failure_without_removal() {
    let relay = Relay::default();
    let (handle, _rx) = ChannelHandle::channel(1);
    // The identity notice fills the one-slot queue.
    let slow = relay.connect(Arc::new(handle));
    let mut fast = Peer::connect(&relay);
    fast.drain();

    let raw = json!({"to": slow.identity().as_str(), "message": "x"}).to_string();
    let outcome = relay.dispatch(&fast.session, &raw).unwrap();
    assert!(matches!(outcome, RouteOutcome::SendFailed { .. }));
    assert!(relay.registry().contains(slow.identity()));
}

#[test]
fn teardown_is_idempotent() {
    let relay = Relay::default();
    let mut a = Peer::connect(&relay);
    let b = Peer::connect(&relay);
    a.drain();

    assert!(relay.disconnect(&b.session, CloseReason::Error("reset".into())));
    assert!(!relay.disconnect(&b.session, CloseReason::Normal));

    let leave = format!("User {} Disconnected", b.id());
    assert_eq!(system_notices(&a.drain(), &leave), 1);
    assert_eq!(relay.connection_count(), 1);
}

#[test]
fn departed_peer_cannot_speak_after_leave_notice() {
    let relay = Relay::default();
    let mut a = Peer::connect(&relay);
    let b = Peer::connect(&relay);
    relay.disconnect(&b.session, CloseReason::Normal);

    let seen = a.drain();
    let leave = format!("User {} Disconnected", b.id());
    assert_eq!(system_notices(&seen, &leave), 1);

    assert!(matches!(
        relay.dispatch(&b.session, "ghost message"),
        Err(RelayError::SessionClosed(_))
    ));
    let to_a = json!({"to": a.id().as_str(), "message": "late"}).to_string();
    assert!(relay.dispatch(&b.session, &to_a).is_err());
    assert!(a.drain().is_empty());
}

#[test]
fn broker_mode_routes_topics_and_user_destinations() {
    let relay = Relay::new(
        RelayConfig::default()
            .with_broker(BrokerConfig::default().with_mode(SubscriptionMode::Explicit)),
    );
    let mut a = Peer::connect(&relay);
    let mut b = Peer::connect(&relay);
    let mut c = Peer::connect(&relay);

    // Presence notices reach everyone already connected even in explicit mode.
    let presence = a.drain();
    assert_eq!(
        system_notices(&presence, &format!("User {} Connected", c.id())),
        1
    );
    b.drain();
    c.drain();

    relay
        .dispatch_broker(&b.session, r#"{"type":"subscribe","destination":"/topic/room"}"#)
        .unwrap();
    relay
        .dispatch(&a.session, r#"{"to": "/topic/room", "message": "topic hello"}"#)
        .unwrap();

    assert!(a.drain().is_empty());
    assert!(c.drain().is_empty());
    let got = b.drain();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].to, Recipient::Destination("/topic/room".into()));

    let user_dest = format!("/user/{}/queue/reply", c.id());
    let raw = json!({"type": "publish", "destination": user_dest, "message": "direct"}).to_string();
    relay.dispatch_broker(&a.session, &raw).unwrap();
    assert_eq!(c.drain().len(), 1);
    assert!(b.drain().is_empty());

    // Closing drops the subscriber's explicit subscriptions.
    relay.disconnect(&b.session, CloseReason::Normal);
    let broker = relay.broker().unwrap();
    assert!(broker.subscriptions().subscribers("/topic/room").is_empty());
}
