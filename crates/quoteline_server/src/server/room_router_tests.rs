#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use quoteline_domain::{CustomerId, Role, RoomKey};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::server::events::{HubEvent, RoomEvent, SessionId};
use crate::server::room_router::RoomRouter;

fn customer_room(id: &str) -> RoomKey {
	RoomKey::Customer(CustomerId::new(id).expect("valid CustomerId"))
}

fn typing_event(room: RoomKey) -> Arc<RoomEvent> {
	Arc::new(RoomEvent {
		room,
		at_ms: 1,
		event: HubEvent::Typing {
			customer_id: CustomerId::new("c-1").expect("valid CustomerId"),
			order_id: None,
			role: Role::Customer,
			typing: true,
		},
	})
}

#[tokio::test]
async fn broadcast_reaches_members_of_that_room_only() {
	let router = RoomRouter::new();
	let (tx_a, mut rx_a) = mpsc::channel(8);
	let (tx_b, mut rx_b) = mpsc::channel(8);

	assert!(router.join(customer_room("a"), SessionId(1), tx_a));
	assert!(router.join(RoomKey::Staff, SessionId(2), tx_b));

	let report = router.broadcast(typing_event(RoomKey::Staff));
	assert_eq!(report.delivered, 1);

	let got = timeout(Duration::from_millis(250), rx_b.recv())
		.await
		.expect("expected to receive within timeout")
		.expect("channel open");
	assert_eq!(got.room, RoomKey::Staff);

	let unexpected = timeout(Duration::from_millis(50), rx_a.recv()).await;
	assert!(unexpected.is_err(), "customer room member received a staff event");
}

#[tokio::test]
async fn join_is_idempotent_and_sender_is_not_excluded() {
	let router = RoomRouter::new();
	let (tx, mut rx) = mpsc::channel(8);

	assert!(router.join(RoomKey::Staff, SessionId(7), tx.clone()));
	assert!(!router.join(RoomKey::Staff, SessionId(7), tx));
	assert_eq!(router.member_count(&RoomKey::Staff), 1);

	router.broadcast(typing_event(RoomKey::Staff));
	assert!(rx.recv().await.is_some());
	assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err(), "delivered twice");
}

#[test]
fn broadcast_to_empty_room_is_silent() {
	let router = RoomRouter::new();
	let report = router.broadcast(typing_event(customer_room("nobody")));
	assert_eq!(report.delivered, 0);
	assert!(report.overflowed.is_empty());
	assert_eq!(router.room_count(), 0);
}

#[test]
fn leaving_last_member_drops_the_room() {
	let router = RoomRouter::new();
	let (tx, _rx) = mpsc::channel(8);
	let room = customer_room("a");

	router.join(room.clone(), SessionId(1), tx);
	assert_eq!(router.room_count(), 1);

	assert!(router.leave(&room, SessionId(1)));
	assert!(!router.leave(&room, SessionId(1)));
	assert_eq!(router.room_count(), 0);
	assert!(!router.is_member(&room, SessionId(1)));
}

#[test]
fn full_and_closed_outboxes_are_reported() {
	let router = RoomRouter::new();
	let (tx_full, _rx_full) = mpsc::channel(1);
	let (tx_closed, rx_closed) = mpsc::channel(1);
	drop(rx_closed);

	router.join(RoomKey::Staff, SessionId(1), tx_full);
	router.join(RoomKey::Staff, SessionId(2), tx_closed);

	let first = router.broadcast(typing_event(RoomKey::Staff));
	assert_eq!(first.delivered, 1);
	assert_eq!(first.closed, vec![SessionId(2)]);

	let second = router.broadcast(typing_event(RoomKey::Staff));
	assert_eq!(second.delivered, 0);
	assert_eq!(second.overflowed, vec![SessionId(1)]);

	let failed: Vec<SessionId> = second.failed().collect();
	assert_eq!(failed, vec![SessionId(1), SessionId(2)]);
}
