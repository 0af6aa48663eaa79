#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use quoteline_domain::{
	ChannelScope, CustomerId, Identity, NotificationKind, OrderAction, OrderStatus, PaymentRequest, Role, RoomKey,
	Sender, UserId,
};
use quoteline_client::{Applied, MessageLog};
use quoteline_util::ManualClock;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::server::error::HubError;
use crate::server::events::{HubEvent, RoomEvent, SessionId};
use crate::server::hub::{Hub, HubConfig, NewMessage};
use crate::store::MemoryStore;

type Rx = mpsc::Receiver<Arc<RoomEvent>>;

fn hub_with(cfg: HubConfig) -> Hub {
	Hub::new(cfg, Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(1_000)))
}

fn hub() -> Hub {
	hub_with(HubConfig::default())
}

fn cid(id: &str) -> CustomerId {
	CustomerId::new(id).expect("valid CustomerId")
}

fn customer(id: &str) -> Identity {
	Identity::new(UserId::new(id).expect("valid UserId"), Role::Customer)
}

fn staff(id: &str) -> Identity {
	Identity::new(UserId::new(id).expect("valid UserId"), Role::Staff)
}

async fn connect_customer(hub: &Hub, id: &str) -> (SessionId, Rx) {
	let (session, rx) = hub.connect(customer(id));
	hub.join(session, RoomKey::Customer(cid(id))).await.expect("join own room");
	(session, rx)
}

async fn connect_staff(hub: &Hub, id: &str) -> (SessionId, Rx) {
	let (session, rx) = hub.connect(staff(id));
	hub.join(session, RoomKey::Staff).await.expect("join staff");
	(session, rx)
}

async fn next_event(rx: &mut Rx) -> Arc<RoomEvent> {
	timeout(Duration::from_millis(250), rx.recv())
		.await
		.expect("expected to receive within timeout")
		.expect("channel open")
}

async fn assert_quiet(rx: &mut Rx) {
	let got = timeout(Duration::from_millis(50), rx.recv()).await;
	assert!(got.is_err(), "unexpected event: {got:?}");
}

/// Drain until an event of the requested kind shows up.
async fn next_of_kind(rx: &mut Rx, kind: &str) -> Arc<RoomEvent> {
	loop {
		let ev = next_event(rx).await;
		if ev.kind() == kind {
			return ev;
		}
	}
}

fn global(customer_id: &str, sender: Sender, text: &str, at: i64) -> NewMessage {
	NewMessage {
		scope: ChannelScope::Global,
		customer_id: cid(customer_id),
		sender,
		text: text.to_string(),
		sent_at_ms: at,
	}
}

#[tokio::test]
async fn global_message_reaches_own_customer_and_staff_only() {
	let hub = hub();
	let (alice, mut alice_rx) = connect_customer(&hub, "alice").await;
	let (_bob, mut bob_rx) = connect_customer(&hub, "bob").await;
	let (_s, mut staff_rx) = connect_staff(&hub, "s-1").await;

	let receipt = hub
		.send_message(alice, global("alice", Sender::Customer, "hi there", 10))
		.await
		.expect("send");
	assert!(!receipt.duplicate);

	// the originating session is not excluded
	match &next_event(&mut alice_rx).await.event {
		HubEvent::Chat(m) => assert_eq!(m.text, "hi there"),
		other => panic!("expected chat, got {other:?}"),
	}

	match &next_event(&mut staff_rx).await.event {
		HubEvent::Chat(m) => assert_eq!(m.customer_id, cid("alice")),
		other => panic!("expected chat, got {other:?}"),
	}
	match &next_of_kind(&mut staff_rx, "unread").await.event {
		HubEvent::Unread { counts, .. } => assert_eq!(counts.to_staff, 1),
		other => panic!("expected unread, got {other:?}"),
	}

	assert_quiet(&mut bob_rx).await;
}

#[tokio::test]
async fn global_message_with_no_staff_online_still_counts() {
	let hub = hub();
	let (alice, _rx) = connect_customer(&hub, "alice").await;

	hub.send_message(alice, global("alice", Sender::Customer, "anyone?", 10))
		.await
		.expect("send");

	let (s, _srx) = hub.connect(staff("s-1"));
	let snap = hub
		.snapshot(s, cid("alice"), ChannelScope::Global, 0)
		.await
		.expect("snapshot");
	assert_eq!(snap.messages.len(), 1);
	assert_eq!(snap.unread.to_staff, 1);

	let feed = hub.list_notifications(s).await.expect("notifications");
	assert_eq!(feed.len(), 1);
	assert_eq!(feed[0].kind, NotificationKind::Message);
}

#[tokio::test]
async fn duplicate_message_is_acknowledged_without_rebroadcast() {
	let hub = hub();
	let (alice, mut rx) = connect_customer(&hub, "alice").await;

	let first = hub
		.send_message(alice, global("alice", Sender::Customer, "same", 42))
		.await
		.expect("send");
	while timeout(Duration::from_millis(50), rx.recv()).await.is_ok() {}

	let again = hub
		.send_message(alice, global("alice", Sender::Customer, "same", 42))
		.await
		.expect("send");
	assert!(again.duplicate);
	assert_eq!(again.message.id, first.message.id);
	assert_quiet(&mut rx).await;

	let snap = hub
		.snapshot(alice, cid("alice"), ChannelScope::Global, 0)
		.await
		.expect("snapshot");
	assert_eq!(snap.messages.len(), 1);
	assert_eq!(snap.unread.to_staff, 1);
}

#[tokio::test]
async fn mark_read_resets_only_the_readers_direction() {
	let hub = hub();
	let (alice, _arx) = connect_customer(&hub, "alice").await;
	let (s, mut srx) = connect_staff(&hub, "s-1").await;

	hub.send_message(alice, global("alice", Sender::Customer, "q1", 1))
		.await
		.expect("send");
	hub.send_message(s, global("alice", Sender::Staff, "a1", 2))
		.await
		.expect("send");
	while timeout(Duration::from_millis(50), srx.recv()).await.is_ok() {}

	let counts = hub
		.mark_read(s, cid("alice"), ChannelScope::Global)
		.await
		.expect("mark read");
	assert_eq!(counts.to_staff, 0);
	assert_eq!(counts.to_customer, 1);

	match &next_event(&mut srx).await.event {
		HubEvent::Unread { counts, .. } => assert_eq!(counts.to_staff, 0),
		other => panic!("expected unread, got {other:?}"),
	}
}

#[tokio::test]
async fn join_rules_are_enforced() {
	let hub = hub();
	let (alice, _rx) = hub.connect(customer("alice"));

	assert!(matches!(
		hub.join(alice, RoomKey::Customer(cid("bob"))).await,
		Err(HubError::Forbidden(_))
	));
	assert!(matches!(hub.join(alice, RoomKey::Staff).await, Err(HubError::Forbidden(_))));

	let order = hub
		.create_order(alice, cid("alice"), "crate of bolts".into(), Vec::new())
		.await
		.expect("create");
	assert!(hub.join(alice, RoomKey::Order(order.id.clone())).await.expect("join"));
	assert!(!hub.join(alice, RoomKey::Order(order.id.clone())).await.expect("rejoin"));

	let (bob, _brx) = hub.connect(customer("bob"));
	assert!(matches!(
		hub.join(bob, RoomKey::Order(order.id.clone())).await,
		Err(HubError::Forbidden(_))
	));

	let (s, _srx) = hub.connect(staff("s-1"));
	assert!(hub.join(s, RoomKey::Order(order.id.clone())).await.expect("staff join"));
	assert!(hub.join(s, RoomKey::Customer(cid("bob"))).await.expect("staff join"));
}

#[tokio::test]
async fn order_chat_goes_to_order_and_customer_rooms() {
	let hub = hub();
	let (alice, _arx) = connect_customer(&hub, "alice").await;
	let order = hub
		.create_order(alice, cid("alice"), "panels".into(), Vec::new())
		.await
		.expect("create");

	let (s, mut srx) = hub.connect(staff("s-1"));
	hub.join(s, RoomKey::Order(order.id.clone())).await.expect("join");
	let (_other, mut other_staff_rx) = connect_staff(&hub, "s-2").await;

	hub.send_message(
		alice,
		NewMessage {
			scope: ChannelScope::Order(order.id.clone()),
			customer_id: cid("alice"),
			sender: Sender::Customer,
			text: "when?".into(),
			sent_at_ms: 5,
		},
	)
	.await
	.expect("send");

	let ev = next_event(&mut srx).await;
	assert_eq!(ev.room, RoomKey::Order(order.id.clone()));
	assert!(matches!(ev.event, HubEvent::Chat(_)));

	// staff room sees the counter and notification but not the order chat itself
	let first_staff = next_event(&mut other_staff_rx).await;
	assert_ne!(first_staff.kind(), "chat");
}

#[tokio::test]
async fn message_validation() {
	let hub = hub_with(HubConfig {
		max_message_len: 5,
		..HubConfig::default()
	});
	let (alice, _rx) = hub.connect(customer("alice"));

	assert!(matches!(
		hub.send_message(alice, global("alice", Sender::Customer, "   ", 1)).await,
		Err(HubError::Validation(_))
	));
	assert!(matches!(
		hub.send_message(alice, global("alice", Sender::Customer, "too long", 1)).await,
		Err(HubError::Validation(_))
	));
	assert!(matches!(
		hub.send_message(alice, global("alice", Sender::Staff, "hey", 1)).await,
		Err(HubError::Forbidden(_))
	));
	assert!(matches!(
		hub.send_message(alice, global("bob", Sender::Customer, "hey", 1)).await,
		Err(HubError::Forbidden(_))
	));
}

#[tokio::test]
async fn full_order_lifecycle() {
	let hub = hub();
	let (alice, mut arx) = connect_customer(&hub, "alice").await;
	let (s, mut srx) = connect_staff(&hub, "s-1").await;

	let order = hub
		.create_order(alice, cid("alice"), "steel frame".into(), Vec::new())
		.await
		.expect("create");
	assert_eq!(order.status, OrderStatus::Pending);
	let id = order.id.clone();

	let steps: Vec<(SessionId, OrderAction, OrderStatus)> = vec![
		(s, OrderAction::SendQuote { estimated_rate: 1_000 }, OrderStatus::QuoteSent),
		(alice, OrderAction::ApproveQuote, OrderStatus::ApprovedQuote),
		(
			s,
			OrderAction::RequestPayment {
				request: PaymentRequest::Percent(30),
			},
			OrderStatus::PaymentRequested,
		),
		(
			alice,
			OrderAction::SubmitAdvance {
				method: "wire".into(),
				transaction_id: "tx-1".into(),
			},
			OrderStatus::PaymentRequested,
		),
		(s, OrderAction::ConfirmAdvance, OrderStatus::AdvancePaid),
		(s, OrderAction::SetTrackingStep { step: 1 }, OrderStatus::AdvancePaid),
		(
			s,
			OrderAction::RequestFinalPayment { final_amount: 1_200 },
			OrderStatus::FinalPaymentRequested,
		),
		(
			alice,
			OrderAction::SubmitFinal {
				method: "wire".into(),
				transaction_id: "tx-2".into(),
			},
			OrderStatus::FinalPaymentSubmitted,
		),
		(s, OrderAction::ConfirmFinal, OrderStatus::Paid),
	];

	for (who, action, expected) in steps {
		let t = hub.transition_order(who, &id, action).await.expect("transition");
		assert_eq!(t.order.status, expected);
	}

	let done = hub.get_order(alice, &id).await.expect("get");
	assert_eq!(done.status, OrderStatus::Paid);
	assert_eq!(done.requested_amount, Some(300));
	assert_eq!(done.remaining_balance(), Some(0));
	assert_eq!(done.tracking_history.len(), 2);

	// both sides saw every update
	let mut customer_updates = 0;
	while let Ok(Some(ev)) = timeout(Duration::from_millis(50), arx.recv()).await {
		if ev.kind() == "order_updated" {
			customer_updates += 1;
		}
	}
	assert_eq!(customer_updates, 9);

	match &next_of_kind(&mut srx, "order_updated").await.event {
		HubEvent::OrderUpdated { change, .. } => assert_eq!(change.new_status, OrderStatus::QuoteSent),
		other => panic!("expected order update, got {other:?}"),
	}

	let customer_feed = hub.list_notifications(alice).await.expect("feed");
	assert!(customer_feed.iter().any(|n| n.title == "Quote received"));
	let staff_feed = hub.list_notifications(s).await.expect("feed");
	assert!(staff_feed.iter().any(|n| n.title == "Quote approved"));
}

#[tokio::test]
async fn invalid_transition_leaves_order_untouched() {
	let hub = hub();
	let (alice, _arx) = connect_customer(&hub, "alice").await;
	let (_s, mut srx) = connect_staff(&hub, "s-1").await;

	let order = hub
		.create_order(alice, cid("alice"), "gears".into(), Vec::new())
		.await
		.expect("create");
	while timeout(Duration::from_millis(50), srx.recv()).await.is_ok() {}

	let err = hub
		.transition_order(alice, &order.id, OrderAction::ApproveQuote)
		.await
		.expect_err("approve from pending must fail");
	match err {
		HubError::InvalidTransition { current, .. } => assert_eq!(current, OrderStatus::Pending),
		other => panic!("unexpected error: {other:?}"),
	}

	let err = hub
		.transition_order(alice, &order.id, OrderAction::SendQuote { estimated_rate: 5 })
		.await
		.expect_err("customer cannot quote");
	assert_eq!(err.code(), "FORBIDDEN");

	assert_eq!(hub.get_order(alice, &order.id).await.expect("get"), order);
	assert_quiet(&mut srx).await;
}

#[tokio::test]
async fn customers_cannot_touch_other_customers_orders() {
	let hub = hub();
	let (alice, _arx) = hub.connect(customer("alice"));
	let (bob, _brx) = hub.connect(customer("bob"));

	let order = hub
		.create_order(alice, cid("alice"), "rivets".into(), Vec::new())
		.await
		.expect("create");

	assert!(matches!(hub.get_order(bob, &order.id).await, Err(HubError::NotFound(_))));
	assert!(matches!(
		hub.transition_order(bob, &order.id, OrderAction::Reject { reason: None }).await,
		Err(HubError::Forbidden(_))
	));
	assert!(matches!(
		hub.create_order(bob, cid("alice"), "x".into(), Vec::new()).await,
		Err(HubError::Forbidden(_))
	));
}

#[tokio::test]
async fn slow_session_is_disconnected_on_overflow() {
	let hub = hub_with(HubConfig {
		session_queue_capacity: 1,
		..HubConfig::default()
	});
	let (slow, mut slow_rx) = connect_staff(&hub, "s-slow").await;
	let (alice, _arx) = hub.connect(customer("alice"));

	for i in 0..3 {
		hub.typing(alice, cid("alice"), None, i % 2 == 0).await.expect("typing");
	}

	assert!(hub.identity(slow).is_err());
	assert!(hub.room_members(&RoomKey::Staff).is_empty());

	// queued events drain, then the stream ends
	assert!(next_event(&mut slow_rx).await.kind() == "typing");
	let end = timeout(Duration::from_millis(250), slow_rx.recv())
		.await
		.expect("stream should end");
	assert!(end.is_none());
}

#[tokio::test]
async fn disconnect_clears_memberships() {
	let hub = hub();
	let (alice, _rx) = connect_customer(&hub, "alice").await;
	assert_eq!(hub.room_count(), 1);

	hub.disconnect(alice);
	assert_eq!(hub.session_count(), 0);
	assert_eq!(hub.room_count(), 0);
	assert!(matches!(
		hub.join(alice, RoomKey::Customer(cid("alice"))).await,
		Err(HubError::SessionClosed)
	));
}

#[tokio::test]
async fn notification_feed_lifecycle() {
	let hub = hub();
	let (alice, _arx) = hub.connect(customer("alice"));
	let (s, _srx) = hub.connect(staff("s-1"));

	hub.create_order(alice, cid("alice"), "bolts".into(), Vec::new())
		.await
		.expect("create");
	hub.create_order(alice, cid("alice"), "nuts".into(), Vec::new())
		.await
		.expect("create");

	assert_eq!(hub.list_notifications(s).await.expect("list").len(), 2);
	assert_eq!(hub.mark_notifications_seen(s).await.expect("seen"), 2);
	assert_eq!(hub.delete_seen_notifications(s).await.expect("delete"), 2);
	assert!(hub.list_notifications(s).await.expect("list").is_empty());
	assert!(hub.list_notifications(alice).await.expect("list").is_empty());
}

#[tokio::test]
async fn order_typing_is_limited_to_the_orders_customer() {
	let hub = hub();
	let (bob, _brx) = connect_customer(&hub, "bob").await;
	let order = hub
		.create_order(bob, cid("bob"), "hinges".into(), Vec::new())
		.await
		.expect("create");

	let (bob_tab, mut order_rx) = hub.connect(customer("bob"));
	hub.join(bob_tab, RoomKey::Order(order.id.clone()))
		.await
		.expect("join order");

	let (mallory, _mrx) = hub.connect(customer("mallory"));
	assert!(matches!(
		hub.typing(mallory, cid("mallory"), Some(order.id.clone()), true).await,
		Err(HubError::Forbidden(_))
	));
	assert!(matches!(
		hub.typing(mallory, cid("bob"), Some(order.id.clone()), true).await,
		Err(HubError::Forbidden(_))
	));
	assert_quiet(&mut order_rx).await;

	hub.typing(bob, cid("bob"), Some(order.id.clone()), true)
		.await
		.expect("typing");
	let ev = next_event(&mut order_rx).await;
	assert_eq!(ev.room, RoomKey::Order(order.id.clone()));
	assert_eq!(ev.kind(), "typing");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_global_messages_are_all_counted() {
	let hub = Arc::new(hub());
	let (alice, _rx) = hub.connect(customer("alice"));
	hub.send_message(alice, global("alice", Sender::Customer, "first", 1))
		.await
		.expect("send");

	let mut tasks = Vec::new();
	for i in 0..64 {
		let hub = Arc::clone(&hub);
		tasks.push(tokio::spawn(async move {
			hub.send_message(alice, global("alice", Sender::Customer, &format!("m{i}"), 10 + i))
				.await
				.expect("send")
		}));
	}
	for task in tasks {
		assert!(!task.await.expect("join").duplicate);
	}

	let (s, _srx) = hub.connect(staff("s-1"));
	let snap = hub
		.snapshot(s, cid("alice"), ChannelScope::Global, 0)
		.await
		.expect("snapshot");
	assert_eq!(snap.unread.to_staff, 65);
	assert_eq!(snap.messages.len(), 65);
}

#[tokio::test]
async fn resend_after_reconnect_leaves_one_entry() {
	let hub = hub();
	let mut log = MessageLog::new(cid("alice"), ChannelScope::Global);

	// sent and stored, but the tab drops before it sees the ack
	let (first, _rx) = connect_customer(&hub, "alice").await;
	assert!(log.insert_optimistic(Sender::Customer, "need a quote", 500));
	hub.send_message(first, global("alice", Sender::Customer, "need a quote", 500))
		.await
		.expect("send");
	hub.disconnect(first);
	assert_eq!(log.pending().count(), 1);

	let (second, _rx2) = connect_customer(&hub, "alice").await;
	let receipt = hub
		.send_message(second, global("alice", Sender::Customer, "need a quote", 500))
		.await
		.expect("resend");
	assert!(receipt.duplicate);
	assert_eq!(log.apply_confirmed(&receipt.message), Applied::Confirmed);

	let snap = hub
		.snapshot(second, cid("alice"), ChannelScope::Global, 0)
		.await
		.expect("snapshot");
	assert_eq!(log.resync(&snap.messages), 0);
	assert_eq!(log.len(), 1);
	assert_eq!(log.pending().count(), 0);
	assert_eq!(snap.unread.to_staff, 1);
}

#[tokio::test]
async fn order_locks_are_released_after_transitions() {
	let hub = hub();
	let (alice, _arx) = hub.connect(customer("alice"));
	let (s, _srx) = hub.connect(staff("s-1"));

	for n in 0..3 {
		let order = hub
			.create_order(alice, cid("alice"), format!("batch {n}"), Vec::new())
			.await
			.expect("create");
		hub.transition_order(s, &order.id, OrderAction::SendQuote { estimated_rate: 100 })
			.await
			.expect("quote");
		let _ = hub.transition_order(s, &order.id, OrderAction::ConfirmFinal).await;
	}

	assert_eq!(hub.order_lock_count(), 0);
}
