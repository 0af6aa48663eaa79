#![forbid(unsafe_code)]

use std::sync::Arc;

use quoteline_domain::{ChannelScope, ChatMessage, CustomerId, Direction, OrderId, Sender, ServerMessageId};

use crate::server::counters::CounterService;
use crate::store::{InsertOutcome, MemoryStore};

fn service() -> CounterService {
	CounterService::new(Arc::new(MemoryStore::new()))
}

fn cid() -> CustomerId {
	CustomerId::new("c-1").expect("valid CustomerId")
}

fn order_scope() -> ChannelScope {
	ChannelScope::Order(OrderId::new("o-1").expect("valid OrderId"))
}

#[tokio::test]
async fn message_bumps_the_direction_facing_away_from_sender() {
	let svc = service();
	let msg = ChatMessage {
		id: ServerMessageId::new_v4(),
		scope: order_scope(),
		customer_id: cid(),
		sender: Sender::Staff,
		text: "quote attached".into(),
		sent_at_ms: 10,
	};

	match svc.record_message(&msg).await.expect("record") {
		InsertOutcome::Inserted { counts: Some(c) } => {
			assert_eq!(c.to_customer, 1);
			assert_eq!(c.to_staff, 0);
		}
		other => panic!("unexpected outcome: {other:?}"),
	}

	assert!(matches!(
		svc.record_message(&msg).await.expect("record"),
		InsertOutcome::Duplicate(_)
	));
	assert_eq!(svc.get(&cid(), &order_scope()).await.expect("get").to_customer, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_sum_exactly() {
	let svc = service();

	let mut tasks = Vec::new();
	for _ in 0..32 {
		let svc = svc.clone();
		tasks.push(tokio::spawn(async move {
			svc.increment(&cid(), &ChannelScope::Global, Direction::ToStaff)
				.await
				.expect("increment");
		}));
	}
	for t in tasks {
		t.await.expect("join");
	}

	assert_eq!(svc.get(&cid(), &ChannelScope::Global).await.expect("get").to_staff, 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_messages_each_count_once() {
	let svc = service();

	let mut tasks = Vec::new();
	for i in 0..2 {
		let svc = svc.clone();
		tasks.push(tokio::spawn(async move {
			let msg = ChatMessage {
				id: ServerMessageId::new_v4(),
				scope: ChannelScope::Global,
				customer_id: cid(),
				sender: Sender::Customer,
				text: format!("hello {i}"),
				sent_at_ms: 100,
			};
			svc.record_message(&msg).await.expect("record")
		}));
	}
	for t in tasks {
		assert!(matches!(t.await.expect("join"), InsertOutcome::Inserted { .. }));
	}

	let counts = svc.get(&cid(), &ChannelScope::Global).await.expect("get");
	assert_eq!(counts.to_staff, 2);
	assert_eq!(counts.to_customer, 0);
}

#[tokio::test]
async fn reset_is_idempotent_and_scoped() {
	let svc = service();
	svc.increment(&cid(), &ChannelScope::Global, Direction::ToStaff)
		.await
		.expect("increment");
	svc.increment(&cid(), &order_scope(), Direction::ToStaff)
		.await
		.expect("increment");

	let after = svc
		.reset(&cid(), &ChannelScope::Global, Direction::ToStaff)
		.await
		.expect("reset");
	assert_eq!(after.to_staff, 0);
	let again = svc
		.reset(&cid(), &ChannelScope::Global, Direction::ToStaff)
		.await
		.expect("reset");
	assert_eq!(again, after);

	let listed = svc.list(&cid()).await.expect("list");
	assert_eq!(listed.len(), 2);
	let order_counts = listed
		.iter()
		.find(|(scope, _)| scope == &order_scope())
		.map(|(_, c)| *c)
		.expect("order counter");
	assert_eq!(order_counts.to_staff, 1);
}
