#![forbid(unsafe_code)]

use std::collections::HashSet;

use anyhow::anyhow;
use dashmap::DashMap;
use quoteline_domain::{
	ChannelScope, ChatMessage, CounterKey, CustomerId, Direction, MessageKey, Notification, Order, OrderId,
	TrackingEntry, UnreadCounts, UserId,
};

use super::{CounterOp, InsertOutcome, Store};

/// In-process store. Nothing survives a restart.
///
/// Lock order when two maps are touched together: channel log, then counter.
#[derive(Debug, Default)]
pub struct MemoryStore {
	orders: DashMap<OrderId, Order>,
	channels: DashMap<CounterKey, ChannelLog>,
	counters: DashMap<CounterKey, UnreadCounts>,
	notifications: DashMap<UserId, Vec<Notification>>,
}

#[derive(Debug, Default)]
struct ChannelLog {
	messages: Vec<ChatMessage>,
	keys: HashSet<MessageKey>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

fn apply_op(counts: &mut UnreadCounts, direction: Direction, op: CounterOp) {
	let slot = counts.get_mut(direction);
	match op {
		CounterOp::Increment(n) => *slot = slot.saturating_add(n),
		CounterOp::ResetTo(n) => *slot = n,
	}
}

#[async_trait::async_trait]
impl Store for MemoryStore {
	async fn get_order(&self, id: &OrderId) -> anyhow::Result<Option<Order>> {
		Ok(self.orders.get(id).map(|o| o.clone()))
	}

	async fn insert_order(&self, order: &Order) -> anyhow::Result<()> {
		match self.orders.entry(order.id.clone()) {
			dashmap::mapref::entry::Entry::Occupied(_) => Err(anyhow!("order {} already exists", order.id)),
			dashmap::mapref::entry::Entry::Vacant(slot) => {
				slot.insert(order.clone());
				Ok(())
			}
		}
	}

	async fn update_order(&self, order: &Order) -> anyhow::Result<()> {
		let mut slot = self
			.orders
			.get_mut(&order.id)
			.ok_or_else(|| anyhow!("order {} does not exist", order.id))?;
		let history = std::mem::take(&mut slot.tracking_history);
		*slot = order.clone();
		slot.tracking_history = history;
		Ok(())
	}

	async fn append_tracking_history(&self, order_id: &OrderId, entry: &TrackingEntry) -> anyhow::Result<()> {
		let mut slot = self
			.orders
			.get_mut(order_id)
			.ok_or_else(|| anyhow!("order {order_id} does not exist"))?;
		slot.tracking_history.push(entry.clone());
		Ok(())
	}

	async fn commit_transition(&self, order: &Order, entry: Option<&TrackingEntry>) -> anyhow::Result<()> {
		// Single guard for both writes.
		let mut slot = self
			.orders
			.get_mut(&order.id)
			.ok_or_else(|| anyhow!("order {} does not exist", order.id))?;
		let mut history = std::mem::take(&mut slot.tracking_history);
		if let Some(entry) = entry {
			history.push(entry.clone());
		}
		*slot = order.clone();
		slot.tracking_history = history;
		Ok(())
	}

	async fn insert_message(&self, msg: &ChatMessage, count: Option<Direction>) -> anyhow::Result<InsertOutcome> {
		let key = CounterKey::new(msg.customer_id.clone(), msg.scope.clone());
		let natural = msg.natural_key();

		let mut log = self.channels.entry(key.clone()).or_default();
		if log.keys.contains(&natural) {
			let existing = log
				.messages
				.iter()
				.find(|m| m.natural_key() == natural)
				.cloned()
				.unwrap_or_else(|| msg.clone());
			return Ok(InsertOutcome::Duplicate(existing));
		}

		log.keys.insert(natural);
		let at = log.messages.partition_point(|m| m.sent_at_ms <= msg.sent_at_ms);
		log.messages.insert(at, msg.clone());

		let counts = count.map(|direction| {
			let mut counts = self.counters.entry(key).or_default();
			apply_op(&mut counts, direction, CounterOp::Increment(1));
			*counts
		});

		drop(log);
		Ok(InsertOutcome::Inserted { counts })
	}

	async fn list_messages(
		&self,
		customer_id: &CustomerId,
		scope: &ChannelScope,
		since_ms: i64,
	) -> anyhow::Result<Vec<ChatMessage>> {
		let key = CounterKey::new(customer_id.clone(), scope.clone());
		Ok(self
			.channels
			.get(&key)
			.map(|log| {
				log.messages
					.iter()
					.filter(|m| m.sent_at_ms >= since_ms)
					.cloned()
					.collect()
			})
			.unwrap_or_default())
	}

	async fn upsert_unread_counter(
		&self,
		key: &CounterKey,
		direction: Direction,
		op: CounterOp,
	) -> anyhow::Result<UnreadCounts> {
		let mut counts = self.counters.entry(key.clone()).or_default();
		apply_op(&mut counts, direction, op);
		Ok(*counts)
	}

	async fn get_unread_counter(&self, key: &CounterKey) -> anyhow::Result<UnreadCounts> {
		Ok(self.counters.get(key).map(|c| *c).unwrap_or_default())
	}

	async fn list_unread_counters(&self, customer_id: &CustomerId) -> anyhow::Result<Vec<(ChannelScope, UnreadCounts)>> {
		let mut out: Vec<(ChannelScope, UnreadCounts)> = self
			.counters
			.iter()
			.filter(|e| &e.key().customer_id == customer_id)
			.map(|e| (e.key().scope.clone(), *e.value()))
			.collect();
		out.sort_by_key(|(scope, _)| scope.storage_key());
		Ok(out)
	}

	async fn insert_notification(&self, notification: &Notification) -> anyhow::Result<()> {
		self.notifications
			.entry(notification.user_id.clone())
			.or_default()
			.push(notification.clone());
		Ok(())
	}

	async fn list_notifications(&self, user_id: &UserId) -> anyhow::Result<Vec<Notification>> {
		let mut out = self.notifications.get(user_id).map(|v| v.clone()).unwrap_or_default();
		out.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
		Ok(out)
	}

	async fn mark_notifications_seen(&self, user_id: &UserId) -> anyhow::Result<u64> {
		let Some(mut list) = self.notifications.get_mut(user_id) else {
			return Ok(0);
		};
		let mut flipped = 0;
		for n in list.iter_mut().filter(|n| !n.seen) {
			n.seen = true;
			flipped += 1;
		}
		Ok(flipped)
	}

	async fn delete_seen_notifications(&self, user_id: &UserId) -> anyhow::Result<u64> {
		let Some(mut list) = self.notifications.get_mut(user_id) else {
			return Ok(0);
		};
		let before = list.len();
		list.retain(|n| !n.seen);
		Ok((before - list.len()) as u64)
	}
}
