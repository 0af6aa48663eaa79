#![forbid(unsafe_code)]

//! Durable state behind the hub: orders, chat history, unread counters and
//! notifications.

mod memory;
mod sql;

pub use memory::MemoryStore;
pub use sql::SqlStore;

use quoteline_domain::{
	ChannelScope, ChatMessage, CounterKey, CustomerId, Direction, Notification, Order, OrderId, TrackingEntry,
	UnreadCounts, UserId,
};

/// Counter mutation applied by [`Store::upsert_unread_counter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
	Increment(u64),
	ResetTo(u64),
}

/// Result of [`Store::insert_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
	/// Stored; `counts` is the post-increment counter when one was requested.
	Inserted { counts: Option<UnreadCounts> },
	/// A message with the same natural key already exists. Nothing changed.
	Duplicate(ChatMessage),
}

/// Storage backend.
///
/// `insert_message` with a direction and `commit_transition` must each be a
/// single atomic unit.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
	async fn get_order(&self, id: &OrderId) -> anyhow::Result<Option<Order>>;

	async fn insert_order(&self, order: &Order) -> anyhow::Result<()>;

	/// Overwrite every field except `tracking_history`.
	async fn update_order(&self, order: &Order) -> anyhow::Result<()>;

	async fn append_tracking_history(&self, order_id: &OrderId, entry: &TrackingEntry) -> anyhow::Result<()>;

	/// `update_order` plus an optional history append.
	async fn commit_transition(&self, order: &Order, entry: Option<&TrackingEntry>) -> anyhow::Result<()>;

	/// Idempotent on `(customer_id, scope, sender, text, sent_at_ms)`. When
	/// `count` is set the matching unread counter is incremented by one in the
	/// same unit; duplicates never increment.
	async fn insert_message(&self, msg: &ChatMessage, count: Option<Direction>) -> anyhow::Result<InsertOutcome>;

	/// Messages with `sent_at_ms >= since_ms`, oldest first.
	async fn list_messages(
		&self,
		customer_id: &CustomerId,
		scope: &ChannelScope,
		since_ms: i64,
	) -> anyhow::Result<Vec<ChatMessage>>;

	async fn upsert_unread_counter(
		&self,
		key: &CounterKey,
		direction: Direction,
		op: CounterOp,
	) -> anyhow::Result<UnreadCounts>;

	/// Zero counts for a key that was never touched.
	async fn get_unread_counter(&self, key: &CounterKey) -> anyhow::Result<UnreadCounts>;

	async fn list_unread_counters(&self, customer_id: &CustomerId) -> anyhow::Result<Vec<(ChannelScope, UnreadCounts)>>;

	async fn insert_notification(&self, notification: &Notification) -> anyhow::Result<()>;

	/// Newest first.
	async fn list_notifications(&self, user_id: &UserId) -> anyhow::Result<Vec<Notification>>;

	/// Returns how many notifications flipped to seen.
	async fn mark_notifications_seen(&self, user_id: &UserId) -> anyhow::Result<u64>;

	/// Returns how many notifications were deleted.
	async fn delete_seen_notifications(&self, user_id: &UserId) -> anyhow::Result<u64>;
}
