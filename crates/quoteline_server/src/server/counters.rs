#![forbid(unsafe_code)]

use std::sync::Arc;

use quoteline_domain::{ChannelScope, ChatMessage, CounterKey, CustomerId, Direction, UnreadCounts};

use crate::server::error::HubError;
use crate::store::{CounterOp, InsertOutcome, Store};

/// Unread counters per `(customer, scope, direction)`.
///
/// The only mutators are [`record_message`](Self::record_message),
/// [`increment`](Self::increment) and [`reset`](Self::reset); each is a single
/// store operation, never a read followed by a write.
#[derive(Clone)]
pub struct CounterService {
	store: Arc<dyn Store>,
}

impl CounterService {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self { store }
	}

	/// Persist `msg` and bump the counter facing away from its sender, atomically.
	pub async fn record_message(&self, msg: &ChatMessage) -> Result<InsertOutcome, HubError> {
		let outcome = self.store.insert_message(msg, Some(msg.sender.direction())).await?;
		match &outcome {
			InsertOutcome::Inserted { .. } => {
				metrics::counter!("quoteline_messages_total", "direction" => msg.sender.direction().as_str()).increment(1);
			}
			InsertOutcome::Duplicate(_) => {
				metrics::counter!("quoteline_messages_duplicate_total").increment(1);
			}
		}
		Ok(outcome)
	}

	pub async fn increment(
		&self,
		customer_id: &CustomerId,
		scope: &ChannelScope,
		direction: Direction,
	) -> Result<UnreadCounts, HubError> {
		let key = CounterKey::new(customer_id.clone(), scope.clone());
		Ok(self
			.store
			.upsert_unread_counter(&key, direction, CounterOp::Increment(1))
			.await?)
	}

	/// Clear one direction. Idempotent.
	pub async fn reset(
		&self,
		customer_id: &CustomerId,
		scope: &ChannelScope,
		direction: Direction,
	) -> Result<UnreadCounts, HubError> {
		let key = CounterKey::new(customer_id.clone(), scope.clone());
		let counts = self
			.store
			.upsert_unread_counter(&key, direction, CounterOp::ResetTo(0))
			.await?;
		metrics::counter!("quoteline_unread_resets_total", "direction" => direction.as_str()).increment(1);
		Ok(counts)
	}

	pub async fn get(&self, customer_id: &CustomerId, scope: &ChannelScope) -> Result<UnreadCounts, HubError> {
		let key = CounterKey::new(customer_id.clone(), scope.clone());
		Ok(self.store.get_unread_counter(&key).await?)
	}

	/// Every counter of one customer, sorted by scope.
	pub async fn list(&self, customer_id: &CustomerId) -> Result<Vec<(ChannelScope, UnreadCounts)>, HubError> {
		Ok(self.store.list_unread_counters(customer_id).await?)
	}
}
