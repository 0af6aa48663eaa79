#![forbid(unsafe_code)]

use std::sync::Arc;

use dashmap::DashMap;
use quoteline_domain::{CustomerId, Identity, Order, OrderAction, OrderId, Transition, apply_transition};
use quoteline_util::Clock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::server::error::HubError;
use crate::store::Store;

/// Order lifecycle on top of the store.
///
/// Transitions for one order run one at a time; different orders proceed in
/// parallel.
pub struct OrderService {
	store: Arc<dyn Store>,
	clock: Arc<dyn Clock>,
	locks: DashMap<OrderId, Arc<Mutex<()>>>,
	default_tracking_steps: Vec<String>,
}

impl OrderService {
	pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, default_tracking_steps: Vec<String>) -> Self {
		Self {
			store,
			clock,
			locks: DashMap::new(),
			default_tracking_steps,
		}
	}

	/// Create a `pending` order. Empty `tracking_steps` falls back to the
	/// configured default.
	pub async fn create(
		&self,
		identity: &Identity,
		customer_id: CustomerId,
		description: String,
		tracking_steps: Vec<String>,
	) -> Result<Order, HubError> {
		if !identity.can_access_customer(&customer_id) {
			return Err(HubError::Forbidden(format!(
				"{} may not create orders for {customer_id}",
				identity.id
			)));
		}
		if description.trim().is_empty() {
			return Err(HubError::Validation("description must not be empty".into()));
		}

		let steps = if tracking_steps.is_empty() {
			self.default_tracking_steps.clone()
		} else {
			tracking_steps
		};

		let id = OrderId::new(uuid::Uuid::new_v4().to_string())?;
		let order = Order::new(id, customer_id, description, steps, self.clock.now_ms())?;
		self.store.insert_order(&order).await?;

		metrics::counter!("quoteline_orders_created_total").increment(1);
		info!(order_id = %order.id, customer_id = %order.customer_id, "order created");
		Ok(order)
	}

	/// Load an order the caller may see.
	pub async fn get(&self, identity: &Identity, id: &OrderId) -> Result<Order, HubError> {
		let order = self.load(id).await?;
		if !identity.can_access_customer(&order.customer_id) {
			// Indistinguishable from a missing order for other customers.
			return Err(HubError::NotFound(format!("order {id}")));
		}
		Ok(order)
	}

	/// Load without an access check.
	pub async fn load(&self, id: &OrderId) -> Result<Order, HubError> {
		self.store
			.get_order(id)
			.await?
			.ok_or_else(|| HubError::NotFound(format!("order {id}")))
	}

	/// Validate and commit one action. On any error the stored order is untouched.
	pub async fn transition(
		&self,
		identity: &Identity,
		id: &OrderId,
		action: &OrderAction,
	) -> Result<Transition, HubError> {
		let lock = self.lock_for(id);
		let result = {
			let _guard = lock.lock().await;
			self.transition_locked(identity, id, action).await
		};
		drop(lock);

		// Only the map holds it now; nobody is waiting on this order.
		self.locks.remove_if(id, |_, l| Arc::strong_count(l) == 1);
		result
	}

	async fn transition_locked(
		&self,
		identity: &Identity,
		id: &OrderId,
		action: &OrderAction,
	) -> Result<Transition, HubError> {
		let current = self.load(id).await?;
		if !identity.can_access_customer(&current.customer_id) {
			return Err(HubError::Forbidden(format!(
				"{} may not act on order {id}",
				identity.id
			)));
		}

		let transition = match apply_transition(&current, action, identity.role, self.clock.now_ms()) {
			Ok(t) => t,
			Err(e) => {
				metrics::counter!("quoteline_order_transitions_rejected_total", "action" => action.kind().as_str())
					.increment(1);
				debug!(order_id = %id, action = %action.kind(), error = %e, "transition rejected");
				return Err(e.into());
			}
		};

		self.store
			.commit_transition(&transition.order, transition.history_entry.as_ref())
			.await?;

		metrics::counter!("quoteline_order_transitions_total", "action" => action.kind().as_str()).increment(1);
		info!(
			order_id = %id,
			action = %transition.change.action,
			from = %transition.change.old_status,
			to = %transition.change.new_status,
			"order transitioned"
		);
		Ok(transition)
	}

	fn lock_for(&self, id: &OrderId) -> Arc<Mutex<()>> {
		Arc::clone(self.locks.entry(id.clone()).or_default().value())
	}

	#[cfg(test)]
	pub(crate) fn lock_count(&self) -> usize {
		self.locks.len()
	}
}
