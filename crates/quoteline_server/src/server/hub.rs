#![forbid(unsafe_code)]

use std::sync::Arc;

use quoteline_domain::{
	ActionKind, ChannelScope, ChatMessage, CounterKey, CustomerId, Direction, Identity, Notification,
	NotificationKind, NotifyTarget, Order, OrderAction, OrderChange, OrderId, Role, RoomKey, Sender,
	ServerMessageId, Transition, UnreadCounts, UserId,
};
use quoteline_util::Clock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::counters::CounterService;
use crate::server::error::HubError;
use crate::server::events::{HubEvent, RoomEvent, SessionId};
use crate::server::notifications::{NotificationService, customer_inbox, inbox_for, recipient_room};
use crate::server::orders::OrderService;
use crate::server::room_router::RoomRouter;
use crate::server::sessions::SessionRegistry;
use crate::store::{InsertOutcome, Store};

/// Hub settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
	/// Bounded outbox size per session. A session whose outbox overflows is
	/// disconnected.
	pub session_queue_capacity: usize,

	/// Maximum chat message length in characters.
	pub max_message_len: usize,

	/// Used when an order is created without its own tracking steps.
	pub default_tracking_steps: Vec<String>,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			session_queue_capacity: 256,
			max_message_len: 4000,
			default_tracking_steps: vec![
				"received".to_string(),
				"in_production".to_string(),
				"shipped".to_string(),
				"delivered".to_string(),
			],
		}
	}
}

/// Inbound chat message as submitted by a client.
#[derive(Debug, Clone)]
pub struct NewMessage {
	pub scope: ChannelScope,
	pub customer_id: CustomerId,
	pub sender: Sender,
	pub text: String,
	/// Client clock; `0` lets the server stamp it.
	pub sent_at_ms: i64,
}

/// Result of [`Hub::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
	pub message: ChatMessage,
	/// An identical message already existed; nothing was broadcast.
	pub duplicate: bool,
}

/// Chat history plus counters for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
	pub messages: Vec<ChatMessage>,
	pub unread: UnreadCounts,
}

/// Everything a connection talks to. Built once and shared as `Arc<Hub>`.
pub struct Hub {
	cfg: HubConfig,
	clock: Arc<dyn Clock>,
	store: Arc<dyn Store>,
	router: Arc<RoomRouter>,
	sessions: SessionRegistry,
	counters: CounterService,
	orders: OrderService,
	notifications: NotificationService,
}

impl Hub {
	pub fn new(cfg: HubConfig, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
		let router = Arc::new(RoomRouter::new());
		let sessions = SessionRegistry::new(Arc::clone(&router), cfg.session_queue_capacity);

		Self {
			counters: CounterService::new(Arc::clone(&store)),
			orders: OrderService::new(
				Arc::clone(&store),
				Arc::clone(&clock),
				cfg.default_tracking_steps.clone(),
			),
			notifications: NotificationService::new(Arc::clone(&store), Arc::clone(&clock)),
			store,
			cfg,
			clock,
			router,
			sessions,
		}
	}

	pub fn config(&self) -> &HubConfig {
		&self.cfg
	}

	pub fn now_ms(&self) -> i64 {
		self.clock.now_ms()
	}

	pub fn session_count(&self) -> usize {
		self.sessions.count()
	}

	pub fn room_count(&self) -> usize {
		self.router.room_count()
	}

	pub fn room_members(&self, room: &RoomKey) -> Vec<SessionId> {
		self.router.members(room)
	}

	pub fn session_rooms(&self, session: SessionId) -> Vec<RoomKey> {
		self.sessions.rooms(session)
	}

	#[cfg(test)]
	pub(crate) fn order_lock_count(&self) -> usize {
		self.orders.lock_count()
	}

	/// Register an authenticated session. The receiver yields every event for
	/// rooms the session joins and ends when the session is disconnected.
	pub fn connect(&self, identity: Identity) -> (SessionId, mpsc::Receiver<Arc<RoomEvent>>) {
		let out = self.sessions.register(identity);
		metrics::gauge!("quoteline_sessions").set(self.sessions.count() as f64);
		out
	}

	/// Drop the session and all of its memberships.
	pub fn disconnect(&self, session: SessionId) {
		if self.sessions.disconnect(session).is_some() {
			metrics::gauge!("quoteline_sessions").set(self.sessions.count() as f64);
		}
	}

	pub fn identity(&self, session: SessionId) -> Result<Identity, HubError> {
		self.sessions.identity(session).ok_or(HubError::SessionClosed)
	}

	/// Join a room after checking the caller may see it. Idempotent.
	pub async fn join(&self, session: SessionId, room: RoomKey) -> Result<bool, HubError> {
		let identity = self.identity(session)?;

		match &room {
			RoomKey::Customer(customer_id) => {
				if !identity.can_access_customer(customer_id) {
					return Err(HubError::Forbidden(format!("{} may not join {room}", identity.id)));
				}
			}
			RoomKey::Staff => {
				if !identity.is_staff() {
					return Err(HubError::Forbidden(format!("{} may not join {room}", identity.id)));
				}
			}
			RoomKey::Order(order_id) => {
				let order = self.orders.load(order_id).await?;
				if !identity.can_access_customer(&order.customer_id) {
					return Err(HubError::Forbidden(format!("{} may not join {room}", identity.id)));
				}
			}
		}

		let newly = self.sessions.join_room(session, room.clone())?;
		debug!(session_id = %session, room = %room, newly, "joined room");
		Ok(newly)
	}

	pub fn leave(&self, session: SessionId, room: &RoomKey) -> Result<bool, HubError> {
		self.sessions.leave_room(session, room)
	}

	/// Persist a chat message, bump the reader's unread counter and fan out.
	///
	/// A resubmitted message (same channel, sender, text and timestamp) is
	/// acknowledged as a duplicate without any side effect.
	pub async fn send_message(&self, session: SessionId, req: NewMessage) -> Result<MessageReceipt, HubError> {
		let identity = self.identity(session)?;

		if req.text.trim().is_empty() {
			return Err(HubError::Validation("text must not be empty".into()));
		}
		if req.text.chars().count() > self.cfg.max_message_len {
			return Err(HubError::Validation(format!(
				"text longer than {} characters",
				self.cfg.max_message_len
			)));
		}
		if req.sender != Sender::from_role(identity.role) {
			return Err(HubError::Forbidden(format!(
				"{} may not send as {}",
				identity.role,
				req.sender.as_str()
			)));
		}
		if !identity.can_access_customer(&req.customer_id) {
			return Err(HubError::Forbidden(format!(
				"{} may not write to {}",
				identity.id, req.customer_id
			)));
		}
		if let ChannelScope::Order(order_id) = &req.scope {
			let order = self.orders.load(order_id).await?;
			if order.customer_id != req.customer_id {
				return Err(HubError::Validation(format!(
					"order {order_id} does not belong to {}",
					req.customer_id
				)));
			}
		}

		let msg = ChatMessage {
			id: ServerMessageId::new_v4(),
			scope: req.scope,
			customer_id: req.customer_id,
			sender: req.sender,
			text: req.text,
			sent_at_ms: if req.sent_at_ms > 0 { req.sent_at_ms } else { self.now_ms() },
		};

		let counts = match self.counters.record_message(&msg).await? {
			InsertOutcome::Duplicate(existing) => {
				debug!(session_id = %session, scope = %existing.scope, "duplicate message acknowledged");
				return Ok(MessageReceipt {
					message: existing,
					duplicate: true,
				});
			}
			InsertOutcome::Inserted { counts } => counts,
		};

		self.publish_many(&chat_rooms(&msg), HubEvent::Chat(msg.clone()));

		if let Some(counts) = counts {
			let key = CounterKey::new(msg.customer_id.clone(), msg.scope.clone());
			self.publish_unread(key, counts);
		}

		let recipient = match msg.sender {
			Sender::Customer => UserId::staff_inbox(),
			Sender::Staff => customer_inbox(&msg.customer_id),
		};
		let title = match &msg.scope {
			ChannelScope::Order(id) => format!("New message on order {id}"),
			ChannelScope::Global => "New support message".to_string(),
		};
		let related = msg.scope.order_id().map(ToString::to_string);
		self.notify(recipient, NotificationKind::Message, title, preview(&msg.text), related)
			.await;

		Ok(MessageReceipt {
			message: msg,
			duplicate: false,
		})
	}

	/// Ephemeral typing indicator. Nothing is stored.
	pub async fn typing(
		&self,
		session: SessionId,
		customer_id: CustomerId,
		order_id: Option<OrderId>,
		typing: bool,
	) -> Result<(), HubError> {
		let identity = self.identity(session)?;
		if !identity.can_access_customer(&customer_id) {
			return Err(HubError::Forbidden(format!("{} may not type for {customer_id}", identity.id)));
		}
		if let Some(id) = &order_id {
			let order = self.orders.load(id).await?;
			if order.customer_id != customer_id {
				return Err(HubError::Forbidden(format!("{} may not type in order {id}", identity.id)));
			}
		}

		let rooms = match &order_id {
			Some(id) => vec![RoomKey::Order(id.clone())],
			None => vec![RoomKey::Customer(customer_id.clone()), RoomKey::Staff],
		};
		self.publish_many(
			&rooms,
			HubEvent::Typing {
				customer_id,
				order_id,
				role: identity.role,
				typing,
			},
		);
		Ok(())
	}

	/// Clear the caller's side of a channel counter and broadcast the result.
	pub async fn mark_read(
		&self,
		session: SessionId,
		customer_id: CustomerId,
		scope: ChannelScope,
	) -> Result<UnreadCounts, HubError> {
		let identity = self.identity(session)?;
		if !identity.can_access_customer(&customer_id) {
			return Err(HubError::Forbidden(format!("{} may not read {customer_id}", identity.id)));
		}

		let counts = self
			.counters
			.reset(&customer_id, &scope, Direction::read_by(identity.role))
			.await?;
		self.publish_unread(CounterKey::new(customer_id, scope), counts);
		Ok(counts)
	}

	/// History since `since_ms` plus current counters, for (re)joining clients.
	pub async fn snapshot(
		&self,
		session: SessionId,
		customer_id: CustomerId,
		scope: ChannelScope,
		since_ms: i64,
	) -> Result<ChannelSnapshot, HubError> {
		let identity = self.identity(session)?;
		if !identity.can_access_customer(&customer_id) {
			return Err(HubError::Forbidden(format!("{} may not read {customer_id}", identity.id)));
		}
		if let ChannelScope::Order(order_id) = &scope {
			let order = self.orders.get(&identity, order_id).await?;
			if order.customer_id != customer_id {
				return Err(HubError::NotFound(format!("order {order_id}")));
			}
		}

		let messages = self.store.list_messages(&customer_id, &scope, since_ms).await?;
		let unread = self.counters.get(&customer_id, &scope).await?;
		Ok(ChannelSnapshot { messages, unread })
	}

	/// Every unread counter of one customer.
	pub async fn unread_counters(
		&self,
		session: SessionId,
		customer_id: &CustomerId,
	) -> Result<Vec<(ChannelScope, UnreadCounts)>, HubError> {
		let identity = self.identity(session)?;
		if !identity.can_access_customer(customer_id) {
			return Err(HubError::Forbidden(format!("{} may not read {customer_id}", identity.id)));
		}
		self.counters.list(customer_id).await
	}

	pub async fn create_order(
		&self,
		session: SessionId,
		customer_id: CustomerId,
		description: String,
		tracking_steps: Vec<String>,
	) -> Result<Order, HubError> {
		let identity = self.identity(session)?;
		let order = self
			.orders
			.create(&identity, customer_id, description, tracking_steps)
			.await?;

		let recipient = match identity.role {
			Role::Customer => UserId::staff_inbox(),
			Role::Staff => customer_inbox(&order.customer_id),
		};
		self.notify(
			recipient,
			NotificationKind::Order,
			"New quote request",
			format!("Order {} was created", order.id),
			Some(order.id.to_string()),
		)
		.await;

		Ok(order)
	}

	pub async fn get_order(&self, session: SessionId, order_id: &OrderId) -> Result<Order, HubError> {
		let identity = self.identity(session)?;
		self.orders.get(&identity, order_id).await
	}

	/// Apply one state-machine action, then broadcast `order_updated` and
	/// notify the party named by the transition rule.
	pub async fn transition_order(
		&self,
		session: SessionId,
		order_id: &OrderId,
		action: OrderAction,
	) -> Result<Transition, HubError> {
		let identity = self.identity(session)?;
		let transition = self.orders.transition(&identity, order_id, &action).await?;

		let order = &transition.order;
		self.publish_many(
			&[RoomKey::Customer(order.customer_id.clone()), RoomKey::Staff],
			HubEvent::OrderUpdated {
				order: Box::new(order.clone()),
				change: transition.change.clone(),
			},
		);

		let recipient = match (transition.rule.notify, identity.role) {
			(NotifyTarget::Customer, _) | (NotifyTarget::Counterparty, Role::Staff) => {
				customer_inbox(&order.customer_id)
			}
			(NotifyTarget::Staff, _) | (NotifyTarget::Counterparty, Role::Customer) => UserId::staff_inbox(),
		};
		let (title, text) = transition_notice(&transition.change);
		self.notify(recipient, NotificationKind::Order, title, text, Some(order.id.to_string()))
			.await;

		Ok(transition)
	}

	pub async fn list_notifications(&self, session: SessionId) -> Result<Vec<Notification>, HubError> {
		let identity = self.identity(session)?;
		self.notifications.list(&inbox_for(&identity)).await
	}

	pub async fn mark_notifications_seen(&self, session: SessionId) -> Result<u64, HubError> {
		let identity = self.identity(session)?;
		self.notifications.mark_seen(&inbox_for(&identity)).await
	}

	pub async fn delete_seen_notifications(&self, session: SessionId) -> Result<u64, HubError> {
		let identity = self.identity(session)?;
		self.notifications.delete_seen(&inbox_for(&identity)).await
	}

	/// Persist and live-deliver a notification. Failures are logged; the
	/// triggering operation has already committed.
	async fn notify(
		&self,
		recipient: UserId,
		kind: NotificationKind,
		title: impl Into<String>,
		text: impl Into<String>,
		related_id: Option<String>,
	) {
		match self.notifications.notify(recipient, kind, title, text, related_id).await {
			Ok(n) => {
				let room = recipient_room(&n.user_id);
				self.publish(room, HubEvent::Notification(n));
			}
			Err(e) => warn!(error = %e, "failed to store notification"),
		}
	}

	fn publish_unread(&self, key: CounterKey, counts: UnreadCounts) {
		let rooms = [RoomKey::Customer(key.customer_id.clone()), RoomKey::Staff];
		self.publish_many(&rooms, HubEvent::Unread { key, counts });
	}

	fn publish_many(&self, rooms: &[RoomKey], event: HubEvent) {
		for room in rooms {
			self.publish(room.clone(), event.clone());
		}
	}

	/// Fan out to one room and disconnect every member that could not keep up.
	fn publish(&self, room: RoomKey, event: HubEvent) -> usize {
		let event = Arc::new(RoomEvent {
			room,
			at_ms: self.now_ms(),
			event,
		});
		let report = self.router.broadcast(Arc::clone(&event));

		metrics::counter!("quoteline_events_published_total", "kind" => event.kind()).increment(1);
		metrics::counter!("quoteline_events_delivered_total").increment(report.delivered as u64);

		for session in report.failed() {
			if report.overflowed.contains(&session) {
				metrics::counter!("quoteline_sessions_overflowed_total").increment(1);
				info!(session_id = %session, room = %event.room, "disconnecting slow session");
			}
			self.disconnect(session);
		}

		report.delivered
	}
}

/// Rooms a chat message is delivered to.
fn chat_rooms(msg: &ChatMessage) -> Vec<RoomKey> {
	match &msg.scope {
		ChannelScope::Order(order_id) => vec![
			RoomKey::Order(order_id.clone()),
			RoomKey::Customer(msg.customer_id.clone()),
		],
		ChannelScope::Global => vec![RoomKey::Customer(msg.customer_id.clone()), RoomKey::Staff],
	}
}

fn preview(text: &str) -> String {
	const MAX: usize = 80;
	if text.chars().count() <= MAX {
		return text.to_string();
	}
	let mut out: String = text.chars().take(MAX).collect();
	out.push('…');
	out
}

fn transition_notice(change: &OrderChange) -> (String, String) {
	let title = match change.action {
		ActionKind::SendQuote => "Quote received",
		ActionKind::ApproveQuote => "Quote approved",
		ActionKind::Reject => "Order rejected",
		ActionKind::RequestPayment => "Advance payment requested",
		ActionKind::SubmitAdvance => "Advance payment submitted",
		ActionKind::ConfirmAdvance => "Advance payment confirmed",
		ActionKind::RequestFinalPayment => "Final payment requested",
		ActionKind::SubmitFinal => "Final payment submitted",
		ActionKind::ConfirmFinal => "Order paid in full",
		ActionKind::SetTrackingStep => "Tracking updated",
	};
	let text = change
		.message
		.clone()
		.unwrap_or_else(|| format!("Order {} is now {}", change.order_id, change.new_status));
	(title.to_string(), text)
}
