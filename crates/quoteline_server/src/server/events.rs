#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use quoteline_domain::{
	ChatMessage, CounterKey, CustomerId, Notification, Order, OrderChange, OrderId, Role, RoomKey, UnreadCounts,
};
use quoteline_protocol::{convert, pb};
use tokio::sync::mpsc;

/// Server-local session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Bounded per-session queue of outbound events.
pub type Outbox = mpsc::Sender<Arc<RoomEvent>>;

/// Payload of an outbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
	Chat(ChatMessage),
	Typing {
		customer_id: CustomerId,
		order_id: Option<OrderId>,
		role: Role,
		typing: bool,
	},
	OrderUpdated {
		order: Box<Order>,
		change: OrderChange,
	},
	Unread {
		key: CounterKey,
		counts: UnreadCounts,
	},
	Notification(Notification),
}

/// One event fanned out to a room. Shared between every member's outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomEvent {
	pub room: RoomKey,
	pub at_ms: i64,
	pub event: HubEvent,
}

impl RoomEvent {
	pub fn kind(&self) -> &'static str {
		match &self.event {
			HubEvent::Chat(_) => "chat",
			HubEvent::Typing { .. } => "typing",
			HubEvent::OrderUpdated { .. } => "order_updated",
			HubEvent::Unread { .. } => "unread",
			HubEvent::Notification(_) => "notification",
		}
	}

	pub fn to_pb(&self) -> pb::EventEnvelope {
		use pb::event_envelope::Event;

		let event = match &self.event {
			HubEvent::Chat(msg) => Event::Chat(msg.into()),
			HubEvent::Typing {
				customer_id,
				order_id,
				role,
				typing,
			} => Event::Typing(pb::Typing {
				customer_id: customer_id.to_string(),
				order_id: order_id.as_ref().map(ToString::to_string),
				role: pb::Role::from(*role) as i32,
				typing: *typing,
			}),
			HubEvent::OrderUpdated { order, change } => Event::OrderUpdated(pb::OrderUpdated {
				order: Some(order.as_ref().into()),
				change: Some(change.into()),
			}),
			HubEvent::Unread { key, counts } => Event::Unread(convert::unread_to_pb(&key.customer_id, &key.scope, *counts)),
			HubEvent::Notification(n) => Event::Notification(n.into()),
		};

		pb::EventEnvelope {
			room: self.room.to_string(),
			server_time_unix_ms: self.at_ms,
			event: Some(event),
		}
	}
}
