#![forbid(unsafe_code)]

use std::sync::Arc;

use quoteline_domain::{CustomerId, Notification, NotificationKind, RoomKey, UserId};
use quoteline_util::Clock;

use crate::server::error::HubError;
use crate::store::Store;

/// Persistent per-user notification feed.
pub struct NotificationService {
	store: Arc<dyn Store>,
	clock: Arc<dyn Clock>,
}

impl NotificationService {
	pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
		Self { store, clock }
	}

	pub async fn notify(
		&self,
		user_id: UserId,
		kind: NotificationKind,
		title: impl Into<String>,
		text: impl Into<String>,
		related_id: Option<String>,
	) -> Result<Notification, HubError> {
		let n = Notification::new(user_id, kind, title, text, related_id, self.clock.now_ms());
		self.store.insert_notification(&n).await?;
		metrics::counter!("quoteline_notifications_total", "kind" => kind.as_str()).increment(1);
		Ok(n)
	}

	pub async fn list(&self, user_id: &UserId) -> Result<Vec<Notification>, HubError> {
		Ok(self.store.list_notifications(user_id).await?)
	}

	pub async fn mark_seen(&self, user_id: &UserId) -> Result<u64, HubError> {
		Ok(self.store.mark_notifications_seen(user_id).await?)
	}

	pub async fn delete_seen(&self, user_id: &UserId) -> Result<u64, HubError> {
		Ok(self.store.delete_seen_notifications(user_id).await?)
	}
}

/// Feed owner for a customer.
pub fn customer_inbox(customer_id: &CustomerId) -> UserId {
	UserId::from(customer_id.clone())
}

/// Room that live-delivers a user's notifications.
pub fn recipient_room(user_id: &UserId) -> RoomKey {
	if user_id.as_str() == UserId::STAFF_INBOX {
		return RoomKey::Staff;
	}
	match CustomerId::new(user_id.as_str()) {
		Ok(id) => RoomKey::Customer(id),
		Err(_) => RoomKey::Staff,
	}
}

/// Feed a session reads from: staff share one inbox.
pub fn inbox_for(identity: &quoteline_domain::Identity) -> UserId {
	if identity.is_staff() {
		UserId::staff_inbox()
	} else {
		identity.id.clone()
	}
}
