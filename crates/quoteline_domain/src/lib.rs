#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod order;

pub use order::{
	ActionKind, Actor, NotifyTarget, Order, OrderAction, OrderChange, OrderStatus, PaymentRecord, PaymentRequest,
	TrackingEntry, Transition, TransitionError, TransitionRule, apply_transition,
};

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown role: {0}")]
	UnknownRole(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! string_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			/// Create a non-empty id. Surrounding whitespace is trimmed.
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				let trimmed = id.trim();
				if trimmed.is_empty() {
					return Err(ParseIdError::Empty);
				}
				if trimmed.len() == id.len() {
					Ok(Self(id))
				} else {
					Ok(Self(trimmed.to_string()))
				}
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s.to_string())
			}
		}
	};
}

string_id!(
	/// Customer identifier (also the verified identity id of a customer session).
	CustomerId
);

string_id!(
	/// Order ("quote") identifier.
	OrderId
);

string_id!(
	/// Notification recipient / authenticated principal identifier.
	UserId
);

impl UserId {
	/// Shared inbox id used for notifications addressed to all staff.
	pub const STAFF_INBOX: &'static str = "staff";

	pub fn staff_inbox() -> Self {
		Self(Self::STAFF_INBOX.to_string())
	}
}

impl From<CustomerId> for UserId {
	fn from(id: CustomerId) -> Self {
		Self(id.into_string())
	}
}

/// Role of an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Customer,
	Staff,
}

impl Role {
	pub const fn as_str(self) -> &'static str {
		match self {
			Role::Customer => "customer",
			Role::Staff => "staff",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Role {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"customer" | "user" => Ok(Role::Customer),
			"staff" | "admin" => Ok(Role::Staff),
			other => Err(ParseIdError::UnknownRole(other.to_string())),
		}
	}
}

/// Verified identity of a connection, supplied by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub id: UserId,
	pub role: Role,
	#[serde(default)]
	pub permissions: Vec<String>,
}

impl Identity {
	pub fn new(id: UserId, role: Role) -> Self {
		Self {
			id,
			role,
			permissions: Vec::new(),
		}
	}

	pub fn is_staff(&self) -> bool {
		self.role == Role::Staff
	}

	/// The customer this identity acts as, if it is a customer session.
	pub fn customer_id(&self) -> Option<CustomerId> {
		match self.role {
			Role::Customer => Some(CustomerId(self.id.as_str().to_string())),
			Role::Staff => None,
		}
	}

	/// True when this identity may act on behalf of `customer`.
	pub fn can_access_customer(&self, customer: &CustomerId) -> bool {
		self.is_staff() || self.id.as_str() == customer.as_str()
	}
}

/// Logical broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum RoomKey {
	/// Every session of one customer (any device/tab).
	Customer(CustomerId),
	/// Every staff session.
	Staff,
	/// Two-party chat room for one order.
	Order(OrderId),
}

impl RoomKey {
	pub const CUSTOMER_PREFIX: &'static str = "customer:";
	pub const ORDER_PREFIX: &'static str = "order:";
	pub const STAFF: &'static str = "staff";

	/// Parse `customer:{id}`, `staff` or `order:{id}`.
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		if s == Self::STAFF {
			return Ok(RoomKey::Staff);
		}

		if let Some(rest) = s.strip_prefix(Self::CUSTOMER_PREFIX) {
			return Ok(RoomKey::Customer(CustomerId::new(rest.to_string())?));
		}

		if let Some(rest) = s.strip_prefix(Self::ORDER_PREFIX) {
			return Ok(RoomKey::Order(OrderId::new(rest.to_string())?));
		}

		Err(ParseIdError::InvalidFormat(
			"expected customer:<id>, staff or order:<id>".into(),
		))
	}
}

impl fmt::Display for RoomKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RoomKey::Customer(id) => write!(f, "{}{}", Self::CUSTOMER_PREFIX, id),
			RoomKey::Staff => f.write_str(Self::STAFF),
			RoomKey::Order(id) => write!(f, "{}{}", Self::ORDER_PREFIX, id),
		}
	}
}

impl FromStr for RoomKey {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomKey::parse(s)
	}
}

/// Which chat a message or counter belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "order_id")]
pub enum ChannelScope {
	/// Per-order chat.
	Order(OrderId),
	/// Per-customer global support chat.
	Global,
}

impl ChannelScope {
	/// Stable string form used as a storage key (`order:{id}` / `global`).
	pub fn storage_key(&self) -> String {
		match self {
			ChannelScope::Order(id) => format!("order:{id}"),
			ChannelScope::Global => "global".to_string(),
		}
	}

	pub fn parse_storage_key(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s == "global" {
			return Ok(ChannelScope::Global);
		}
		match s.strip_prefix("order:") {
			Some(rest) => Ok(ChannelScope::Order(OrderId::new(rest.to_string())?)),
			None => Err(ParseIdError::InvalidFormat("expected order:<id> or global".into())),
		}
	}

	pub fn order_id(&self) -> Option<&OrderId> {
		match self {
			ChannelScope::Order(id) => Some(id),
			ChannelScope::Global => None,
		}
	}
}

impl fmt::Display for ChannelScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.storage_key())
	}
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
	Customer,
	Staff,
}

impl Sender {
	pub const fn as_str(self) -> &'static str {
		match self {
			Sender::Customer => "customer",
			Sender::Staff => "staff",
		}
	}

	/// Unread direction a message from this sender increments.
	pub const fn direction(self) -> Direction {
		match self {
			Sender::Customer => Direction::ToStaff,
			Sender::Staff => Direction::ToCustomer,
		}
	}

	pub const fn from_role(role: Role) -> Self {
		match role {
			Role::Customer => Sender::Customer,
			Role::Staff => Sender::Staff,
		}
	}
}

impl FromStr for Sender {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Role::from_str(s).map(Sender::from_role)
	}
}

/// Direction of an unread count: who has not read it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
	/// Customer wrote, staff has not read.
	ToStaff,
	/// Staff wrote, customer has not read.
	ToCustomer,
}

impl Direction {
	pub const fn as_str(self) -> &'static str {
		match self {
			Direction::ToStaff => "to_staff",
			Direction::ToCustomer => "to_customer",
		}
	}

	/// Direction whose counter `role` clears when it opens a channel.
	pub const fn read_by(role: Role) -> Self {
		match role {
			Role::Customer => Direction::ToCustomer,
			Role::Staff => Direction::ToStaff,
		}
	}
}

/// Server-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerMessageId(pub uuid::Uuid);

impl ServerMessageId {
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for ServerMessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Append-only chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub id: ServerMessageId,
	pub scope: ChannelScope,
	pub customer_id: CustomerId,
	pub sender: Sender,
	pub text: String,
	pub sent_at_ms: i64,
}

impl ChatMessage {
	pub fn natural_key(&self) -> MessageKey {
		MessageKey {
			sender: self.sender,
			text: self.text.clone(),
			sent_at_ms: self.sent_at_ms,
		}
	}
}

/// Natural key that identifies "the same message" without a pre-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
	pub sender: Sender,
	pub text: String,
	pub sent_at_ms: i64,
}

/// Counter key: one customer's view of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
	pub customer_id: CustomerId,
	pub scope: ChannelScope,
}

impl CounterKey {
	pub fn new(customer_id: CustomerId, scope: ChannelScope) -> Self {
		Self { customer_id, scope }
	}
}

/// Both directions of one counter key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCounts {
	pub to_staff: u64,
	pub to_customer: u64,
}

impl UnreadCounts {
	pub fn get(&self, direction: Direction) -> u64 {
		match direction {
			Direction::ToStaff => self.to_staff,
			Direction::ToCustomer => self.to_customer,
		}
	}

	pub fn get_mut(&mut self, direction: Direction) -> &mut u64 {
		match direction {
			Direction::ToStaff => &mut self.to_staff,
			Direction::ToCustomer => &mut self.to_customer,
		}
	}
}

/// Notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
	Order,
	Message,
	System,
}

impl NotificationKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			NotificationKind::Order => "order",
			NotificationKind::Message => "message",
			NotificationKind::System => "system",
		}
	}
}

impl FromStr for NotificationKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"order" => Ok(NotificationKind::Order),
			"message" => Ok(NotificationKind::Message),
			"system" => Ok(NotificationKind::System),
			"" => Err(ParseIdError::Empty),
			other => Err(ParseIdError::InvalidFormat(format!("unknown notification kind: {other}"))),
		}
	}
}

/// Entry in a user's notification feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
	pub id: uuid::Uuid,
	pub user_id: UserId,
	pub title: String,
	pub text: String,
	pub kind: NotificationKind,
	pub related_id: Option<String>,
	pub seen: bool,
	pub created_at_ms: i64,
}

impl Notification {
	pub fn new(
		user_id: UserId,
		kind: NotificationKind,
		title: impl Into<String>,
		text: impl Into<String>,
		related_id: Option<String>,
		created_at_ms: i64,
	) -> Self {
		Self {
			id: uuid::Uuid::new_v4(),
			user_id,
			title: title.into(),
			text: text.into(),
			kind,
			related_id,
			seen: false,
			created_at_ms,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn room_key_parse_and_display() {
		let rk = RoomKey::parse("customer:c-42").unwrap();
		assert_eq!(rk, RoomKey::Customer(CustomerId::new("c-42").unwrap()));
		assert_eq!(rk.to_string(), "customer:c-42");

		assert_eq!(RoomKey::parse("staff").unwrap(), RoomKey::Staff);
		assert_eq!(
			"order:o-1".parse::<RoomKey>().unwrap().to_string(),
			"order:o-1"
		);
	}

	#[test]
	fn room_key_rejects_garbage() {
		assert!(RoomKey::parse("").is_err());
		assert!(RoomKey::parse("customer:").is_err());
		assert!(RoomKey::parse("room:twitch/x").is_err());
	}

	#[test]
	fn channel_scope_storage_key() {
		let scope = ChannelScope::Order(OrderId::new("o-9").unwrap());
		assert_eq!(scope.storage_key(), "order:o-9");
		assert_eq!(ChannelScope::parse_storage_key("order:o-9").unwrap(), scope);
		assert_eq!(ChannelScope::parse_storage_key("global").unwrap(), ChannelScope::Global);
	}

	#[test]
	fn sender_direction_is_opposite_of_reader() {
		assert_eq!(Sender::Customer.direction(), Direction::ToStaff);
		assert_eq!(Sender::Staff.direction(), Direction::ToCustomer);
		assert_eq!(Direction::read_by(Role::Staff), Direction::ToStaff);
		assert_eq!(Direction::read_by(Role::Customer), Direction::ToCustomer);
	}

	#[test]
	fn identity_customer_access() {
		let cust = Identity::new(UserId::new("c-1").unwrap(), Role::Customer);
		let staff = Identity::new(UserId::new("s-1").unwrap(), Role::Staff);
		let c1 = CustomerId::new("c-1").unwrap();
		let c2 = CustomerId::new("c-2").unwrap();

		assert!(cust.can_access_customer(&c1));
		assert!(!cust.can_access_customer(&c2));
		assert!(staff.can_access_customer(&c2));
		assert_eq!(cust.customer_id(), Some(c1));
		assert_eq!(staff.customer_id(), None);
	}

	#[test]
	fn rejects_empty_ids() {
		assert!(CustomerId::new("").is_err());
		assert!(OrderId::new("   ").is_err());
		assert_eq!(UserId::new(" u ").unwrap().as_str(), "u");
	}
}
