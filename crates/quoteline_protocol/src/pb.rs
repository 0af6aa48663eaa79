#![forbid(unsafe_code)]

//! Wire types (`quoteline.v1`).
//!
//! Every frame on either stream is an [`Envelope`]. The control stream carries
//! request/response pairs correlated by `request_id`; the events stream only
//! carries `Envelope { msg: Event(..) }`.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
	#[prost(uint32, tag = "1")]
	pub version: u32,
	#[prost(string, tag = "2")]
	pub request_id: String,
	#[prost(
		oneof = "envelope::Msg",
		tags = "10, 11, 12, 13, 14, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 50"
	)]
	pub msg: Option<envelope::Msg>,
}

pub mod envelope {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Msg {
		#[prost(message, tag = "10")]
		Hello(super::Hello),
		#[prost(message, tag = "11")]
		Welcome(super::Welcome),
		#[prost(message, tag = "12")]
		Error(super::Error),
		#[prost(message, tag = "13")]
		Ping(super::Ping),
		#[prost(message, tag = "14")]
		Pong(super::Pong),

		#[prost(message, tag = "20")]
		Join(super::Join),
		#[prost(message, tag = "21")]
		Joined(super::Joined),
		#[prost(message, tag = "22")]
		Leave(super::Leave),
		#[prost(message, tag = "23")]
		Left(super::Left),

		#[prost(message, tag = "24")]
		SendMessage(super::SendMessage),
		#[prost(message, tag = "25")]
		MessageAck(super::MessageAck),
		#[prost(message, tag = "26")]
		Typing(super::Typing),
		#[prost(message, tag = "27")]
		MarkRead(super::MarkRead),
		#[prost(message, tag = "28")]
		Unread(super::UnreadCounter),
		#[prost(message, tag = "29")]
		FetchSnapshot(super::FetchSnapshot),
		#[prost(message, tag = "30")]
		Snapshot(super::Snapshot),

		#[prost(message, tag = "31")]
		ListNotifications(super::ListNotifications),
		#[prost(message, tag = "32")]
		NotificationList(super::NotificationList),
		#[prost(message, tag = "33")]
		MarkNotificationsSeen(super::MarkNotificationsSeen),
		#[prost(message, tag = "34")]
		DeleteSeenNotifications(super::DeleteSeenNotifications),
		#[prost(message, tag = "35")]
		NotificationsChanged(super::NotificationsChanged),

		#[prost(message, tag = "36")]
		CreateOrder(super::CreateOrder),
		#[prost(message, tag = "37")]
		GetOrder(super::GetOrder),
		#[prost(message, tag = "38")]
		TransitionOrder(super::TransitionOrder),
		#[prost(message, tag = "39")]
		OrderResult(super::OrderResult),

		#[prost(message, tag = "50")]
		Event(super::EventEnvelope),
	}
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hello {
	#[prost(string, tag = "1")]
	pub client_name: String,
	#[prost(string, tag = "2")]
	pub client_instance_id: String,
	/// `v1.<claims>.<signature>`; empty only when the server allows anonymous dev access.
	#[prost(string, tag = "3")]
	pub auth_token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Welcome {
	#[prost(string, tag = "1")]
	pub server_name: String,
	#[prost(string, tag = "2")]
	pub server_instance_id: String,
	#[prost(int64, tag = "3")]
	pub server_time_unix_ms: i64,
	#[prost(uint32, tag = "4")]
	pub max_frame_bytes: u32,
	#[prost(uint64, tag = "5")]
	pub session_id: u64,
	#[prost(string, tag = "6")]
	pub user_id: String,
	#[prost(enumeration = "Role", tag = "7")]
	pub role: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
	#[prost(string, tag = "1")]
	pub code: String,
	#[prost(string, tag = "2")]
	pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ping {
	#[prost(int64, tag = "1")]
	pub client_time_unix_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Pong {
	#[prost(int64, tag = "1")]
	pub client_time_unix_ms: i64,
	#[prost(int64, tag = "2")]
	pub server_time_unix_ms: i64,
}

/// Room keys: `customer:{id}`, `staff`, `order:{id}`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Join {
	#[prost(string, tag = "1")]
	pub room: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Joined {
	#[prost(string, tag = "1")]
	pub room: String,
	/// False when the session was already a member.
	#[prost(bool, tag = "2")]
	pub newly_joined: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Leave {
	#[prost(string, tag = "1")]
	pub room: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Left {
	#[prost(string, tag = "1")]
	pub room: String,
	#[prost(bool, tag = "2")]
	pub was_member: bool,
}

/// Channel scope as its storage key: `order:{id}` or `global`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendMessage {
	#[prost(string, tag = "1")]
	pub scope: String,
	#[prost(string, tag = "2")]
	pub customer_id: String,
	#[prost(enumeration = "Sender", tag = "3")]
	pub sender: i32,
	#[prost(string, tag = "4")]
	pub text: String,
	/// Client clock; `0` lets the server stamp it.
	#[prost(int64, tag = "5")]
	pub sent_at_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageAck {
	#[prost(message, optional, tag = "1")]
	pub message: Option<ChatMessage>,
	/// Same natural key was already stored; nothing was counted or broadcast.
	#[prost(bool, tag = "2")]
	pub duplicate: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatMessage {
	#[prost(string, tag = "1")]
	pub id: String,
	#[prost(string, tag = "2")]
	pub scope: String,
	#[prost(string, tag = "3")]
	pub customer_id: String,
	#[prost(enumeration = "Sender", tag = "4")]
	pub sender: i32,
	#[prost(string, tag = "5")]
	pub text: String,
	#[prost(int64, tag = "6")]
	pub sent_at_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Typing {
	#[prost(string, tag = "1")]
	pub customer_id: String,
	#[prost(string, optional, tag = "2")]
	pub order_id: Option<String>,
	#[prost(enumeration = "Role", tag = "3")]
	pub role: i32,
	#[prost(bool, tag = "4")]
	pub typing: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarkRead {
	#[prost(string, tag = "1")]
	pub customer_id: String,
	#[prost(string, tag = "2")]
	pub scope: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnreadCounter {
	#[prost(string, tag = "1")]
	pub customer_id: String,
	#[prost(string, tag = "2")]
	pub scope: String,
	#[prost(uint64, tag = "3")]
	pub to_staff: u64,
	#[prost(uint64, tag = "4")]
	pub to_customer: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchSnapshot {
	#[prost(string, tag = "1")]
	pub customer_id: String,
	#[prost(string, tag = "2")]
	pub scope: String,
	/// Only messages with `sent_at_ms >= since_ms`.
	#[prost(int64, tag = "3")]
	pub since_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Snapshot {
	#[prost(message, repeated, tag = "1")]
	pub messages: Vec<ChatMessage>,
	#[prost(message, optional, tag = "2")]
	pub unread: Option<UnreadCounter>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Notification {
	#[prost(string, tag = "1")]
	pub id: String,
	#[prost(string, tag = "2")]
	pub user_id: String,
	#[prost(string, tag = "3")]
	pub title: String,
	#[prost(string, tag = "4")]
	pub text: String,
	#[prost(string, tag = "5")]
	pub kind: String,
	#[prost(string, optional, tag = "6")]
	pub related_id: Option<String>,
	#[prost(bool, tag = "7")]
	pub seen: bool,
	#[prost(int64, tag = "8")]
	pub created_at_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListNotifications {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NotificationList {
	#[prost(message, repeated, tag = "1")]
	pub notifications: Vec<Notification>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarkNotificationsSeen {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteSeenNotifications {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NotificationsChanged {
	#[prost(uint64, tag = "1")]
	pub affected: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateOrder {
	#[prost(string, tag = "1")]
	pub customer_id: String,
	#[prost(string, tag = "2")]
	pub description: String,
	/// Empty uses the server's configured default steps.
	#[prost(string, repeated, tag = "3")]
	pub tracking_steps: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetOrder {
	#[prost(string, tag = "1")]
	pub order_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransitionOrder {
	#[prost(string, tag = "1")]
	pub order_id: String,
	#[prost(oneof = "transition_order::Action", tags = "10, 11, 12, 13, 14, 15, 16, 17, 18, 19")]
	pub action: Option<transition_order::Action>,
}

pub mod transition_order {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Action {
		#[prost(message, tag = "10")]
		SendQuote(super::SendQuote),
		#[prost(message, tag = "11")]
		ApproveQuote(super::Empty),
		#[prost(message, tag = "12")]
		Reject(super::Reject),
		#[prost(message, tag = "13")]
		RequestPayment(super::RequestPayment),
		#[prost(message, tag = "14")]
		SubmitAdvance(super::SubmitPayment),
		#[prost(message, tag = "15")]
		ConfirmAdvance(super::Empty),
		#[prost(message, tag = "16")]
		RequestFinalPayment(super::RequestFinalPayment),
		#[prost(message, tag = "17")]
		SubmitFinal(super::SubmitPayment),
		#[prost(message, tag = "18")]
		ConfirmFinal(super::Empty),
		#[prost(message, tag = "19")]
		SetTrackingStep(super::SetTrackingStep),
	}
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendQuote {
	#[prost(uint64, tag = "1")]
	pub estimated_rate: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reject {
	#[prost(string, optional, tag = "1")]
	pub reason: Option<String>,
}

/// Exactly one of `percent` / `amount`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestPayment {
	#[prost(uint32, optional, tag = "1")]
	pub percent: Option<u32>,
	#[prost(uint64, optional, tag = "2")]
	pub amount: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitPayment {
	#[prost(string, tag = "1")]
	pub method: String,
	#[prost(string, tag = "2")]
	pub transaction_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestFinalPayment {
	#[prost(uint64, tag = "1")]
	pub final_amount: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetTrackingStep {
	#[prost(uint32, tag = "1")]
	pub step: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PaymentRecord {
	#[prost(uint64, tag = "1")]
	pub amount: u64,
	#[prost(string, tag = "2")]
	pub method: String,
	#[prost(string, tag = "3")]
	pub external_transaction_id: String,
	#[prost(int64, tag = "4")]
	pub submitted_at_ms: i64,
	#[prost(bool, tag = "5")]
	pub verified: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TrackingEntry {
	#[prost(uint32, tag = "1")]
	pub step_index: u32,
	#[prost(string, tag = "2")]
	pub step_name: String,
	#[prost(int64, tag = "3")]
	pub changed_at_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Order {
	#[prost(string, tag = "1")]
	pub id: String,
	#[prost(string, tag = "2")]
	pub customer_id: String,
	#[prost(string, tag = "3")]
	pub description: String,
	/// Snake-case status name, e.g. `quote_sent`.
	#[prost(string, tag = "4")]
	pub status: String,
	#[prost(uint64, optional, tag = "5")]
	pub estimated_rate: Option<u64>,
	#[prost(uint64, optional, tag = "6")]
	pub requested_amount: Option<u64>,
	#[prost(uint32, optional, tag = "7")]
	pub requested_percentage: Option<u32>,
	#[prost(uint64, optional, tag = "8")]
	pub final_amount: Option<u64>,
	#[prost(uint32, tag = "9")]
	pub tracking_step: u32,
	#[prost(string, repeated, tag = "10")]
	pub tracking_steps: Vec<String>,
	#[prost(message, repeated, tag = "11")]
	pub tracking_history: Vec<TrackingEntry>,
	#[prost(message, optional, tag = "12")]
	pub advance_payment: Option<PaymentRecord>,
	#[prost(message, optional, tag = "13")]
	pub final_payment: Option<PaymentRecord>,
	#[prost(string, optional, tag = "14")]
	pub rejection_reason: Option<String>,
	#[prost(int64, tag = "15")]
	pub created_at_ms: i64,
	#[prost(int64, tag = "16")]
	pub updated_at_ms: i64,
	/// Derived; present once a final amount is set.
	#[prost(uint64, optional, tag = "17")]
	pub remaining_balance: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderChange {
	#[prost(string, tag = "1")]
	pub order_id: String,
	#[prost(string, tag = "2")]
	pub action: String,
	#[prost(string, tag = "3")]
	pub old_status: String,
	#[prost(string, tag = "4")]
	pub new_status: String,
	#[prost(string, optional, tag = "5")]
	pub message: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderResult {
	#[prost(message, optional, tag = "1")]
	pub order: Option<Order>,
	/// Absent for reads and creation.
	#[prost(message, optional, tag = "2")]
	pub change: Option<OrderChange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderUpdated {
	#[prost(message, optional, tag = "1")]
	pub order: Option<Order>,
	#[prost(message, optional, tag = "2")]
	pub change: Option<OrderChange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventEnvelope {
	/// Room the event was broadcast to.
	#[prost(string, tag = "1")]
	pub room: String,
	#[prost(int64, tag = "2")]
	pub server_time_unix_ms: i64,
	#[prost(oneof = "event_envelope::Event", tags = "10, 11, 12, 13, 14")]
	pub event: Option<event_envelope::Event>,
}

pub mod event_envelope {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Event {
		#[prost(message, tag = "10")]
		Chat(super::ChatMessage),
		#[prost(message, tag = "11")]
		Typing(super::Typing),
		#[prost(message, tag = "12")]
		OrderUpdated(super::OrderUpdated),
		#[prost(message, tag = "13")]
		Unread(super::UnreadCounter),
		#[prost(message, tag = "14")]
		Notification(super::Notification),
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Sender {
	Unspecified = 0,
	Customer = 1,
	Staff = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Role {
	Unspecified = 0,
	Customer = 1,
	Staff = 2,
}
