#![forbid(unsafe_code)]

//! Conversions between domain types and their wire representation.

use quoteline_domain::{
	ChannelScope, ChatMessage, CustomerId, Notification, NotificationKind, Order, OrderAction, OrderChange, OrderId,
	ParseIdError, PaymentRecord, PaymentRequest, Role, Sender, ServerMessageId, TrackingEntry, UnreadCounts, UserId,
};
use thiserror::Error;

use crate::pb;

#[derive(Debug, Error)]
pub enum ConvertError {
	#[error("missing field: {0}")]
	Missing(&'static str),

	#[error("invalid {field}: {source}")]
	Invalid {
		field: &'static str,
		#[source]
		source: ParseIdError,
	},

	#[error("invalid {field}: {detail}")]
	Malformed { field: &'static str, detail: String },
}

fn invalid(field: &'static str) -> impl FnOnce(ParseIdError) -> ConvertError {
	move |source| ConvertError::Invalid { field, source }
}

pub fn parse_customer_id(s: &str) -> Result<CustomerId, ConvertError> {
	CustomerId::new(s).map_err(invalid("customer_id"))
}

pub fn parse_order_id(s: &str) -> Result<OrderId, ConvertError> {
	OrderId::new(s).map_err(invalid("order_id"))
}

pub fn parse_scope(s: &str) -> Result<ChannelScope, ConvertError> {
	ChannelScope::parse_storage_key(s).map_err(invalid("scope"))
}

impl From<Sender> for pb::Sender {
	fn from(s: Sender) -> Self {
		match s {
			Sender::Customer => pb::Sender::Customer,
			Sender::Staff => pb::Sender::Staff,
		}
	}
}

/// `Unspecified` maps to `None`.
pub fn sender_from_pb(raw: i32) -> Option<Sender> {
	match pb::Sender::try_from(raw).ok()? {
		pb::Sender::Customer => Some(Sender::Customer),
		pb::Sender::Staff => Some(Sender::Staff),
		pb::Sender::Unspecified => None,
	}
}

impl From<Role> for pb::Role {
	fn from(r: Role) -> Self {
		match r {
			Role::Customer => pb::Role::Customer,
			Role::Staff => pb::Role::Staff,
		}
	}
}

pub fn role_from_pb(raw: i32) -> Option<Role> {
	match pb::Role::try_from(raw).ok()? {
		pb::Role::Customer => Some(Role::Customer),
		pb::Role::Staff => Some(Role::Staff),
		pb::Role::Unspecified => None,
	}
}

impl From<&ChatMessage> for pb::ChatMessage {
	fn from(m: &ChatMessage) -> Self {
		pb::ChatMessage {
			id: m.id.to_string(),
			scope: m.scope.storage_key(),
			customer_id: m.customer_id.to_string(),
			sender: pb::Sender::from(m.sender) as i32,
			text: m.text.clone(),
			sent_at_ms: m.sent_at_ms,
		}
	}
}

impl TryFrom<pb::ChatMessage> for ChatMessage {
	type Error = ConvertError;

	fn try_from(m: pb::ChatMessage) -> Result<Self, Self::Error> {
		let id = uuid::Uuid::parse_str(&m.id).map_err(|e| ConvertError::Malformed {
			field: "id",
			detail: e.to_string(),
		})?;
		Ok(ChatMessage {
			id: ServerMessageId(id),
			scope: parse_scope(&m.scope)?,
			customer_id: parse_customer_id(&m.customer_id)?,
			sender: sender_from_pb(m.sender).ok_or(ConvertError::Missing("sender"))?,
			text: m.text,
			sent_at_ms: m.sent_at_ms,
		})
	}
}

pub fn unread_to_pb(customer_id: &CustomerId, scope: &ChannelScope, counts: UnreadCounts) -> pb::UnreadCounter {
	pb::UnreadCounter {
		customer_id: customer_id.to_string(),
		scope: scope.storage_key(),
		to_staff: counts.to_staff,
		to_customer: counts.to_customer,
	}
}

impl From<&Notification> for pb::Notification {
	fn from(n: &Notification) -> Self {
		pb::Notification {
			id: n.id.to_string(),
			user_id: n.user_id.to_string(),
			title: n.title.clone(),
			text: n.text.clone(),
			kind: n.kind.as_str().to_string(),
			related_id: n.related_id.clone(),
			seen: n.seen,
			created_at_ms: n.created_at_ms,
		}
	}
}

impl TryFrom<pb::Notification> for Notification {
	type Error = ConvertError;

	fn try_from(n: pb::Notification) -> Result<Self, Self::Error> {
		Ok(Notification {
			id: uuid::Uuid::parse_str(&n.id).map_err(|e| ConvertError::Malformed {
				field: "id",
				detail: e.to_string(),
			})?,
			user_id: UserId::new(n.user_id).map_err(invalid("user_id"))?,
			title: n.title,
			text: n.text,
			kind: n.kind.parse::<NotificationKind>().map_err(invalid("kind"))?,
			related_id: n.related_id,
			seen: n.seen,
			created_at_ms: n.created_at_ms,
		})
	}
}

fn payment_to_pb(p: &PaymentRecord) -> pb::PaymentRecord {
	pb::PaymentRecord {
		amount: p.amount,
		method: p.method.clone(),
		external_transaction_id: p.external_transaction_id.clone(),
		submitted_at_ms: p.submitted_at_ms,
		verified: p.verified,
	}
}

fn payment_from_pb(p: pb::PaymentRecord) -> PaymentRecord {
	PaymentRecord {
		amount: p.amount,
		method: p.method,
		external_transaction_id: p.external_transaction_id,
		submitted_at_ms: p.submitted_at_ms,
		verified: p.verified,
	}
}

impl From<&Order> for pb::Order {
	fn from(o: &Order) -> Self {
		pb::Order {
			id: o.id.to_string(),
			customer_id: o.customer_id.to_string(),
			description: o.description.clone(),
			status: o.status.as_str().to_string(),
			estimated_rate: o.estimated_rate,
			requested_amount: o.requested_amount,
			requested_percentage: o.requested_percentage.map(u32::from),
			final_amount: o.final_amount,
			tracking_step: o.tracking_step,
			tracking_steps: o.tracking_steps.clone(),
			tracking_history: o
				.tracking_history
				.iter()
				.map(|e| pb::TrackingEntry {
					step_index: e.step_index,
					step_name: e.step_name.clone(),
					changed_at_ms: e.changed_at_ms,
				})
				.collect(),
			advance_payment: o.advance_payment.as_ref().map(payment_to_pb),
			final_payment: o.final_payment.as_ref().map(payment_to_pb),
			rejection_reason: o.rejection_reason.clone(),
			created_at_ms: o.created_at_ms,
			updated_at_ms: o.updated_at_ms,
			remaining_balance: o.remaining_balance(),
		}
	}
}

impl TryFrom<pb::Order> for Order {
	type Error = ConvertError;

	fn try_from(o: pb::Order) -> Result<Self, Self::Error> {
		let requested_percentage = o
			.requested_percentage
			.map(u8::try_from)
			.transpose()
			.map_err(|e| ConvertError::Malformed {
				field: "requested_percentage",
				detail: e.to_string(),
			})?;

		Ok(Order {
			id: parse_order_id(&o.id)?,
			customer_id: parse_customer_id(&o.customer_id)?,
			description: o.description,
			status: o.status.parse().map_err(invalid("status"))?,
			estimated_rate: o.estimated_rate,
			requested_amount: o.requested_amount,
			requested_percentage,
			final_amount: o.final_amount,
			tracking_step: o.tracking_step,
			tracking_steps: o.tracking_steps,
			tracking_history: o
				.tracking_history
				.into_iter()
				.map(|e| TrackingEntry {
					step_index: e.step_index,
					step_name: e.step_name,
					changed_at_ms: e.changed_at_ms,
				})
				.collect(),
			advance_payment: o.advance_payment.map(payment_from_pb),
			final_payment: o.final_payment.map(payment_from_pb),
			rejection_reason: o.rejection_reason,
			created_at_ms: o.created_at_ms,
			updated_at_ms: o.updated_at_ms,
		})
	}
}

impl From<&OrderChange> for pb::OrderChange {
	fn from(c: &OrderChange) -> Self {
		pb::OrderChange {
			order_id: c.order_id.to_string(),
			action: c.action.as_str().to_string(),
			old_status: c.old_status.as_str().to_string(),
			new_status: c.new_status.as_str().to_string(),
			message: c.message.clone(),
		}
	}
}

impl From<OrderAction> for pb::transition_order::Action {
	fn from(a: OrderAction) -> Self {
		use pb::transition_order::Action;

		match a {
			OrderAction::SendQuote { estimated_rate } => Action::SendQuote(pb::SendQuote { estimated_rate }),
			OrderAction::ApproveQuote => Action::ApproveQuote(pb::Empty {}),
			OrderAction::Reject { reason } => Action::Reject(pb::Reject { reason }),
			OrderAction::RequestPayment { request } => Action::RequestPayment(match request {
				PaymentRequest::Percent(p) => pb::RequestPayment {
					percent: Some(u32::from(p)),
					amount: None,
				},
				PaymentRequest::Amount(a) => pb::RequestPayment {
					percent: None,
					amount: Some(a),
				},
			}),
			OrderAction::SubmitAdvance { method, transaction_id } => {
				Action::SubmitAdvance(pb::SubmitPayment { method, transaction_id })
			}
			OrderAction::ConfirmAdvance => Action::ConfirmAdvance(pb::Empty {}),
			OrderAction::RequestFinalPayment { final_amount } => {
				Action::RequestFinalPayment(pb::RequestFinalPayment { final_amount })
			}
			OrderAction::SubmitFinal { method, transaction_id } => {
				Action::SubmitFinal(pb::SubmitPayment { method, transaction_id })
			}
			OrderAction::ConfirmFinal => Action::ConfirmFinal(pb::Empty {}),
			OrderAction::SetTrackingStep { step } => Action::SetTrackingStep(pb::SetTrackingStep { step }),
		}
	}
}

impl TryFrom<pb::transition_order::Action> for OrderAction {
	type Error = ConvertError;

	fn try_from(a: pb::transition_order::Action) -> Result<Self, Self::Error> {
		use pb::transition_order::Action;

		Ok(match a {
			Action::SendQuote(q) => OrderAction::SendQuote {
				estimated_rate: q.estimated_rate,
			},
			Action::ApproveQuote(_) => OrderAction::ApproveQuote,
			Action::Reject(r) => OrderAction::Reject { reason: r.reason },
			Action::RequestPayment(r) => {
				let request = match (r.percent, r.amount) {
					(Some(p), None) => PaymentRequest::Percent(u8::try_from(p).map_err(|_| ConvertError::Malformed {
						field: "percent",
						detail: format!("{p} is out of range"),
					})?),
					(None, Some(a)) => PaymentRequest::Amount(a),
					_ => {
						return Err(ConvertError::Malformed {
							field: "request_payment",
							detail: "exactly one of percent or amount is required".to_string(),
						});
					}
				};
				OrderAction::RequestPayment { request }
			}
			Action::SubmitAdvance(p) => OrderAction::SubmitAdvance {
				method: p.method,
				transaction_id: p.transaction_id,
			},
			Action::ConfirmAdvance(_) => OrderAction::ConfirmAdvance,
			Action::RequestFinalPayment(r) => OrderAction::RequestFinalPayment {
				final_amount: r.final_amount,
			},
			Action::SubmitFinal(p) => OrderAction::SubmitFinal {
				method: p.method,
				transaction_id: p.transaction_id,
			},
			Action::ConfirmFinal(_) => OrderAction::ConfirmFinal,
			Action::SetTrackingStep(s) => OrderAction::SetTrackingStep { step: s.step },
		})
	}
}
