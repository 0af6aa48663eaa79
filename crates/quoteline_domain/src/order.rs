#![forbid(unsafe_code)]

//! Order ("quote") model and its status state machine.
//!
//! Every status change goes through [`apply_transition`], which consults the
//! static [`TRANSITIONS`] table. The input order is never mutated; callers
//! persist the returned copy.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CustomerId, OrderId, ParseIdError, Role};

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	Pending,
	QuoteSent,
	ApprovedQuote,
	PaymentRequested,
	AdvancePaid,
	FinalPaymentRequested,
	FinalPaymentSubmitted,
	Paid,
	Rejected,
}

impl OrderStatus {
	pub const ALL: [OrderStatus; 9] = [
		OrderStatus::Pending,
		OrderStatus::QuoteSent,
		OrderStatus::ApprovedQuote,
		OrderStatus::PaymentRequested,
		OrderStatus::AdvancePaid,
		OrderStatus::FinalPaymentRequested,
		OrderStatus::FinalPaymentSubmitted,
		OrderStatus::Paid,
		OrderStatus::Rejected,
	];

	pub const fn as_str(self) -> &'static str {
		match self {
			OrderStatus::Pending => "pending",
			OrderStatus::QuoteSent => "quote_sent",
			OrderStatus::ApprovedQuote => "approved_quote",
			OrderStatus::PaymentRequested => "payment_requested",
			OrderStatus::AdvancePaid => "advance_paid",
			OrderStatus::FinalPaymentRequested => "final_payment_requested",
			OrderStatus::FinalPaymentSubmitted => "final_payment_submitted",
			OrderStatus::Paid => "paid",
			OrderStatus::Rejected => "rejected",
		}
	}

	pub const fn is_terminal(self) -> bool {
		matches!(self, OrderStatus::Paid | OrderStatus::Rejected)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		OrderStatus::ALL
			.into_iter()
			.find(|st| st.as_str() == s)
			.ok_or_else(|| ParseIdError::InvalidFormat(format!("unknown order status: {s}")))
	}
}

/// A submitted payment awaiting (or past) staff verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
	pub amount: u64,
	pub method: String,
	pub external_transaction_id: String,
	pub submitted_at_ms: i64,
	pub verified: bool,
}

/// One visited tracking step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
	pub step_index: u32,
	pub step_name: String,
	pub changed_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	pub id: OrderId,
	pub customer_id: CustomerId,
	pub description: String,
	pub status: OrderStatus,
	pub estimated_rate: Option<u64>,
	pub requested_amount: Option<u64>,
	pub requested_percentage: Option<u8>,
	pub final_amount: Option<u64>,
	pub tracking_step: u32,
	pub tracking_steps: Vec<String>,
	pub tracking_history: Vec<TrackingEntry>,
	pub advance_payment: Option<PaymentRecord>,
	pub final_payment: Option<PaymentRecord>,
	pub rejection_reason: Option<String>,
	pub created_at_ms: i64,
	pub updated_at_ms: i64,
}

impl Order {
	/// New `Pending` order positioned on its first tracking step.
	pub fn new(
		id: OrderId,
		customer_id: CustomerId,
		description: impl Into<String>,
		tracking_steps: Vec<String>,
		now_ms: i64,
	) -> Result<Self, TransitionError> {
		let tracking_steps: Vec<String> = tracking_steps
			.into_iter()
			.map(|s| s.trim().to_string())
			.filter(|s| !s.is_empty())
			.collect();

		let Some(first) = tracking_steps.first().cloned() else {
			return Err(TransitionError::Validation("tracking_steps must not be empty".into()));
		};

		Ok(Self {
			id,
			customer_id,
			description: description.into(),
			status: OrderStatus::Pending,
			estimated_rate: None,
			requested_amount: None,
			requested_percentage: None,
			final_amount: None,
			tracking_step: 0,
			tracking_steps,
			tracking_history: vec![TrackingEntry {
				step_index: 0,
				step_name: first,
				changed_at_ms: now_ms,
			}],
			advance_payment: None,
			final_payment: None,
			rejection_reason: None,
			created_at_ms: now_ms,
			updated_at_ms: now_ms,
		})
	}

	pub fn current_step_name(&self) -> Option<&str> {
		self.tracking_steps.get(self.tracking_step as usize).map(String::as_str)
	}

	/// Sum of all verified payment amounts.
	pub fn verified_total(&self) -> u64 {
		[self.advance_payment.as_ref(), self.final_payment.as_ref()]
			.into_iter()
			.flatten()
			.filter(|p| p.verified)
			.fold(0u64, |acc, p| acc.saturating_add(p.amount))
	}

	/// `final_amount - Σ verified payments`, once a final amount exists.
	pub fn remaining_balance(&self) -> Option<u64> {
		self.final_amount.map(|total| total.saturating_sub(self.verified_total()))
	}
}

/// How a staff member asks for the advance payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRequest {
	/// Percentage of the estimated rate, 1..=100.
	Percent(u8),
	/// Absolute amount, at most the estimated rate.
	Amount(u64),
}

/// Inbound state-machine action with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum OrderAction {
	SendQuote { estimated_rate: u64 },
	ApproveQuote,
	Reject { reason: Option<String> },
	RequestPayment { request: PaymentRequest },
	SubmitAdvance { method: String, transaction_id: String },
	ConfirmAdvance,
	RequestFinalPayment { final_amount: u64 },
	SubmitFinal { method: String, transaction_id: String },
	ConfirmFinal,
	SetTrackingStep { step: u32 },
}

impl OrderAction {
	pub fn kind(&self) -> ActionKind {
		match self {
			OrderAction::SendQuote { .. } => ActionKind::SendQuote,
			OrderAction::ApproveQuote => ActionKind::ApproveQuote,
			OrderAction::Reject { .. } => ActionKind::Reject,
			OrderAction::RequestPayment { .. } => ActionKind::RequestPayment,
			OrderAction::SubmitAdvance { .. } => ActionKind::SubmitAdvance,
			OrderAction::ConfirmAdvance => ActionKind::ConfirmAdvance,
			OrderAction::RequestFinalPayment { .. } => ActionKind::RequestFinalPayment,
			OrderAction::SubmitFinal { .. } => ActionKind::SubmitFinal,
			OrderAction::ConfirmFinal => ActionKind::ConfirmFinal,
			OrderAction::SetTrackingStep { .. } => ActionKind::SetTrackingStep,
		}
	}
}

/// Payload-free action discriminator; the key of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
	SendQuote,
	ApproveQuote,
	Reject,
	RequestPayment,
	SubmitAdvance,
	ConfirmAdvance,
	RequestFinalPayment,
	SubmitFinal,
	ConfirmFinal,
	SetTrackingStep,
}

impl ActionKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			ActionKind::SendQuote => "send_quote",
			ActionKind::ApproveQuote => "approve_quote",
			ActionKind::Reject => "reject",
			ActionKind::RequestPayment => "request_payment",
			ActionKind::SubmitAdvance => "submit_advance",
			ActionKind::ConfirmAdvance => "confirm_advance",
			ActionKind::RequestFinalPayment => "request_final_payment",
			ActionKind::SubmitFinal => "submit_final",
			ActionKind::ConfirmFinal => "confirm_final",
			ActionKind::SetTrackingStep => "set_tracking_step",
		}
	}

	/// The table row for this action.
	pub const fn rule(self) -> &'static TransitionRule {
		match self {
			ActionKind::SendQuote => &SEND_QUOTE,
			ActionKind::ApproveQuote => &APPROVE_QUOTE,
			ActionKind::Reject => &REJECT,
			ActionKind::RequestPayment => &REQUEST_PAYMENT,
			ActionKind::SubmitAdvance => &SUBMIT_ADVANCE,
			ActionKind::ConfirmAdvance => &CONFIRM_ADVANCE,
			ActionKind::RequestFinalPayment => &REQUEST_FINAL_PAYMENT,
			ActionKind::SubmitFinal => &SUBMIT_FINAL,
			ActionKind::ConfirmFinal => &CONFIRM_FINAL,
			ActionKind::SetTrackingStep => &SET_TRACKING_STEP,
		}
	}
}

impl fmt::Display for ActionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Who may issue an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
	Customer,
	Staff,
	Either,
}

impl Actor {
	pub const fn allows(self, role: Role) -> bool {
		matches!(
			(self, role),
			(Actor::Either, _) | (Actor::Customer, Role::Customer) | (Actor::Staff, Role::Staff)
		)
	}
}

/// Who gets a notification when the transition commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTarget {
	Customer,
	Staff,
	/// The party that did not perform the action.
	Counterparty,
}

/// `{from, action} -> {to, side effects}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
	pub action: ActionKind,
	pub actor: Actor,
	pub from: &'static [OrderStatus],
	/// `None` keeps the current status.
	pub to: Option<OrderStatus>,
	pub notify: NotifyTarget,
}

impl TransitionRule {
	pub fn allows_from(&self, status: OrderStatus) -> bool {
		self.from.contains(&status)
	}
}

const FULFILMENT: &[OrderStatus] = &[
	OrderStatus::ApprovedQuote,
	OrderStatus::PaymentRequested,
	OrderStatus::AdvancePaid,
	OrderStatus::FinalPaymentRequested,
	OrderStatus::FinalPaymentSubmitted,
	OrderStatus::Paid,
];

const SEND_QUOTE: TransitionRule = TransitionRule {
	action: ActionKind::SendQuote,
	actor: Actor::Staff,
	from: &[OrderStatus::Pending, OrderStatus::QuoteSent],
	to: Some(OrderStatus::QuoteSent),
	notify: NotifyTarget::Customer,
};

const APPROVE_QUOTE: TransitionRule = TransitionRule {
	action: ActionKind::ApproveQuote,
	actor: Actor::Customer,
	from: &[OrderStatus::QuoteSent],
	to: Some(OrderStatus::ApprovedQuote),
	notify: NotifyTarget::Staff,
};

const REJECT: TransitionRule = TransitionRule {
	action: ActionKind::Reject,
	actor: Actor::Either,
	from: &[OrderStatus::Pending, OrderStatus::QuoteSent],
	to: Some(OrderStatus::Rejected),
	notify: NotifyTarget::Counterparty,
};

const REQUEST_PAYMENT: TransitionRule = TransitionRule {
	action: ActionKind::RequestPayment,
	actor: Actor::Staff,
	from: &[OrderStatus::ApprovedQuote],
	to: Some(OrderStatus::PaymentRequested),
	notify: NotifyTarget::Customer,
};

const SUBMIT_ADVANCE: TransitionRule = TransitionRule {
	action: ActionKind::SubmitAdvance,
	actor: Actor::Customer,
	from: &[OrderStatus::PaymentRequested],
	to: None,
	notify: NotifyTarget::Staff,
};

const CONFIRM_ADVANCE: TransitionRule = TransitionRule {
	action: ActionKind::ConfirmAdvance,
	actor: Actor::Staff,
	from: &[OrderStatus::PaymentRequested],
	to: Some(OrderStatus::AdvancePaid),
	notify: NotifyTarget::Customer,
};

const REQUEST_FINAL_PAYMENT: TransitionRule = TransitionRule {
	action: ActionKind::RequestFinalPayment,
	actor: Actor::Staff,
	from: &[OrderStatus::AdvancePaid],
	to: Some(OrderStatus::FinalPaymentRequested),
	notify: NotifyTarget::Customer,
};

const SUBMIT_FINAL: TransitionRule = TransitionRule {
	action: ActionKind::SubmitFinal,
	actor: Actor::Customer,
	from: &[OrderStatus::FinalPaymentRequested],
	to: Some(OrderStatus::FinalPaymentSubmitted),
	notify: NotifyTarget::Staff,
};

const CONFIRM_FINAL: TransitionRule = TransitionRule {
	action: ActionKind::ConfirmFinal,
	actor: Actor::Staff,
	from: &[OrderStatus::FinalPaymentSubmitted],
	to: Some(OrderStatus::Paid),
	notify: NotifyTarget::Customer,
};

const SET_TRACKING_STEP: TransitionRule = TransitionRule {
	action: ActionKind::SetTrackingStep,
	actor: Actor::Staff,
	from: FULFILMENT,
	to: None,
	notify: NotifyTarget::Customer,
};

/// The complete transition table.
pub const TRANSITIONS: [TransitionRule; 10] = [
	SEND_QUOTE,
	APPROVE_QUOTE,
	REJECT,
	REQUEST_PAYMENT,
	SUBMIT_ADVANCE,
	CONFIRM_ADVANCE,
	REQUEST_FINAL_PAYMENT,
	SUBMIT_FINAL,
	CONFIRM_FINAL,
	SET_TRACKING_STEP,
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
	#[error("cannot {action} while order is {current}")]
	InvalidTransition { action: ActionKind, current: OrderStatus },

	#[error("{role} may not {action}")]
	Forbidden { action: ActionKind, role: Role },

	#[error("invalid input: {0}")]
	Validation(String),
}

/// Change descriptor carried by `order_updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderChange {
	pub order_id: OrderId,
	pub action: ActionKind,
	pub old_status: OrderStatus,
	pub new_status: OrderStatus,
	pub message: Option<String>,
}

/// Successful transition result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
	pub order: Order,
	pub change: OrderChange,
	/// Set only when `tracking_step` moved.
	pub history_entry: Option<TrackingEntry>,
	pub rule: &'static TransitionRule,
}

/// Validate `action` against `order` and return the updated copy.
pub fn apply_transition(
	order: &Order,
	action: &OrderAction,
	actor: Role,
	now_ms: i64,
) -> Result<Transition, TransitionError> {
	let kind = action.kind();
	let rule = kind.rule();

	if !rule.actor.allows(actor) {
		return Err(TransitionError::Forbidden { action: kind, role: actor });
	}

	if !rule.allows_from(order.status) {
		return Err(TransitionError::InvalidTransition {
			action: kind,
			current: order.status,
		});
	}

	let mut next = order.clone();
	let message = apply_payload(&mut next, action, now_ms)?;

	if let Some(to) = rule.to {
		next.status = to;
	}

	let history_entry = if next.tracking_step != order.tracking_step {
		let last_at = next.tracking_history.last().map(|e| e.changed_at_ms).unwrap_or(i64::MIN);
		let entry = TrackingEntry {
			step_index: next.tracking_step,
			step_name: next.current_step_name().unwrap_or_default().to_string(),
			changed_at_ms: now_ms.max(last_at),
		};
		next.tracking_history.push(entry.clone());
		Some(entry)
	} else {
		None
	};

	next.updated_at_ms = now_ms.max(order.updated_at_ms);

	Ok(Transition {
		change: OrderChange {
			order_id: next.id.clone(),
			action: kind,
			old_status: order.status,
			new_status: next.status,
			message,
		},
		order: next,
		history_entry,
		rule,
	})
}

fn apply_payload(order: &mut Order, action: &OrderAction, now_ms: i64) -> Result<Option<String>, TransitionError> {
	match action {
		OrderAction::SendQuote { estimated_rate } => {
			if *estimated_rate == 0 {
				return Err(TransitionError::Validation("estimated_rate must be positive".into()));
			}
			order.estimated_rate = Some(*estimated_rate);
			Ok(Some(format!("Quote sent: estimated rate {estimated_rate}")))
		}
		OrderAction::ApproveQuote => Ok(Some("Quote approved by customer".to_string())),
		OrderAction::Reject { reason } => {
			let reason = reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
			order.rejection_reason = reason.map(str::to_string);
			Ok(Some(match reason {
				Some(r) => format!("Order rejected: {r}"),
				None => "Order rejected".to_string(),
			}))
		}
		OrderAction::RequestPayment { request } => {
			let Some(rate) = order.estimated_rate else {
				return Err(TransitionError::Validation("order has no estimated rate".into()));
			};
			let (amount, percentage) = match *request {
				PaymentRequest::Percent(pct) => {
					if pct == 0 || pct > 100 {
						return Err(TransitionError::Validation("percentage must be within 1..=100".into()));
					}
					(rate.saturating_mul(pct as u64) / 100, Some(pct))
				}
				PaymentRequest::Amount(amount) => {
					if amount == 0 || amount > rate {
						return Err(TransitionError::Validation(format!(
							"requested amount must be within 1..={rate}"
						)));
					}
					(amount, None)
				}
			};
			order.requested_amount = Some(amount);
			order.requested_percentage = percentage;
			Ok(Some(format!("Advance payment requested: {amount}")))
		}
		OrderAction::SubmitAdvance { method, transaction_id } => {
			let Some(amount) = order.requested_amount else {
				return Err(TransitionError::Validation("no advance payment was requested".into()));
			};
			order.advance_payment = Some(payment_record(amount, method, transaction_id, now_ms)?);
			Ok(Some("Advance payment submitted, pending verification".to_string()))
		}
		OrderAction::ConfirmAdvance => {
			match order.advance_payment.as_mut() {
				Some(p) if !p.verified => p.verified = true,
				_ => return Err(TransitionError::Validation("no advance payment awaiting verification".into())),
			}
			Ok(Some("Advance payment confirmed".to_string()))
		}
		OrderAction::RequestFinalPayment { final_amount } => {
			let paid = order.verified_total();
			if *final_amount < paid {
				return Err(TransitionError::Validation(format!(
					"final amount {final_amount} is below verified payments {paid}"
				)));
			}
			order.final_amount = Some(*final_amount);
			Ok(Some(format!(
				"Final payment requested: {} remaining",
				final_amount.saturating_sub(paid)
			)))
		}
		OrderAction::SubmitFinal { method, transaction_id } => {
			let remaining = order.remaining_balance().unwrap_or(0);
			order.final_payment = Some(payment_record(remaining, method, transaction_id, now_ms)?);
			Ok(Some("Final payment submitted, pending verification".to_string()))
		}
		OrderAction::ConfirmFinal => {
			match order.final_payment.as_mut() {
				Some(p) if !p.verified => p.verified = true,
				_ => return Err(TransitionError::Validation("no final payment awaiting verification".into())),
			}
			Ok(Some("Final payment confirmed".to_string()))
		}
		OrderAction::SetTrackingStep { step } => {
			let len = order.tracking_steps.len() as u32;
			if *step >= len {
				return Err(TransitionError::Validation(format!("tracking step {step} out of range 0..{len}")));
			}
			if *step <= order.tracking_step {
				return Err(TransitionError::Validation(format!(
					"tracking step must advance past {}",
					order.tracking_step
				)));
			}
			order.tracking_step = *step;
			Ok(order.current_step_name().map(|name| format!("Order moved to \"{name}\"")))
		}
	}
}

fn payment_record(amount: u64, method: &str, transaction_id: &str, now_ms: i64) -> Result<PaymentRecord, TransitionError> {
	let method = method.trim();
	let transaction_id = transaction_id.trim();
	if method.is_empty() || transaction_id.is_empty() {
		return Err(TransitionError::Validation(
			"payment method and transaction id are required".into(),
		));
	}
	Ok(PaymentRecord {
		amount,
		method: method.to_string(),
		external_transaction_id: transaction_id.to_string(),
		submitted_at_ms: now_ms,
		verified: false,
	})
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use proptest::prelude::*;

	use super::*;

	fn steps() -> Vec<String> {
		["received", "sourcing", "in_transit", "delivered"]
			.into_iter()
			.map(str::to_string)
			.collect()
	}

	fn pending(now: i64) -> Order {
		Order::new(
			OrderId::new("o-1").unwrap(),
			CustomerId::new("c-1").unwrap(),
			"two pallets",
			steps(),
			now,
		)
		.unwrap()
	}

	fn step(order: &Order, action: OrderAction, actor: Role, now: i64) -> Order {
		apply_transition(order, &action, actor, now).unwrap().order
	}

	#[test]
	fn every_action_has_exactly_one_rule() {
		let kinds: HashSet<ActionKind> = TRANSITIONS.iter().map(|r| r.action).collect();
		assert_eq!(kinds.len(), TRANSITIONS.len());
		for rule in TRANSITIONS.iter() {
			assert_eq!(rule.action.rule().action, rule.action);
		}
	}

	#[test]
	fn reject_only_from_pre_payment_states() {
		for status in OrderStatus::ALL {
			let allowed = REJECT.allows_from(status);
			assert_eq!(
				allowed,
				matches!(status, OrderStatus::Pending | OrderStatus::QuoteSent),
				"{status}"
			);
		}
	}

	#[test]
	fn quote_lifecycle_scenario() {
		let o = pending(1_000);

		let quoted = apply_transition(&o, &OrderAction::SendQuote { estimated_rate: 500 }, Role::Staff, 2_000).unwrap();
		assert_eq!(quoted.order.status, OrderStatus::QuoteSent);
		assert_eq!(quoted.order.tracking_history, o.tracking_history);
		assert!(quoted.history_entry.is_none());
		assert_eq!(quoted.change.old_status, OrderStatus::Pending);
		assert_eq!(quoted.change.new_status, OrderStatus::QuoteSent);

		let approved = step(&quoted.order, OrderAction::ApproveQuote, Role::Customer, 3_000);
		assert_eq!(approved.status, OrderStatus::ApprovedQuote);

		let requested = step(
			&approved,
			OrderAction::RequestPayment {
				request: PaymentRequest::Percent(50),
			},
			Role::Staff,
			4_000,
		);
		assert_eq!(requested.requested_amount, Some(250));
		assert_eq!(requested.requested_percentage, Some(50));
		assert_eq!(requested.status, OrderStatus::PaymentRequested);

		let submitted = step(
			&requested,
			OrderAction::SubmitAdvance {
				method: "bank".into(),
				transaction_id: "tx-1".into(),
			},
			Role::Customer,
			5_000,
		);
		assert_eq!(submitted.status, OrderStatus::PaymentRequested);
		let advance = submitted.advance_payment.as_ref().unwrap();
		assert!(!advance.verified);
		assert_eq!(advance.amount, 250);

		let paid_advance = step(&submitted, OrderAction::ConfirmAdvance, Role::Staff, 6_000);
		assert_eq!(paid_advance.status, OrderStatus::AdvancePaid);
		assert_eq!(paid_advance.verified_total(), 250);

		let final_req = step(
			&paid_advance,
			OrderAction::RequestFinalPayment { final_amount: 520 },
			Role::Staff,
			7_000,
		);
		assert_eq!(final_req.remaining_balance(), Some(270));

		let final_sub = step(
			&final_req,
			OrderAction::SubmitFinal {
				method: "card".into(),
				transaction_id: "tx-2".into(),
			},
			Role::Customer,
			8_000,
		);
		assert_eq!(final_sub.status, OrderStatus::FinalPaymentSubmitted);
		assert_eq!(final_sub.remaining_balance(), Some(270));

		let done = step(&final_sub, OrderAction::ConfirmFinal, Role::Staff, 9_000);
		assert_eq!(done.status, OrderStatus::Paid);
		assert_eq!(done.remaining_balance(), Some(0));
	}

	#[test]
	fn failed_precondition_leaves_order_untouched() {
		let o = pending(1_000);
		let quoted = step(&o, OrderAction::SendQuote { estimated_rate: 500 }, Role::Staff, 2_000);
		let approved = step(&quoted, OrderAction::ApproveQuote, Role::Customer, 3_000);
		let before = approved.clone();

		let err = apply_transition(&approved, &OrderAction::SendQuote { estimated_rate: 900 }, Role::Staff, 4_000)
			.unwrap_err();
		assert_eq!(
			err,
			TransitionError::InvalidTransition {
				action: ActionKind::SendQuote,
				current: OrderStatus::ApprovedQuote,
			}
		);
		assert_eq!(approved, before);
	}

	#[test]
	fn wrong_actor_is_forbidden() {
		let o = pending(1_000);
		let err = apply_transition(&o, &OrderAction::SendQuote { estimated_rate: 10 }, Role::Customer, 2_000)
			.unwrap_err();
		assert!(matches!(err, TransitionError::Forbidden { .. }));
	}

	#[test]
	fn payload_validation_runs_after_status_check() {
		let o = pending(1_000);
		let err = apply_transition(&o, &OrderAction::SendQuote { estimated_rate: 0 }, Role::Staff, 2_000).unwrap_err();
		assert!(matches!(err, TransitionError::Validation(_)));

		let quoted = step(&o, OrderAction::SendQuote { estimated_rate: 100 }, Role::Staff, 2_000);
		let approved = step(&quoted, OrderAction::ApproveQuote, Role::Customer, 3_000);
		for request in [PaymentRequest::Percent(0), PaymentRequest::Percent(101), PaymentRequest::Amount(101)] {
			let err = apply_transition(&approved, &OrderAction::RequestPayment { request }, Role::Staff, 4_000)
				.unwrap_err();
			assert!(matches!(err, TransitionError::Validation(_)), "{request:?}");
		}
	}

	#[test]
	fn confirm_without_submission_is_rejected() {
		let o = pending(1_000);
		let quoted = step(&o, OrderAction::SendQuote { estimated_rate: 100 }, Role::Staff, 2_000);
		let approved = step(&quoted, OrderAction::ApproveQuote, Role::Customer, 3_000);
		let requested = step(
			&approved,
			OrderAction::RequestPayment {
				request: PaymentRequest::Amount(40),
			},
			Role::Staff,
			4_000,
		);
		let err = apply_transition(&requested, &OrderAction::ConfirmAdvance, Role::Staff, 5_000).unwrap_err();
		assert!(matches!(err, TransitionError::Validation(_)));
	}

	#[test]
	fn tracking_step_appends_history_once_per_move() {
		let o = pending(1_000);
		let quoted = step(&o, OrderAction::SendQuote { estimated_rate: 100 }, Role::Staff, 2_000);
		let approved = step(&quoted, OrderAction::ApproveQuote, Role::Customer, 3_000);

		let moved = apply_transition(&approved, &OrderAction::SetTrackingStep { step: 2 }, Role::Staff, 4_000).unwrap();
		let entry = moved.history_entry.clone().unwrap();
		assert_eq!(entry.step_index, 2);
		assert_eq!(entry.step_name, "in_transit");
		assert_eq!(moved.order.tracking_history.len(), 2);

		let err = apply_transition(&moved.order, &OrderAction::SetTrackingStep { step: 2 }, Role::Staff, 5_000)
			.unwrap_err();
		assert!(matches!(err, TransitionError::Validation(_)));

		let err = apply_transition(&moved.order, &OrderAction::SetTrackingStep { step: 9 }, Role::Staff, 5_000)
			.unwrap_err();
		assert!(matches!(err, TransitionError::Validation(_)));
	}

	#[test]
	fn tracking_history_never_goes_back_in_time() {
		let o = pending(10_000);
		let quoted = step(&o, OrderAction::SendQuote { estimated_rate: 100 }, Role::Staff, 10_000);
		let approved = step(&quoted, OrderAction::ApproveQuote, Role::Customer, 10_000);
		let moved = step(&approved, OrderAction::SetTrackingStep { step: 1 }, Role::Staff, 5_000);
		assert_eq!(moved.tracking_history.last().unwrap().changed_at_ms, 10_000);
	}

	fn arb_action() -> impl Strategy<Value = (OrderAction, Role)> {
		prop_oneof![
			(1u64..10_000).prop_map(|r| (OrderAction::SendQuote { estimated_rate: r }, Role::Staff)),
			Just((OrderAction::ApproveQuote, Role::Customer)),
			(1u8..=100).prop_map(|p| (
				OrderAction::RequestPayment {
					request: PaymentRequest::Percent(p)
				},
				Role::Staff
			)),
			Just((
				OrderAction::SubmitAdvance {
					method: "bank".into(),
					transaction_id: "tx".into()
				},
				Role::Customer
			)),
			Just((OrderAction::ConfirmAdvance, Role::Staff)),
			(0u64..20_000).prop_map(|a| (OrderAction::RequestFinalPayment { final_amount: a }, Role::Staff)),
			Just((
				OrderAction::SubmitFinal {
					method: "card".into(),
					transaction_id: "tx2".into()
				},
				Role::Customer
			)),
			Just((OrderAction::ConfirmFinal, Role::Staff)),
			(0u32..6).prop_map(|s| (OrderAction::SetTrackingStep { step: s }, Role::Staff)),
		]
	}

	proptest! {
		#[test]
		fn history_matches_distinct_visited_steps(
			actions in proptest::collection::vec((arb_action(), -50i64..200), 0..40)
		) {
			let mut order = pending(1_000);
			let mut now = 1_000i64;
			let mut visited: HashSet<u32> = HashSet::from([0]);

			for ((action, role), jitter) in actions {
				now += jitter;
				let before = order.clone();
				match apply_transition(&order, &action, role, now) {
					Ok(t) => {
						visited.insert(t.order.tracking_step);
						order = t.order;
					}
					Err(_) => {
						prop_assert_eq!(&order, &before);
					}
				}

				prop_assert!(order.tracking_history.windows(2).all(|w| w[0].changed_at_ms <= w[1].changed_at_ms));
				prop_assert_eq!(order.tracking_history.len(), visited.len());
				prop_assert!((order.tracking_step as usize) < order.tracking_steps.len());
			}
		}
	}
}
