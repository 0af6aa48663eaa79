#![forbid(unsafe_code)]

use quoteline_domain::{ActionKind, OrderStatus, ParseIdError, TransitionError};
use quoteline_protocol::{ConvertError, pb};
use thiserror::Error;

/// Errors surfaced by hub operations. Each maps to a wire error code.
#[derive(Debug, Error)]
pub enum HubError {
	#[error("invalid request: {0}")]
	Validation(String),

	#[error("cannot {action} while order is {current}")]
	InvalidTransition { action: ActionKind, current: OrderStatus },

	#[error("not found: {0}")]
	NotFound(String),

	#[error("forbidden: {0}")]
	Forbidden(String),

	#[error("session closed")]
	SessionClosed,

	#[error("store error: {0:#}")]
	Store(#[from] anyhow::Error),
}

impl HubError {
	pub const fn code(&self) -> &'static str {
		match self {
			HubError::Validation(_) => "INVALID",
			HubError::InvalidTransition { .. } => "INVALID_TRANSITION",
			HubError::NotFound(_) => "NOT_FOUND",
			HubError::Forbidden(_) => "FORBIDDEN",
			HubError::SessionClosed | HubError::Store(_) => "INTERNAL",
		}
	}

	/// Store failures are not echoed to clients verbatim.
	pub fn to_pb(&self) -> pb::Error {
		let message = match self {
			HubError::Store(_) => "internal error".to_string(),
			other => other.to_string(),
		};
		pb::Error {
			code: self.code().to_string(),
			message,
		}
	}
}

impl From<TransitionError> for HubError {
	fn from(e: TransitionError) -> Self {
		match e {
			TransitionError::InvalidTransition { action, current } => HubError::InvalidTransition { action, current },
			forbidden @ TransitionError::Forbidden { .. } => HubError::Forbidden(forbidden.to_string()),
			TransitionError::Validation(msg) => HubError::Validation(msg),
		}
	}
}

impl From<ConvertError> for HubError {
	fn from(e: ConvertError) -> Self {
		HubError::Validation(e.to_string())
	}
}

impl From<ParseIdError> for HubError {
	fn from(e: ParseIdError) -> Self {
		HubError::Validation(e.to_string())
	}
}
