#![forbid(unsafe_code)]

use quoteline_domain::{Identity, Role, UserId};
use quoteline_util::unix_ms_now;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
	#[error("missing auth token")]
	Missing,

	#[error("invalid token format")]
	Format,

	#[error("invalid token signature")]
	Signature,

	#[error("token expired")]
	Expired,

	#[error("invalid token claims: {0}")]
	Claims(String),

	#[error("anonymous sessions are disabled")]
	AnonymousDisabled,
}

/// Turns a Hello auth token into a verified identity.
pub trait IdentityVerifier: Send + Sync {
	fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
	pub sub: String,
	pub role: Role,
	#[serde(default)]
	pub permissions: Vec<String>,
	/// Unix seconds.
	pub exp: u64,
}

/// `v1.<b64url claims>.<b64url hmac-sha256(claims_b64)>` tokens.
///
/// With `allow_anonymous`, a token of the form `role:id` is accepted as-is;
/// intended for local development only.
#[derive(Clone)]
pub struct HmacVerifier {
	secret: Option<Vec<u8>>,
	allow_anonymous: bool,
}

impl HmacVerifier {
	pub fn new(secret: Option<&str>, allow_anonymous: bool) -> Self {
		Self {
			secret: secret.filter(|s| !s.is_empty()).map(|s| s.as_bytes().to_vec()),
			allow_anonymous,
		}
	}

	fn verify_signed(&self, token: &str, secret: &[u8]) -> Result<Identity, AuthError> {
		let mut parts = token.split('.');
		let (Some("v1"), Some(payload_b64), Some(sig_b64), None) = (parts.next(), parts.next(), parts.next(), parts.next())
		else {
			return Err(AuthError::Format);
		};

		let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| AuthError::Format)?;
		let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| AuthError::Format)?;
		let expected_sig = sign(payload_b64.as_bytes(), secret).ok_or(AuthError::Signature)?;

		if !constant_time_eq(&expected_sig, &provided_sig) {
			return Err(AuthError::Signature);
		}

		let claims: AuthClaims = serde_json::from_slice(&payload).map_err(|e| AuthError::Claims(e.to_string()))?;
		let now = (unix_ms_now() / 1000).max(0) as u64;
		if claims.exp <= now {
			return Err(AuthError::Expired);
		}

		let id = UserId::new(claims.sub).map_err(|e| AuthError::Claims(e.to_string()))?;
		Ok(Identity {
			id,
			role: claims.role,
			permissions: claims.permissions,
		})
	}
}

impl IdentityVerifier for HmacVerifier {
	fn verify(&self, token: &str) -> Result<Identity, AuthError> {
		let token = token.trim();
		if token.is_empty() {
			return Err(AuthError::Missing);
		}

		if token.starts_with("v1.")
			&& let Some(secret) = &self.secret
		{
			return self.verify_signed(token, secret);
		}

		if !self.allow_anonymous {
			return Err(match self.secret {
				Some(_) => AuthError::Format,
				None => AuthError::AnonymousDisabled,
			});
		}

		let (role, id) = token.split_once(':').ok_or(AuthError::Format)?;
		let role: Role = role.parse().map_err(|e: quoteline_domain::ParseIdError| AuthError::Claims(e.to_string()))?;
		let id = UserId::new(id).map_err(|e| AuthError::Claims(e.to_string()))?;
		Ok(Identity::new(id, role))
	}
}

/// Mint a token accepted by [`HmacVerifier`].
pub fn issue_hmac_token(claims: &AuthClaims, secret: &str) -> anyhow::Result<String> {
	let payload = serde_json::to_vec(claims)?;
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
	let sig = sign(payload_b64.as_bytes(), secret.as_bytes()).ok_or_else(|| anyhow::anyhow!("invalid hmac key"))?;
	Ok(format!("v1.{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig)))
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Option<Vec<u8>> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).ok()?;
	mac.update(payload_b64);
	Some(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

#[cfg(test)]
mod tests {
	use super::*;

	fn claims(exp: u64) -> AuthClaims {
		AuthClaims {
			sub: "c-1".into(),
			role: Role::Customer,
			permissions: vec!["orders".into()],
			exp,
		}
	}

	fn far_future() -> u64 {
		(unix_ms_now() / 1000) as u64 + 3600
	}

	#[test]
	fn signed_token_round_trips_to_identity() {
		let token = issue_hmac_token(&claims(far_future()), "s3cret").unwrap();
		let id = HmacVerifier::new(Some("s3cret"), false).verify(&token).unwrap();
		assert_eq!(id.id.as_str(), "c-1");
		assert_eq!(id.role, Role::Customer);
		assert_eq!(id.permissions, vec!["orders".to_string()]);
	}

	#[test]
	fn wrong_secret_and_tampering_are_rejected() {
		let token = issue_hmac_token(&claims(far_future()), "s3cret").unwrap();
		assert!(matches!(
			HmacVerifier::new(Some("other"), false).verify(&token),
			Err(AuthError::Signature)
		));

		let mut parts: Vec<&str> = token.split('.').collect();
		let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"s-1","role":"staff","exp":99999999999}"#);
		parts[1] = &forged;
		assert!(HmacVerifier::new(Some("s3cret"), false).verify(&parts.join(".")).is_err());
	}

	#[test]
	fn expired_token_is_rejected() {
		let token = issue_hmac_token(&claims(1), "s3cret").unwrap();
		assert!(matches!(
			HmacVerifier::new(Some("s3cret"), false).verify(&token),
			Err(AuthError::Expired)
		));
	}

	#[test]
	fn anonymous_tokens_need_opt_in() {
		let strict = HmacVerifier::new(None, false);
		assert!(matches!(strict.verify("staff:s-1"), Err(AuthError::AnonymousDisabled)));

		let dev = HmacVerifier::new(None, true);
		let id = dev.verify("staff:s-1").unwrap();
		assert_eq!(id.role, Role::Staff);
		assert!(dev.verify("").is_err());
		assert!(dev.verify("wizard:x").is_err());
	}
}
