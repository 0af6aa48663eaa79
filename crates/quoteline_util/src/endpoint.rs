#![forbid(unsafe_code)]

//! `quic://host:port` endpoint strings shared by the server `--bind` flag and
//! the client `--server` flag.

use core::fmt;
use core::str::FromStr;
use std::net::SocketAddr;

use thiserror::Error;

/// Port used when nothing else is configured.
pub const DEFAULT_PORT: u16 = 18420;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
	#[error("endpoint must be non-empty (expected quic://host:port)")]
	Empty,

	#[error("invalid endpoint (expected quic://host:port): {0}")]
	Scheme(String),

	#[error("invalid endpoint host: {0}")]
	Host(String),

	#[error("invalid endpoint port (expected 1..=65535): {0}")]
	Port(String),

	#[error("host must be an IP literal, got {0}")]
	NotIpLiteral(String),
}

/// Parsed `quic://host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuicEndpoint {
	pub host: String,
	pub port: u16,
}

impl QuicEndpoint {
	pub fn localhost() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: DEFAULT_PORT,
		}
	}

	/// `host:port`, IPv6 stays bracketed.
	pub fn hostport(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	/// Host without IPv6 brackets, suitable as a TLS server name.
	pub fn server_name(&self) -> &str {
		self.host
			.strip_prefix('[')
			.and_then(|h| h.strip_suffix(']'))
			.unwrap_or(&self.host)
	}

	pub fn socket_addr(&self) -> Result<SocketAddr, EndpointError> {
		self.hostport()
			.parse()
			.map_err(|_| EndpointError::NotIpLiteral(self.host.clone()))
	}

	pub fn parse(s: &str) -> Result<Self, EndpointError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(EndpointError::Empty);
		}

		let rest = s
			.strip_prefix("quic://")
			.filter(|r| !r.contains(['/', '?', '#']))
			.ok_or_else(|| EndpointError::Scheme(s.to_string()))?;

		let (host, port) = rest
			.rsplit_once(':')
			.ok_or_else(|| EndpointError::Port(s.to_string()))?;

		let host = host.trim();
		let bracketed = host.starts_with('[') && host.ends_with(']');
		if host.is_empty() || (host.contains(':') && !bracketed) {
			return Err(EndpointError::Host(s.to_string()));
		}

		let port = port
			.trim()
			.parse::<u16>()
			.ok()
			.filter(|p| *p != 0)
			.ok_or_else(|| EndpointError::Port(s.to_string()))?;

		Ok(Self {
			host: host.to_string(),
			port,
		})
	}
}

impl fmt::Display for QuicEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "quic://{}:{}", self.host, self.port)
	}
}

impl FromStr for QuicEndpoint {
	type Err = EndpointError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}
