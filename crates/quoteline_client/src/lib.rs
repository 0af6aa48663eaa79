#![forbid(unsafe_code)]

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use quinn::{ClientConfig as QuinnClientConfig, Endpoint, TransportConfig, VarInt};
use quoteline_domain::{ChannelScope, CustomerId, OrderAction, OrderId, RoomKey, Sender};
use quoteline_protocol::framing::{DEFAULT_MAX_FRAME_SIZE, FrameDecoder, FramingError, encode_frame};
use quoteline_protocol::version::{ALPN, PROTOCOL_VERSION};
use quoteline_protocol::{envelope, pb};
use quoteline_util::QuicEndpoint;
use tracing::{debug, info, warn};

pub mod reconcile;

pub use reconcile::{Applied, LogEntry, MessageLog};

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Remote server host (DNS name or IP literal). Also used as TLS SNI.
	pub server_host: String,

	/// Remote server UDP port.
	pub server_port: u16,

	/// Resolved remote server address override.
	pub server_addr: Option<SocketAddr>,

	pub client_name: String,

	pub client_instance_id: String,

	/// Token presented in `Hello`.
	pub auth_token: String,

	/// DER certificate to trust. Without it, server certificates are not
	/// verified (local development only).
	pub trusted_cert_der: Option<Vec<u8>>,

	/// Maximum inbound/outbound frame size.
	pub max_frame_bytes: usize,

	/// Timeout for connect + handshake.
	pub connect_timeout: Duration,
}

impl ClientConfig {
	/// Create a config from `quic://host:port`.
	pub fn from_quic_endpoint(endpoint: &str) -> Result<Self, ClientCoreError> {
		let e = QuicEndpoint::parse(endpoint).map_err(|e| ClientCoreError::Protocol(e.to_string()))?;
		Ok(Self {
			server_addr: e.socket_addr().ok(),
			server_host: e.server_name().to_string(),
			server_port: e.port,
			..Self::default()
		})
	}
}

impl Default for ClientConfig {
	fn default() -> Self {
		let local = QuicEndpoint::localhost();
		Self {
			server_addr: local.socket_addr().ok(),
			server_host: "localhost".to_string(),
			server_port: local.port,
			client_name: format!("quoteline-client/{}", env!("CARGO_PKG_VERSION")),
			client_instance_id: "dev-instance".to_string(),
			auth_token: String::new(),
			trusted_cert_der: None,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			connect_timeout: Duration::from_secs(15),
		}
	}
}

/// Errors for client core operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientCoreError {
	#[error("failed to create QUIC endpoint: {0}")]
	Endpoint(String),

	#[error("failed to connect: {0}")]
	Connect(String),

	#[error(transparent)]
	Framing(#[from] FramingError),

	/// Unexpected message ordering or types.
	#[error("protocol error: {0}")]
	Protocol(String),

	/// The server answered with an `Error` envelope.
	#[error("server rejected request ({code}): {message}")]
	Server { code: String, message: String },

	#[error("io error: {0}")]
	Io(String),

	#[error("error: {0}")]
	Other(String),
}

impl ClientCoreError {
	/// Wire error code when the server rejected the request.
	pub fn server_code(&self) -> Option<&str> {
		match self {
			Self::Server { code, .. } => Some(code),
			_ => None,
		}
	}
}

impl From<anyhow::Error> for ClientCoreError {
	fn from(e: anyhow::Error) -> Self {
		ClientCoreError::Other(format!("{e:#}"))
	}
}

/// Control half of a session: request/response over the first stream.
pub struct SessionControl {
	conn: quinn::Connection,
	control_send: quinn::SendStream,
	control_recv: quinn::RecvStream,
	decoder: FrameDecoder,
	max_frame_bytes: usize,
	next_request_id: u64,
	events_opened: bool,
}

/// Events reader half of a session.
pub struct SessionEvents {
	events_recv: quinn::RecvStream,
	// Dropping the send half would finish the stream.
	_events_send_keepalive: quinn::SendStream,
	decoder: FrameDecoder,
}

impl SessionControl {
	/// Connect, send `Hello` and wait for `Welcome`.
	pub async fn connect(cfg: ClientConfig) -> Result<(Self, pb::Welcome), ClientCoreError> {
		let endpoint = make_client_endpoint().map_err(|e| ClientCoreError::Endpoint(format!("{e:#}")))?;
		let quinn_cfg =
			make_client_config(cfg.trusted_cert_der.as_deref()).map_err(|e| ClientCoreError::Endpoint(format!("{e:#}")))?;

		let connect_timeout = cfg.connect_timeout;
		let server_name = cfg.server_host.clone();

		let candidates: Vec<SocketAddr> = match cfg.server_addr {
			Some(addr) => vec![addr],
			None => {
				let hostport = format!("{}:{}", cfg.server_host, cfg.server_port);
				let addrs: Vec<SocketAddr> = hostport
					.to_socket_addrs()
					.map_err(|e| ClientCoreError::Connect(format!("failed to resolve {hostport}: {e}")))?
					.collect();
				if addrs.is_empty() {
					return Err(ClientCoreError::Connect(format!(
						"DNS resolution returned no addresses for {hostport}"
					)));
				}
				addrs
			}
		};

		let mut last_err: Option<String> = None;
		let mut conn: Option<quinn::Connection> = None;

		for server_addr in candidates {
			let connecting = endpoint
				.connect_with(quinn_cfg.clone(), server_addr, &server_name)
				.map_err(|e| ClientCoreError::Connect(format!("connect_with({server_addr}, sni={server_name}): {e}")))?;

			match tokio::time::timeout(connect_timeout, connecting).await {
				Ok(Ok(c)) => {
					conn = Some(c);
					break;
				}
				Ok(Err(e)) => {
					last_err = Some(format!("connect failed (addr={server_addr}, sni={server_name}): {e}"));
				}
				Err(_) => {
					last_err = Some(format!(
						"connect timeout after {connect_timeout:?} (addr={server_addr}, sni={server_name})"
					));
				}
			}
		}

		let conn = conn.ok_or_else(|| {
			ClientCoreError::Connect(last_err.unwrap_or_else(|| format!("connect failed (sni={server_name})")))
		})?;

		info!(remote = %conn.remote_address(), "connected");

		let (control_send, control_recv) = tokio::time::timeout(connect_timeout, conn.open_bi())
			.await
			.map_err(|_| ClientCoreError::Io(format!("timeout opening control stream after {connect_timeout:?}")))?
			.map_err(|e| ClientCoreError::Io(format!("open_bi(control) failed: {e}")))?;

		let mut control = Self {
			conn,
			control_send,
			control_recv,
			decoder: FrameDecoder::new(cfg.max_frame_bytes),
			max_frame_bytes: cfg.max_frame_bytes,
			next_request_id: 1,
			events_opened: false,
		};

		let hello = pb::Hello {
			client_name: cfg.client_name,
			client_instance_id: cfg.client_instance_id,
			auth_token: cfg.auth_token,
		};
		control
			.write(&envelope(String::new(), pb::envelope::Msg::Hello(hello)))
			.await
			.map_err(|e| ClientCoreError::Io(format!("send Hello failed: {e}")))?;

		let welcome_env = tokio::time::timeout(connect_timeout, control.read_envelope())
			.await
			.map_err(|_| ClientCoreError::Protocol(format!("timeout waiting for Welcome after {connect_timeout:?}")))??;

		let welcome = match welcome_env.msg {
			Some(pb::envelope::Msg::Welcome(w)) => w,
			Some(pb::envelope::Msg::Error(e)) => {
				return Err(ClientCoreError::Server {
					code: e.code,
					message: e.message,
				});
			}
			other => {
				return Err(ClientCoreError::Protocol(format!("expected Welcome, got {other:?}")));
			}
		};

		if welcome_env.version != PROTOCOL_VERSION {
			warn!(
				server_version = welcome_env.version,
				client_version = PROTOCOL_VERSION,
				"protocol version mismatch"
			);
		}

		debug!(
			server_name = %welcome.server_name,
			session_id = welcome.session_id,
			user_id = %welcome.user_id,
			"received Welcome"
		);

		control.max_frame_bytes = (welcome.max_frame_bytes as usize).min(cfg.max_frame_bytes);
		Ok((control, welcome))
	}

	/// Send one request and wait for its reply.
	///
	/// Replies carry the request id back; an `Error` reply becomes
	/// [`ClientCoreError::Server`].
	pub async fn request(&mut self, msg: pb::envelope::Msg) -> Result<pb::envelope::Msg, ClientCoreError> {
		let request_id = self.next_request_id.to_string();
		self.next_request_id += 1;

		self.write(&envelope(request_id.clone(), msg)).await?;

		let resp = self.read_envelope().await?;
		if resp.request_id != request_id {
			return Err(ClientCoreError::Protocol(format!(
				"reply for request {} while waiting for {request_id}",
				resp.request_id
			)));
		}

		match resp.msg {
			Some(pb::envelope::Msg::Error(e)) => Err(ClientCoreError::Server {
				code: e.code,
				message: e.message,
			}),
			Some(msg) => Ok(msg),
			None => Err(ClientCoreError::Protocol("empty reply".to_string())),
		}
	}

	pub async fn ping(&mut self, client_time_unix_ms: i64) -> Result<pb::Pong, ClientCoreError> {
		match self.request(pb::envelope::Msg::Ping(pb::Ping { client_time_unix_ms })).await? {
			pb::envelope::Msg::Pong(p) => Ok(p),
			other => Err(unexpected("Pong", &other)),
		}
	}

	/// Join a room. Returns false when already a member.
	pub async fn join(&mut self, room: &RoomKey) -> Result<bool, ClientCoreError> {
		match self.request(pb::envelope::Msg::Join(pb::Join { room: room.to_string() })).await? {
			pb::envelope::Msg::Joined(j) => Ok(j.newly_joined),
			other => Err(unexpected("Joined", &other)),
		}
	}

	pub async fn leave(&mut self, room: &RoomKey) -> Result<bool, ClientCoreError> {
		match self.request(pb::envelope::Msg::Leave(pb::Leave { room: room.to_string() })).await? {
			pb::envelope::Msg::Left(l) => Ok(l.was_member),
			other => Err(unexpected("Left", &other)),
		}
	}

	/// Submit a chat message. `sent_at_ms` is part of the message identity;
	/// resending with the same value is acknowledged as a duplicate.
	pub async fn send_message(
		&mut self,
		customer_id: &CustomerId,
		scope: &ChannelScope,
		sender: Sender,
		text: &str,
		sent_at_ms: i64,
	) -> Result<pb::MessageAck, ClientCoreError> {
		let req = pb::SendMessage {
			scope: scope.storage_key(),
			customer_id: customer_id.to_string(),
			sender: pb::Sender::from(sender) as i32,
			text: text.to_string(),
			sent_at_ms,
		};
		match self.request(pb::envelope::Msg::SendMessage(req)).await? {
			pb::envelope::Msg::MessageAck(ack) => Ok(ack),
			other => Err(unexpected("MessageAck", &other)),
		}
	}

	pub async fn typing(
		&mut self,
		customer_id: &CustomerId,
		order_id: Option<&OrderId>,
		typing: bool,
	) -> Result<(), ClientCoreError> {
		let req = pb::Typing {
			customer_id: customer_id.to_string(),
			order_id: order_id.map(ToString::to_string),
			role: 0,
			typing,
		};
		match self.request(pb::envelope::Msg::Typing(req)).await? {
			pb::envelope::Msg::Typing(_) => Ok(()),
			other => Err(unexpected("Typing", &other)),
		}
	}

	pub async fn mark_read(
		&mut self,
		customer_id: &CustomerId,
		scope: &ChannelScope,
	) -> Result<pb::UnreadCounter, ClientCoreError> {
		let req = pb::MarkRead {
			customer_id: customer_id.to_string(),
			scope: scope.storage_key(),
		};
		match self.request(pb::envelope::Msg::MarkRead(req)).await? {
			pb::envelope::Msg::Unread(u) => Ok(u),
			other => Err(unexpected("Unread", &other)),
		}
	}

	/// History since `since_ms` (0 for everything) plus current counters.
	pub async fn fetch_snapshot(
		&mut self,
		customer_id: &CustomerId,
		scope: &ChannelScope,
		since_ms: i64,
	) -> Result<pb::Snapshot, ClientCoreError> {
		let req = pb::FetchSnapshot {
			customer_id: customer_id.to_string(),
			scope: scope.storage_key(),
			since_ms,
		};
		match self.request(pb::envelope::Msg::FetchSnapshot(req)).await? {
			pb::envelope::Msg::Snapshot(s) => Ok(s),
			other => Err(unexpected("Snapshot", &other)),
		}
	}

	pub async fn list_notifications(&mut self) -> Result<Vec<pb::Notification>, ClientCoreError> {
		match self
			.request(pb::envelope::Msg::ListNotifications(pb::ListNotifications {}))
			.await?
		{
			pb::envelope::Msg::NotificationList(l) => Ok(l.notifications),
			other => Err(unexpected("NotificationList", &other)),
		}
	}

	pub async fn mark_notifications_seen(&mut self) -> Result<u64, ClientCoreError> {
		match self
			.request(pb::envelope::Msg::MarkNotificationsSeen(pb::MarkNotificationsSeen {}))
			.await?
		{
			pb::envelope::Msg::NotificationsChanged(c) => Ok(c.affected),
			other => Err(unexpected("NotificationsChanged", &other)),
		}
	}

	pub async fn delete_seen_notifications(&mut self) -> Result<u64, ClientCoreError> {
		match self
			.request(pb::envelope::Msg::DeleteSeenNotifications(pb::DeleteSeenNotifications {}))
			.await?
		{
			pb::envelope::Msg::NotificationsChanged(c) => Ok(c.affected),
			other => Err(unexpected("NotificationsChanged", &other)),
		}
	}

	/// Create an order. An empty `tracking_steps` uses the server default.
	pub async fn create_order(
		&mut self,
		customer_id: &CustomerId,
		description: &str,
		tracking_steps: Vec<String>,
	) -> Result<pb::Order, ClientCoreError> {
		let req = pb::CreateOrder {
			customer_id: customer_id.to_string(),
			description: description.to_string(),
			tracking_steps,
		};
		let result = self.order_request(pb::envelope::Msg::CreateOrder(req)).await?;
		result.order.ok_or_else(|| ClientCoreError::Protocol("OrderResult without order".to_string()))
	}

	pub async fn get_order(&mut self, order_id: &OrderId) -> Result<pb::Order, ClientCoreError> {
		let req = pb::GetOrder {
			order_id: order_id.to_string(),
		};
		let result = self.order_request(pb::envelope::Msg::GetOrder(req)).await?;
		result.order.ok_or_else(|| ClientCoreError::Protocol("OrderResult without order".to_string()))
	}

	pub async fn transition_order(
		&mut self,
		order_id: &OrderId,
		action: OrderAction,
	) -> Result<pb::OrderResult, ClientCoreError> {
		let req = pb::TransitionOrder {
			order_id: order_id.to_string(),
			action: Some(action.into()),
		};
		self.order_request(pb::envelope::Msg::TransitionOrder(req)).await
	}

	async fn order_request(&mut self, msg: pb::envelope::Msg) -> Result<pb::OrderResult, ClientCoreError> {
		match self.request(msg).await? {
			pb::envelope::Msg::OrderResult(r) => Ok(r),
			other => Err(unexpected("OrderResult", &other)),
		}
	}

	/// Open the events stream. Call once, after `connect`.
	pub async fn open_events_stream(&mut self) -> Result<SessionEvents, ClientCoreError> {
		if self.events_opened {
			return Err(ClientCoreError::Protocol(
				"events stream already opened; reuse the existing SessionEvents".to_string(),
			));
		}

		let (mut send, recv) = self
			.conn
			.open_bi()
			.await
			.map_err(|e| ClientCoreError::Io(format!("open_bi(events) failed: {e}")))?;

		// The server only sees the stream once a STREAM frame arrives.
		send.write_all(&[0u8])
			.await
			.map_err(|e| ClientCoreError::Io(format!("failed to write events stream activation byte: {e}")))?;

		self.events_opened = true;
		debug!("events stream opened");

		Ok(SessionEvents {
			events_recv: recv,
			_events_send_keepalive: send,
			decoder: FrameDecoder::new(self.max_frame_bytes),
		})
	}

	pub fn close(&self, code: u32, reason: &str) {
		self.conn.close(VarInt::from_u32(code), reason.as_bytes());
	}

	async fn write(&mut self, env: &pb::Envelope) -> Result<(), ClientCoreError> {
		let frame = encode_frame(env, self.max_frame_bytes)?;
		self.control_send
			.write_all(&frame)
			.await
			.map_err(|e| ClientCoreError::Io(e.to_string()))
	}

	async fn read_envelope(&mut self) -> Result<pb::Envelope, ClientCoreError> {
		read_next(&mut self.control_recv, &mut self.decoder)
			.await?
			.ok_or_else(|| ClientCoreError::Protocol("stream closed before receiving full message".to_string()))
	}
}

impl SessionEvents {
	/// Next room event, or `None` once the server closes the stream.
	pub async fn next_event(&mut self) -> Result<Option<pb::EventEnvelope>, ClientCoreError> {
		loop {
			let Some(env) = read_next(&mut self.events_recv, &mut self.decoder).await? else {
				return Ok(None);
			};
			match env.msg {
				Some(pb::envelope::Msg::Event(ev)) => {
					debug!(room = %ev.room, event_kind = event_kind(&ev), "events stream decoded");
					return Ok(Some(ev));
				}
				other => warn!("unexpected message on events stream: {:?}", other),
			}
		}
	}

	/// Run until EOF or error.
	pub async fn run_events_loop<F>(&mut self, mut on_event: F) -> Result<(), ClientCoreError>
	where
		F: FnMut(pb::EventEnvelope),
	{
		while let Some(ev) = self.next_event().await? {
			on_event(ev);
		}
		info!("events stream closed");
		Ok(())
	}
}

pub fn event_kind(ev: &pb::EventEnvelope) -> &'static str {
	use pb::event_envelope::Event;

	match ev.event.as_ref() {
		Some(Event::Chat(_)) => "chat",
		Some(Event::Typing(_)) => "typing",
		Some(Event::OrderUpdated(_)) => "order_updated",
		Some(Event::Unread(_)) => "unread",
		Some(Event::Notification(_)) => "notification",
		None => "empty",
	}
}

fn unexpected(expected: &str, got: &pb::envelope::Msg) -> ClientCoreError {
	ClientCoreError::Protocol(format!("expected {expected}, got {got:?}"))
}

async fn read_next(
	recv: &mut quinn::RecvStream,
	decoder: &mut FrameDecoder,
) -> Result<Option<pb::Envelope>, ClientCoreError> {
	let mut tmp = [0u8; 8192];

	loop {
		if let Some(env) = decoder.next_frame::<pb::Envelope>()? {
			return Ok(Some(env));
		}

		match recv.read(&mut tmp).await {
			Ok(Some(n)) => decoder.extend(&tmp[..n]),
			Ok(None) if decoder.buffered() == 0 => return Ok(None),
			Ok(None) => {
				return Err(ClientCoreError::Protocol(
					"stream closed in the middle of a frame".to_string(),
				));
			}
			Err(e) => return Err(ClientCoreError::Io(e.to_string())),
		}
	}
}

fn make_client_endpoint() -> anyhow::Result<Endpoint> {
	let addr = SocketAddr::from(([0, 0, 0, 0], 0));
	Endpoint::client(addr).context("create client endpoint")
}

fn make_client_config(trusted_cert_der: Option<&[u8]>) -> anyhow::Result<QuinnClientConfig> {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

	let mut tls = match trusted_cert_der {
		Some(der) => {
			let mut roots = rustls::RootCertStore::empty();
			roots
				.add(rustls::pki_types::CertificateDer::from(der.to_vec()))
				.context("add trusted certificate")?;
			rustls::ClientConfig::builder()
				.with_root_certificates(roots)
				.with_no_client_auth()
		}
		None => {
			let mut tls = rustls::ClientConfig::builder()
				.with_root_certificates(rustls::RootCertStore::empty())
				.with_no_client_auth();
			tls.dangerous().set_certificate_verifier(Arc::new(NoVerifier));
			tls
		}
	};
	tls.alpn_protocols = vec![ALPN.to_vec()];

	let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls)?;
	let mut cfg = QuinnClientConfig::new(Arc::new(quic_tls));

	let mut transport = TransportConfig::default();
	transport.max_concurrent_bidi_streams(VarInt::from_u32(8));
	transport.max_concurrent_uni_streams(VarInt::from_u32(0));
	transport.keep_alive_interval(Some(Duration::from_secs(15)));
	cfg.transport_config(Arc::new(transport));

	Ok(cfg)
}

/// Accepts any server certificate. Development only.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
	fn verify_server_cert(
		&self,
		_end_entity: &rustls::pki_types::CertificateDer<'_>,
		_intermediates: &[rustls::pki_types::CertificateDer<'_>],
		_server_name: &rustls::pki_types::ServerName<'_>,
		_ocsp_response: &[u8],
		_now: rustls::pki_types::UnixTime,
	) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
		Ok(rustls::client::danger::ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		_message: &[u8],
		_cert: &rustls::pki_types::CertificateDer<'_>,
		_dss: &rustls::DigitallySignedStruct,
	) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
		Err(rustls::Error::General("TLS1.2 not supported".into()))
	}

	fn verify_tls13_signature(
		&self,
		_message: &[u8],
		_cert: &rustls::pki_types::CertificateDer<'_>,
		_dss: &rustls::DigitallySignedStruct,
	) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
		Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
	}

	fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
		vec![
			rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
			rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
			rustls::SignatureScheme::RSA_PSS_SHA256,
			rustls::SignatureScheme::RSA_PSS_SHA384,
			rustls::SignatureScheme::RSA_PSS_SHA512,
			rustls::SignatureScheme::ED25519,
		]
	}
}
