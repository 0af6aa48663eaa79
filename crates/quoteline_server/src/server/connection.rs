#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use quoteline_domain::{OrderAction, RoomKey};
use quoteline_protocol::{FrameDecoder, FramingError, convert, encode_frame, envelope, pb};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::auth::IdentityVerifier;
use crate::server::error::HubError;
use crate::server::events::{RoomEvent, SessionId};
use crate::server::hub::{Hub, NewMessage};

/// Per-connection server settings.
#[derive(Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: u32,
	pub server_name: String,
	pub server_instance_id: String,
	pub verifier: Arc<dyn IdentityVerifier>,
}

/// Serve one QUIC connection.
///
/// The client opens the control stream first and sends `Hello`. After
/// `Welcome` it opens a second bidirectional stream that the server only
/// writes room events to.
pub async fn handle_connection(
	conn_id: u64,
	connection: quinn::Connection,
	hub: Arc<Hub>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("quoteline_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("quoteline_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let max_frame = settings.max_frame_bytes as usize;

	let (mut control_send, mut control_recv) =
		connection.accept_bi().await.context("accept control bidirectional stream")?;

	let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<pb::Envelope>();
	let reader_task = tokio::spawn(async move {
		let mut decoder = FrameDecoder::new(max_frame);
		let mut tmp = [0u8; 8192];

		loop {
			let n = match control_recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => return Ok::<(), anyhow::Error>(()),
				Err(e) => return Err(anyhow!(e).context("control stream read failed")),
			};

			metrics::counter!("quoteline_control_bytes_in_total").increment(n as u64);
			decoder.extend(&tmp[..n]);

			loop {
				match decoder.next_frame::<pb::Envelope>() {
					Ok(Some(env)) => {
						metrics::counter!("quoteline_envelopes_in_total").increment(1);
						if ctrl_tx.send(env).is_err() {
							return Ok(());
						}
					}
					Ok(None) => break,
					Err(e) => {
						metrics::counter!("quoteline_control_decode_errors_total").increment(1);
						return Err(anyhow!(e).context("failed to decode control frame"));
					}
				}
			}
		}
	});

	let hello = wait_for_hello(&mut ctrl_rx).await?;
	info!(
		conn_id,
		client_name = %hello.client_name,
		client_instance_id = %hello.client_instance_id,
		"received Hello"
	);
	metrics::counter!("quoteline_hello_total").increment(1);

	let identity = match settings.verifier.verify(&hello.auth_token) {
		Ok(identity) => identity,
		Err(e) => {
			warn!(conn_id, error = %e, "unauthorized: auth token rejected");
			metrics::counter!("quoteline_auth_rejected_total").increment(1);
			send_envelope(
				&mut control_send,
				envelope(
					String::new(),
					pb::envelope::Msg::Error(pb::Error {
						code: "UNAUTHORIZED".to_string(),
						message: e.to_string(),
					}),
				),
				max_frame,
			)
			.await
			.ok();
			// Let the client read the error before the connection goes away.
			control_send.finish().ok();
			let _ = control_send.stopped().await;
			reader_task.abort();
			return Ok(());
		}
	};

	let (session, events_rx) = hub.connect(identity.clone());
	info!(conn_id, session_id = %session, user_id = %identity.id, role = %identity.role, "session established");

	let welcome = pb::Welcome {
		server_name: settings.server_name.clone(),
		server_instance_id: settings.server_instance_id.clone(),
		server_time_unix_ms: hub.now_ms(),
		max_frame_bytes: settings.max_frame_bytes,
		session_id: session.0,
		user_id: identity.id.to_string(),
		role: pb::Role::from(identity.role) as i32,
	};
	let welcomed = send_envelope(
		&mut control_send,
		envelope(String::new(), pb::envelope::Msg::Welcome(welcome)),
		max_frame,
	)
	.await
	.context("send Welcome");
	if let Err(e) = welcomed {
		hub.disconnect(session);
		reader_task.abort();
		return Err(e);
	}

	let events_task = tokio::spawn(run_events_writer(conn_id, session, connection.clone(), events_rx, max_frame));

	let loop_result = async {
		while let Some(env) = ctrl_rx.recv().await {
			let request_id = env.request_id;
			let Some(msg) = env.msg else { continue };

			let reply = match msg {
				pb::envelope::Msg::Hello(_) => {
					debug!(conn_id, "ignoring duplicate Hello");
					continue;
				}
				other => match dispatch(&hub, session, other).await {
					Ok(reply) => reply,
					Err(e) => {
						metrics::counter!("quoteline_request_errors_total", "code" => e.code()).increment(1);
						if matches!(e, HubError::Store(_)) {
							warn!(conn_id, session_id = %session, error = %e, "request failed");
						} else {
							debug!(conn_id, session_id = %session, error = %e, "request rejected");
						}
						pb::envelope::Msg::Error(e.to_pb())
					}
				},
			};

			send_envelope(&mut control_send, envelope(request_id, reply), max_frame).await?;
		}
		Ok::<(), anyhow::Error>(())
	}
	.await;

	hub.disconnect(session);
	debug!(conn_id, session_id = %session, "connection closing");

	events_task.abort();
	let _ = reader_task.await;

	loop_result
}

/// Forward queued room events until the session ends, then close the connection.
async fn run_events_writer(
	conn_id: u64,
	session: SessionId,
	connection: quinn::Connection,
	mut events_rx: mpsc::Receiver<Arc<RoomEvent>>,
	max_frame: usize,
) {
	let mut events_send = match connection.accept_bi().await {
		Ok((send, _recv)) => send,
		Err(e) => {
			debug!(conn_id, error = %e, "events stream never opened");
			return;
		}
	};
	info!(conn_id, session_id = %session, "accepted events bidirectional stream (server will only write)");

	while let Some(ev) = events_rx.recv().await {
		let env = envelope(String::new(), pb::envelope::Msg::Event(ev.to_pb()));
		let frame = match encode_frame(&env, max_frame) {
			Ok(frame) => frame,
			Err(FramingError::FrameTooLarge { len, max }) => {
				warn!(conn_id, kind = ev.kind(), len, max, "dropping oversized event");
				continue;
			}
			Err(e) => {
				warn!(conn_id, error = %e, "failed to encode event");
				continue;
			}
		};

		if let Err(e) = events_send.write_all(&frame).await {
			debug!(conn_id, error = %e, "events stream write failed");
			return;
		}
		metrics::counter!("quoteline_events_out_total").increment(1);
	}

	// The hub dropped this session (overflow or shutdown).
	info!(conn_id, session_id = %session, "session ended by server; closing connection");
	connection.close(0u32.into(), b"session closed");
}

async fn wait_for_hello(ctrl_rx: &mut mpsc::UnboundedReceiver<pb::Envelope>) -> anyhow::Result<pb::Hello> {
	while let Some(env) = ctrl_rx.recv().await {
		let Some(msg) = env.msg else { continue };
		if let pb::envelope::Msg::Hello(h) = msg {
			return Ok(h);
		}
	}
	Err(anyhow!("connection closed before Hello"))
}

/// Handle one request and produce its reply.
pub(crate) async fn dispatch(hub: &Hub, session: SessionId, msg: pb::envelope::Msg) -> Result<pb::envelope::Msg, HubError> {
	use pb::envelope::Msg;

	Ok(match msg {
		Msg::Ping(ping) => Msg::Pong(pb::Pong {
			client_time_unix_ms: ping.client_time_unix_ms,
			server_time_unix_ms: hub.now_ms(),
		}),

		Msg::Join(join) => {
			let room = RoomKey::parse(&join.room)?;
			let newly_joined = hub.join(session, room.clone()).await?;
			Msg::Joined(pb::Joined {
				room: room.to_string(),
				newly_joined,
			})
		}

		Msg::Leave(leave) => {
			let room = RoomKey::parse(&leave.room)?;
			let was_member = hub.leave(session, &room)?;
			Msg::Left(pb::Left {
				room: room.to_string(),
				was_member,
			})
		}

		Msg::SendMessage(m) => {
			let sender = convert::sender_from_pb(m.sender).ok_or_else(|| HubError::Validation("sender is required".into()))?;
			let receipt = hub
				.send_message(
					session,
					NewMessage {
						scope: convert::parse_scope(&m.scope)?,
						customer_id: convert::parse_customer_id(&m.customer_id)?,
						sender,
						text: m.text,
						sent_at_ms: m.sent_at_ms,
					},
				)
				.await?;
			Msg::MessageAck(pb::MessageAck {
				message: Some((&receipt.message).into()),
				duplicate: receipt.duplicate,
			})
		}

		Msg::Typing(t) => {
			let customer_id = convert::parse_customer_id(&t.customer_id)?;
			let order_id = t
				.order_id
				.as_deref()
				.filter(|s| !s.trim().is_empty())
				.map(convert::parse_order_id)
				.transpose()?;
			hub.typing(session, customer_id, order_id, t.typing).await?;
			Msg::Typing(t)
		}

		Msg::MarkRead(m) => {
			let customer_id = convert::parse_customer_id(&m.customer_id)?;
			let scope = convert::parse_scope(&m.scope)?;
			let counts = hub.mark_read(session, customer_id.clone(), scope.clone()).await?;
			Msg::Unread(convert::unread_to_pb(&customer_id, &scope, counts))
		}

		Msg::FetchSnapshot(f) => {
			let customer_id = convert::parse_customer_id(&f.customer_id)?;
			let scope = convert::parse_scope(&f.scope)?;
			let snap = hub
				.snapshot(session, customer_id.clone(), scope.clone(), f.since_ms)
				.await?;
			Msg::Snapshot(pb::Snapshot {
				messages: snap.messages.iter().map(Into::into).collect(),
				unread: Some(convert::unread_to_pb(&customer_id, &scope, snap.unread)),
			})
		}

		Msg::ListNotifications(_) => Msg::NotificationList(pb::NotificationList {
			notifications: hub.list_notifications(session).await?.iter().map(Into::into).collect(),
		}),

		Msg::MarkNotificationsSeen(_) => Msg::NotificationsChanged(pb::NotificationsChanged {
			affected: hub.mark_notifications_seen(session).await?,
		}),

		Msg::DeleteSeenNotifications(_) => Msg::NotificationsChanged(pb::NotificationsChanged {
			affected: hub.delete_seen_notifications(session).await?,
		}),

		Msg::CreateOrder(c) => {
			let customer_id = convert::parse_customer_id(&c.customer_id)?;
			let order = hub
				.create_order(session, customer_id, c.description, c.tracking_steps)
				.await?;
			Msg::OrderResult(pb::OrderResult {
				order: Some((&order).into()),
				change: None,
			})
		}

		Msg::GetOrder(g) => {
			let order_id = convert::parse_order_id(&g.order_id)?;
			let order = hub.get_order(session, &order_id).await?;
			Msg::OrderResult(pb::OrderResult {
				order: Some((&order).into()),
				change: None,
			})
		}

		Msg::TransitionOrder(t) => {
			let order_id = convert::parse_order_id(&t.order_id)?;
			let action: OrderAction = t
				.action
				.ok_or_else(|| HubError::Validation("action is required".into()))?
				.try_into()?;
			let transition = hub.transition_order(session, &order_id, action).await?;
			Msg::OrderResult(pb::OrderResult {
				order: Some((&transition.order).into()),
				change: Some((&transition.change).into()),
			})
		}

		other => {
			return Err(HubError::Validation(format!(
				"unexpected client message: {}",
				message_name(&other)
			)));
		}
	})
}

fn message_name(msg: &pb::envelope::Msg) -> &'static str {
	use pb::envelope::Msg;

	match msg {
		Msg::Hello(_) => "hello",
		Msg::Welcome(_) => "welcome",
		Msg::Error(_) => "error",
		Msg::Pong(_) => "pong",
		Msg::Joined(_) => "joined",
		Msg::Left(_) => "left",
		Msg::MessageAck(_) => "message_ack",
		Msg::Unread(_) => "unread",
		Msg::Snapshot(_) => "snapshot",
		Msg::NotificationList(_) => "notification_list",
		Msg::NotificationsChanged(_) => "notifications_changed",
		Msg::OrderResult(_) => "order_result",
		Msg::Event(_) => "event",
		_ => "request",
	}
}

async fn send_envelope(send: &mut quinn::SendStream, env: pb::Envelope, max_frame: usize) -> anyhow::Result<()> {
	let frame = encode_frame(&env, max_frame).map_err(|e| anyhow!(e))?;
	metrics::counter!("quoteline_envelopes_out_total").increment(1);
	metrics::counter!("quoteline_control_bytes_out_total").increment(frame.len() as u64);

	send.write_all(&frame).await.context("stream write")?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use quoteline_domain::{Identity, Role, UserId};
	use quoteline_util::ManualClock;

	use super::*;
	use crate::server::hub::HubConfig;
	use crate::store::MemoryStore;

	fn hub() -> Hub {
		Hub::new(
			HubConfig::default(),
			Arc::new(MemoryStore::new()),
			Arc::new(ManualClock::new(5_000)),
		)
	}

	#[tokio::test]
	async fn errors_map_to_wire_codes() {
		let hub = hub();
		let (s, _rx) = hub.connect(Identity::new(UserId::new("c-1").unwrap(), Role::Customer));

		let err = dispatch(&hub, s, pb::envelope::Msg::Join(pb::Join { room: "staff".into() }))
			.await
			.unwrap_err();
		assert_eq!(err.code(), "FORBIDDEN");

		let err = dispatch(&hub, s, pb::envelope::Msg::Join(pb::Join { room: "lobby".into() }))
			.await
			.unwrap_err();
		assert_eq!(err.code(), "INVALID");

		let err = dispatch(
			&hub,
			s,
			pb::envelope::Msg::GetOrder(pb::GetOrder {
				order_id: "missing".into(),
			}),
		)
		.await
		.unwrap_err();
		assert_eq!(err.code(), "NOT_FOUND");
	}

	#[tokio::test]
	async fn send_then_snapshot_over_wire_types() {
		let hub = hub();
		let (s, _rx) = hub.connect(Identity::new(UserId::new("c-1").unwrap(), Role::Customer));

		let ack = dispatch(
			&hub,
			s,
			pb::envelope::Msg::SendMessage(pb::SendMessage {
				scope: "global".into(),
				customer_id: "c-1".into(),
				sender: pb::Sender::Customer as i32,
				text: "hello".into(),
				sent_at_ms: 0,
			}),
		)
		.await
		.unwrap();
		let pb::envelope::Msg::MessageAck(ack) = ack else {
			panic!("expected ack");
		};
		assert!(!ack.duplicate);
		assert_eq!(ack.message.as_ref().map(|m| m.sent_at_ms), Some(5_000));

		let snap = dispatch(
			&hub,
			s,
			pb::envelope::Msg::FetchSnapshot(pb::FetchSnapshot {
				customer_id: "c-1".into(),
				scope: "global".into(),
				since_ms: 0,
			}),
		)
		.await
		.unwrap();
		let pb::envelope::Msg::Snapshot(snap) = snap else {
			panic!("expected snapshot");
		};
		assert_eq!(snap.messages.len(), 1);
		assert_eq!(snap.unread.map(|u| u.to_staff), Some(1));
	}

	#[tokio::test]
	async fn transition_without_action_is_invalid() {
		let hub = hub();
		let (s, _rx) = hub.connect(Identity::new(UserId::new("s-1").unwrap(), Role::Staff));

		let err = dispatch(
			&hub,
			s,
			pb::envelope::Msg::TransitionOrder(pb::TransitionOrder {
				order_id: "o-1".into(),
				action: None,
			}),
		)
		.await
		.unwrap_err();
		assert_eq!(err.code(), "INVALID");
	}
}
