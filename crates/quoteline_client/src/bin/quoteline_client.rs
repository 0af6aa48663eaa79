#![forbid(unsafe_code)]

use quoteline_client::{Applied, ClientConfig, MessageLog, SessionControl, event_kind};
use quoteline_domain::{ChannelScope, ChatMessage, CustomerId, RoomKey, Sender};
use quoteline_protocol::pb;
use quoteline_util::{QuicEndpoint, unix_ms_now};
use tracing::{info, warn};

struct Args {
	endpoint: String,
	token: String,
	rooms: Vec<RoomKey>,
	customer: Option<CustomerId>,
	say: Option<String>,
}

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: quoteline_client [--connect quic://host:port] [--token token] [--join room]... [--customer id [--say text]]\n\
\n\
Options:\n\
\t--connect   Server endpoint (default: quic://127.0.0.1:18420)\n\
\t--token     Auth token (default: $QUOTELINE_CLIENT_AUTH_TOKEN)\n\
\t--join      Room to join: customer:<id>, staff or order:<id> (repeatable)\n\
\t--customer  Follow this customer's global chat (joins customer:<id>)\n\
\t--say       Send one message to that chat after connecting\n\
\t--help      Show this help\n\
\n\
Examples:\n\
\tquoteline_client --token customer:c-1 --customer c-1 --say hello\n\
\tquoteline_client --token staff:s-1 --join staff\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,quoteline_client=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn parse_args() -> Args {
	let mut args = Args {
		endpoint: format!("quic://{}", QuicEndpoint::localhost().hostport()),
		token: std::env::var("QUOTELINE_CLIENT_AUTH_TOKEN")
			.map(|v| v.trim().to_string())
			.unwrap_or_default(),
		rooms: Vec::new(),
		customer: None,
		say: None,
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		let mut value = || it.next().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| usage_and_exit());
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--connect" | "--endpoint" => args.endpoint = value(),
			"--token" => args.token = value(),
			"--join" => {
				let v = value();
				let room = RoomKey::parse(&v).unwrap_or_else(|e| {
					eprintln!("Invalid --join value: {e}");
					usage_and_exit()
				});
				args.rooms.push(room);
			}
			"--customer" => {
				let v = value();
				args.customer = Some(CustomerId::new(v).unwrap_or_else(|e| {
					eprintln!("Invalid --customer value: {e}");
					usage_and_exit()
				}));
			}
			"--say" => args.say = Some(value()),
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	if args.say.is_some() && args.customer.is_none() {
		eprintln!("--say needs --customer");
		usage_and_exit();
	}

	args
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let cfg = ClientConfig {
		client_name: format!("quoteline-client-cli/{}", env!("CARGO_PKG_VERSION")),
		client_instance_id: format!("cli-{}", std::process::id()),
		auth_token: args.token.clone(),
		..ClientConfig::from_quic_endpoint(&args.endpoint)?
	};
	info!(server = %args.endpoint, "connecting");

	let (mut control, welcome) = SessionControl::connect(cfg).await?;
	let role = quoteline_protocol::convert::role_from_pb(welcome.role);
	info!(user_id = %welcome.user_id, role = ?role, session_id = welcome.session_id, "session established");

	let mut rooms = args.rooms.clone();
	if let Some(customer) = &args.customer {
		rooms.push(RoomKey::Customer(customer.clone()));
	}
	for room in &rooms {
		let newly = control.join(room).await?;
		info!(%room, newly, "joined");
	}

	let mut events = control.open_events_stream().await?;

	let mut log = match &args.customer {
		Some(customer) => {
			let mut log = MessageLog::new(customer.clone(), ChannelScope::Global);
			let snapshot = control.fetch_snapshot(customer, &ChannelScope::Global, 0).await?;
			let history: Vec<ChatMessage> = snapshot
				.messages
				.into_iter()
				.filter_map(|m| ChatMessage::try_from(m).ok())
				.collect();
			log.resync(&history);
			for m in &history {
				println!("[{}] {}: {}", m.sent_at_ms, m.sender.as_str(), m.text);
			}
			Some(log)
		}
		None => None,
	};

	if let (Some(customer), Some(text), Some(log)) = (&args.customer, &args.say, log.as_mut()) {
		let sender = match role {
			Some(quoteline_domain::Role::Staff) => Sender::Staff,
			_ => Sender::Customer,
		};
		let sent_at_ms = unix_ms_now();
		log.insert_optimistic(sender, text.clone(), sent_at_ms);
		let ack = control
			.send_message(customer, &ChannelScope::Global, sender, text, sent_at_ms)
			.await?;
		if let Some(m) = ack.message.and_then(|m| ChatMessage::try_from(m).ok()) {
			log.apply_confirmed(&m);
		}
		info!(duplicate = ack.duplicate, "message sent");
	}

	while let Some(ev) = events.next_event().await? {
		match ev.event {
			Some(pb::event_envelope::Event::Chat(m)) => {
				let Ok(m) = ChatMessage::try_from(m) else {
					warn!(room = %ev.room, "undecodable chat event");
					continue;
				};
				let fresh = log.as_mut().map(|l| l.apply_confirmed(&m)).unwrap_or(Applied::Inserted);
				if matches!(fresh, Applied::Inserted | Applied::OtherChannel) {
					println!("[{}] {} {}: {}", ev.room, m.sent_at_ms, m.sender.as_str(), m.text);
				}
			}
			Some(pb::event_envelope::Event::OrderUpdated(u)) => {
				if let Some(change) = u.change {
					println!(
						"[{}] order {} {}: {} -> {}",
						ev.room, change.order_id, change.action, change.old_status, change.new_status
					);
				}
			}
			Some(pb::event_envelope::Event::Unread(u)) => {
				println!(
					"[{}] unread {}/{}: to_staff={} to_customer={}",
					ev.room, u.customer_id, u.scope, u.to_staff, u.to_customer
				);
			}
			Some(pb::event_envelope::Event::Notification(n)) => {
				println!("[{}] notification: {} - {}", ev.room, n.title, n.text);
			}
			_ => info!(room = %ev.room, kind = event_kind(&ev), "event"),
		}
	}

	info!("events stream closed");
	Ok(())
}
