#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use quoteline_protocol::framing::DEFAULT_MAX_FRAME_SIZE;
use quoteline_server::config::{ServerConfig, default_config_path, default_database_url, load_server_config_from_path};
use quoteline_server::quic::QuicServerConfig;
use quoteline_server::server::auth::HmacVerifier;
use quoteline_server::server::connection::{ConnectionSettings, handle_connection};
use quoteline_server::server::health::{HealthState, spawn_health_server};
use quoteline_server::server::hub::Hub;
use quoteline_server::store::{MemoryStore, SqlStore, Store};
use quoteline_util::{QuicEndpoint, SystemClock};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

struct Args {
	bind: SocketAddr,
	config_path: Option<PathBuf>,
}

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: quoteline_server [--bind quic://host:port] [--config path]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: quic://127.0.0.1:18420)\n\
\t         Format: quic://host:port\n\
\t--config  Config file (default: ~/.quoteline/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Args {
	let mut bind_endpoint = QuicEndpoint::localhost();
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				bind_endpoint = QuicEndpoint::parse(&v).unwrap_or_else(|e| {
					eprintln!("{e}");
					usage_and_exit();
				});
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = bind_endpoint.socket_addr().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	Args { bind, config_path }
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,quoteline_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("quoteline_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

async fn open_store(cfg: &ServerConfig) -> anyhow::Result<Arc<dyn Store>> {
	if !cfg.persistence.enabled {
		info!("persistence disabled; using in-memory store");
		return Ok(Arc::new(MemoryStore::new()));
	}

	let url = match cfg.persistence.database_url.clone() {
		Some(url) => url,
		None => default_database_url()?,
	};
	let store = SqlStore::connect(&url).await?;
	info!(%url, "persistence enabled");
	Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let args = parse_args();

	let config_path = match args.config_path {
		Some(path) => path,
		None => default_config_path()?,
	};
	let server_cfg = load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let store = open_store(&server_cfg).await?;
	let hub = Arc::new(Hub::new(server_cfg.hub_config(), store, Arc::new(SystemClock)));

	let health_state = HealthState::new(Arc::clone(&hub));
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => spawn_health_server(addr, health_state.clone()),
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let quic_cfg = QuicServerConfig::new(args.bind);
	let endpoint = if let (Some(cert_path), Some(key_path)) = (
		server_cfg.server.tls_cert_path.as_deref(),
		server_cfg.server.tls_key_path.as_deref(),
	) {
		info!(cert = %cert_path.display(), key = %key_path.display(), "loading TLS cert/key");
		quic_cfg.bind_endpoint_with_tls(cert_path, key_path)?
	} else {
		let (endpoint, server_cert_der) = quic_cfg.bind_dev_endpoint()?;
		info!(
			bind = %args.bind,
			cert_der_len = server_cert_der.len(),
			"QUIC endpoint ready (dev self-signed cert)"
		);
		endpoint
	};

	let verifier = HmacVerifier::new(
		server_cfg.server.auth_hmac_secret.as_ref().map(|s| s.expose()),
		server_cfg.server.dev_allow_anonymous,
	);
	let conn_settings = ConnectionSettings {
		max_frame_bytes: DEFAULT_MAX_FRAME_SIZE as u32,
		server_name: "quoteline".to_string(),
		server_instance_id: uuid::Uuid::new_v4().to_string(),
		verifier: Arc::new(verifier),
	};

	health_state.mark_ready();
	info!(bind = %args.bind, "quoteline hub accepting connections");

	let mut next_conn_id: u64 = 1;

	loop {
		let incoming = tokio::select! {
			incoming = endpoint.accept() => incoming,
			_ = tokio::signal::ctrl_c() => {
				info!("shutdown requested");
				break;
			}
		};
		let Some(connecting) = incoming else {
			break;
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("quoteline_server_connections_total").increment(1);

		let hub = Arc::clone(&hub);
		let conn_settings = conn_settings.clone();
		tokio::spawn(async move {
			match connecting.await {
				Ok(connection) => {
					info!(conn_id, remote = %connection.remote_address(), "accepted connection");
					if let Err(e) = handle_connection(conn_id, connection, hub, conn_settings).await {
						warn!(conn_id, error = %e, "connection handler exited with error");
					}
				}
				Err(e) => {
					warn!(conn_id, error = %e, "failed to establish QUIC connection");
				}
			}
		});
	}

	endpoint.close(quinn::VarInt::from_u32(0), b"shutdown");
	endpoint.wait_idle().await;
	Ok(())
}
