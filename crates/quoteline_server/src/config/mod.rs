#![forbid(unsafe_code)]

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::hub::HubConfig;

/// Default config path: `~/.quoteline/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".quoteline").join("config.toml"))
}

/// Load the server config from TOML at `path`, then process env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
	Ok(cfg)
}

/// A string that never shows up in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub hub: HubSettings,
	pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// PEM-encoded certificate path for QUIC/TLS. A self-signed dev
	/// certificate is generated when unset.
	pub tls_cert_path: Option<PathBuf>,
	/// PEM-encoded private key path for QUIC/TLS.
	pub tls_key_path: Option<PathBuf>,
	/// Optional Prometheus exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// HMAC secret for `v1.` access tokens.
	pub auth_hmac_secret: Option<SecretString>,
	/// Accept unsigned `role:id` tokens. Never enable in production.
	pub dev_allow_anonymous: bool,
}

#[derive(Debug, Clone)]
pub struct HubSettings {
	pub session_queue_capacity: usize,
	pub max_message_len: usize,
	pub default_tracking_steps: Vec<String>,
}

impl Default for HubSettings {
	fn default() -> Self {
		let hub = HubConfig::default();
		Self {
			session_queue_capacity: hub.session_queue_capacity,
			max_message_len: hub.max_message_len,
			default_tracking_steps: hub.default_tracking_steps,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Store data in a database instead of process memory.
	pub enabled: bool,
	/// `sqlite:` URL.
	pub database_url: Option<String>,
}

impl ServerConfig {
	pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
		let file: FileConfig = toml::from_str(s).context("parse TOML")?;
		Ok(Self::from_file(file))
	}

	pub fn hub_config(&self) -> HubConfig {
		HubConfig {
			session_queue_capacity: self.hub.session_queue_capacity,
			max_message_len: self.hub.max_message_len,
			default_tracking_steps: self.hub.default_tracking_steps.clone(),
		}
	}

	fn from_file(file: FileConfig) -> Self {
		let defaults = HubSettings::default();

		let default_tracking_steps = file
			.hub
			.default_tracking_steps
			.map(|steps| {
				steps
					.into_iter()
					.map(|s| s.trim().to_string())
					.filter(|s| !s.is_empty())
					.collect::<Vec<_>>()
			})
			.filter(|steps| !steps.is_empty())
			.unwrap_or(defaults.default_tracking_steps);

		Self {
			server: ServerSettings {
				tls_cert_path: file.server.tls_cert_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				tls_key_path: file.server.tls_key_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				auth_hmac_secret: file
					.server
					.auth_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				dev_allow_anonymous: file.server.dev_allow_anonymous.unwrap_or(false),
			},
			hub: HubSettings {
				session_queue_capacity: file
					.hub
					.session_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.session_queue_capacity),
				max_message_len: file
					.hub
					.max_message_len
					.filter(|v| *v > 0)
					.unwrap_or(defaults.max_message_len),
				default_tracking_steps,
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	hub: FileHubSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	tls_cert_path: Option<String>,
	tls_key_path: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	auth_hmac_secret: Option<String>,
	dev_allow_anonymous: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileHubSettings {
	session_queue_capacity: Option<usize>,
	max_message_len: Option<usize>,
	default_tracking_steps: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
	lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Apply `QUOTELINE_*` overrides. `lookup` is usually `std::env::var(..).ok()`.
pub fn apply_env_overrides(cfg: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
	if let Some(v) = non_empty(&lookup, "QUOTELINE_TLS_CERT") {
		cfg.server.tls_cert_path = Some(PathBuf::from(v));
		info!("server config: tls_cert_path overridden by env");
	}

	if let Some(v) = non_empty(&lookup, "QUOTELINE_TLS_KEY") {
		cfg.server.tls_key_path = Some(PathBuf::from(v));
		info!("server config: tls_key_path overridden by env");
	}

	if let Some(v) = non_empty(&lookup, "QUOTELINE_AUTH_HMAC_SECRET") {
		cfg.server.auth_hmac_secret = Some(SecretString::new(v));
		info!("server auth: auth_hmac_secret overridden by env");
	}

	if let Some(v) = lookup("QUOTELINE_DEV_ALLOW_ANONYMOUS")
		&& let Some(allow) = parse_env_bool(&v)
	{
		cfg.server.dev_allow_anonymous = allow;
		info!(allow, "server auth: dev_allow_anonymous overridden by env");
	}

	if let Some(v) = non_empty(&lookup, "QUOTELINE_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = non_empty(&lookup, "QUOTELINE_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = lookup("QUOTELINE_SESSION_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.hub.session_queue_capacity = capacity;
		info!(capacity, "hub config: session_queue_capacity overridden by env");
	}

	if let Some(v) = lookup("QUOTELINE_MAX_MESSAGE_LEN")
		&& let Ok(len) = v.trim().parse::<usize>()
		&& len > 0
	{
		cfg.hub.max_message_len = len;
		info!(len, "hub config: max_message_len overridden by env");
	}

	if let Some(v) = lookup("QUOTELINE_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Some(v) = non_empty(&lookup, "QUOTELINE_DATABASE_URL") {
		cfg.persistence.database_url = Some(v);
		info!("persistence: database_url overridden by env");
	}

	if cfg.persistence.enabled && cfg.persistence.database_url.is_none() {
		warn!("persistence: enabled without database_url; falling back to sqlite in the data dir");
	}

	if cfg.server.dev_allow_anonymous {
		warn!("server auth: anonymous role:id tokens are accepted");
	}
}

/// Fallback database location when persistence is enabled without a URL.
pub fn default_database_url() -> anyhow::Result<String> {
	let dir = dirs::data_local_dir()
		.ok_or_else(|| anyhow!("could not determine data directory"))?
		.join("quoteline");
	fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
	Ok(format!("sqlite://{}", dir.join("quoteline.db").display()))
}
