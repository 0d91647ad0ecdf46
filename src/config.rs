use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_SERVER_URL: &str = "https://chatting-app-mj2n.onrender.com";
pub const DEFAULT_SOCKET_PATH: &str = "/api/socket";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Polling,
    Websocket,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Polling => "polling",
            TransportKind::Websocket => "websocket",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub attempts: u32,
    pub delay_ms: u64,
    pub delay_max_ms: u64,
    pub randomization_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            enabled: true,
            attempts: 5,
            delay_ms: 1000,
            delay_max_ms: 5000,
            randomization_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub path: String,
    pub add_trailing_slash: bool,
    pub transport: TransportKind,
    /// Upgrading polling to websocket mid-session is not supported; the flag
    /// only exists so a config asking for it is rejected loudly.
    pub upgrade: bool,
    pub with_credentials: bool,
    pub handshake_timeout_ms: u64,
    pub reconnection: ReconnectConfig,
    /// Re-assert `connected = true` to observers on this period while the
    /// transport is up. Zero disables the monitor.
    pub liveness_interval_ms: u64,
    /// Tell connection observers `true` as soon as `initialize` starts, before
    /// the handshake has completed.
    pub optimistic_connect_signal: bool,
    pub shutdown_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_url: DEFAULT_SERVER_URL.to_string(),
            path: DEFAULT_SOCKET_PATH.to_string(),
            add_trailing_slash: false,
            transport: TransportKind::Polling,
            upgrade: false,
            with_credentials: true,
            handshake_timeout_ms: 20_000,
            reconnection: ReconnectConfig::default(),
            liveness_interval_ms: 5000,
            optimistic_connect_signal: true,
            shutdown_timeout_ms: 1000,
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.server_url)
            .map_err(|e| ConfigError::Invalid(format!("server_url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "server_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid("path must start with '/'".to_string()));
        }
        if self.upgrade {
            return Err(ConfigError::Invalid(
                "transport upgrade is not supported".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnection.randomization_factor) {
            return Err(ConfigError::Invalid(
                "reconnection.randomization_factor must be within 0..=1".to_string(),
            ));
        }
        if self.reconnection.delay_ms > self.reconnection.delay_max_ms {
            return Err(ConfigError::Invalid(
                "reconnection.delay_ms exceeds reconnection.delay_max_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn liveness_interval(&self) -> Option<Duration> {
        (self.liveness_interval_ms > 0).then(|| Duration::from_millis(self.liveness_interval_ms))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Engine.IO endpoint for the configured transport, without session id.
    pub fn endpoint(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.server_url)?;
        let mut path = self.path.trim_end_matches('/').to_string();
        if self.add_trailing_slash {
            path.push('/');
        }
        url.set_path(&path);
        if self.transport == TransportKind::Websocket {
            let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
            // http(s) -> ws(s) is an allowed scheme change for special schemes
            let _ = url.set_scheme(scheme);
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", "4")
            .append_pair("transport", self.transport.as_str());
        Ok(url)
    }
}
