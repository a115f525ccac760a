//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The expected username and password, immutable for the process lifetime
/// and shared read-only by every session.
#[derive(Clone)]
pub struct Credentials {
    /// Expected username.
    pub username: String,
    /// Expected password.
    pub password: String,
}

impl Credentials {
    /// Exact byte-equality check against the configured username.
    pub fn username_matches(&self, candidate: &[u8]) -> bool {
        candidate == self.username.as_bytes()
    }

    /// Exact byte-equality check against the configured password.
    pub fn password_matches(&self, candidate: &[u8]) -> bool {
        candidate == self.password.as_bytes()
    }
}

/// Runtime server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: String,
    /// Listen port
    pub listen_port: u16,
    /// Credential pair required from every client
    pub credentials: Credentials,
    /// Size in bytes of every pooled I/O buffer, at least 256 so the
    /// longest length-prefixed handshake field always fits
    pub buffer_size: usize,
    /// Free buffers the pool retains before freeing returns
    pub max_idle_buffers: usize,
    /// Deadline covering the whole handshake, greeting through dial
    pub handshake_timeout: Duration,
    /// How often the telemetry task logs the active-connection count
    pub report_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".into(),
            listen_port: 1080,
            credentials: Credentials {
                username: "admin".into(),
                password: "admin".into(),
            },
            buffer_size: 64 * 1024,
            max_idle_buffers: 32,
            handshake_timeout: Duration::from_secs(5),
            report_interval: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            return Err(Error::config("listen_addr cannot be empty"));
        }
        if self.credentials.username.is_empty() {
            return Err(Error::config("username cannot be empty"));
        }
        // 255 is the largest single handshake read (method list, username,
        // password, and domain name all carry a one-byte length).
        if self.buffer_size < 256 {
            return Err(Error::config("buffer_size must be at least 256 bytes"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::config("handshake_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration file format for serialization.
#[derive(Serialize, Deserialize)]
pub struct ServerConfigFile {
    /// Listen address
    pub listen_addr: String,
    /// Listen port
    pub listen_port: u16,
    /// Required username
    pub username: String,
    /// Required password
    pub password: String,
    /// Buffer size in bytes
    pub buffer_size: usize,
    /// Free buffers retained by the pool
    pub max_idle_buffers: usize,
    /// Handshake timeout (seconds)
    pub handshake_timeout_secs: u64,
    /// Telemetry report interval (seconds)
    pub report_interval_secs: u64,
}

impl ServerConfigFile {
    /// Convert to runtime configuration.
    pub fn to_config(&self) -> ServerConfig {
        ServerConfig {
            listen_addr: self.listen_addr.clone(),
            listen_port: self.listen_port,
            credentials: Credentials {
                username: self.username.clone(),
                password: self.password.clone(),
            },
            buffer_size: self.buffer_size,
            max_idle_buffers: self.max_idle_buffers,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            report_interval: Duration::from_secs(self.report_interval_secs),
        }
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            listen_addr: config.listen_addr.clone(),
            listen_port: config.listen_port,
            username: config.credentials.username.clone(),
            password: config.credentials.password.clone(),
            buffer_size: config.buffer_size,
            max_idle_buffers: config.max_idle_buffers,
            handshake_timeout_secs: config.handshake_timeout.as_secs(),
            report_interval_secs: config.report_interval.as_secs(),
        }
    }
}
