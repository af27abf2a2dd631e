//! Configuration file for the `uftp` binary.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uftp_core::{DEFAULT_CLIENT_PORT, DEFAULT_SERVER_PORT};

/// UFTP configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Transfer tuning
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Host name or address of the server the client talks to
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Port the server listens on
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Port the client binds
    #[serde(default = "default_client_port")]
    pub client_port: u16,
    /// Local address both roles bind to
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
}

/// Transfer tuning, mirrored into [`uftp_core::TransferConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk payload size in bytes; both peers must agree
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Delay between chunk frames
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Window in which repeated resend requests are ignored
    #[serde(default = "default_resend_debounce_ms")]
    pub resend_debounce_ms: u64,
    /// Pause after asking for a resend
    #[serde(default = "default_resend_pause_ms")]
    pub resend_pause_ms: u64,
    /// How long the receiver waits for the next chunk
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,
    /// Abort a transfer that makes no progress for this long; 0 waits forever
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    /// Give up after this many resends
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resends: Option<u32>,
    /// Per-attempt wait for a control reply
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Attempts for idempotent requests
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory sessions start in
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_server_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_client_port() -> u16 {
    DEFAULT_CLIENT_PORT
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_chunk_size() -> usize {
    uftp_core::TransferConfig::default().chunk_size
}

fn default_pacing_ms() -> u64 {
    1
}

fn default_resend_debounce_ms() -> u64 {
    50
}

fn default_resend_pause_ms() -> u64 {
    10
}

fn default_chunk_timeout_ms() -> u64 {
    500
}

fn default_stall_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_request_retries() -> u32 {
    3
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            server_port: default_server_port(),
            client_port: default_client_port(),
            bind_host: default_bind_host(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            pacing_ms: default_pacing_ms(),
            resend_debounce_ms: default_resend_debounce_ms(),
            resend_pause_ms: default_resend_pause_ms(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            stall_timeout_secs: default_stall_timeout_secs(),
            max_resends: None,
            request_timeout_ms: default_request_timeout_ms(),
            request_retries: default_request_retries(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("uftp/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Protocol tuning derived from the `[transfer]` section
    #[must_use]
    pub fn transfer_config(&self) -> uftp_core::TransferConfig {
        let t = &self.transfer;
        uftp_core::TransferConfig {
            chunk_size: t.chunk_size,
            pacing: Duration::from_millis(t.pacing_ms),
            resend_debounce: Duration::from_millis(t.resend_debounce_ms),
            resend_pause: Duration::from_millis(t.resend_pause_ms),
            chunk_timeout: Duration::from_millis(t.chunk_timeout_ms),
            stall_timeout: (t.stall_timeout_secs > 0)
                .then(|| Duration::from_secs(t.stall_timeout_secs)),
            max_resends: t.max_resends,
            request_timeout: Duration::from_millis(t.request_timeout_ms),
            request_retries: t.request_retries,
        }
    }

    /// Address the server binds
    ///
    /// # Errors
    ///
    /// Returns an error if `bind_host` is not an IP address.
    pub fn server_bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind_addr(self.network.server_port)
    }

    /// Address the client binds
    ///
    /// # Errors
    ///
    /// Returns an error if `bind_host` is not an IP address.
    pub fn client_bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind_addr(self.network.client_port)
    }

    fn bind_addr(&self, port: u16) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self.network.bind_host.parse().map_err(|_| {
            anyhow::anyhow!("Invalid bind host: {}", self.network.bind_host)
        })?;
        Ok(SocketAddr::new(ip, port))
    }

    /// Resolve the server the client talks to
    ///
    /// # Errors
    ///
    /// Returns an error if the host name does not resolve.
    pub fn server_addr(&self) -> anyhow::Result<SocketAddr> {
        let host = self.network.server_addr.as_str();
        (host, self.network.server_port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("Server address {host} did not resolve"))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.server_bind_addr()?;

        if self.network.server_addr.is_empty() {
            anyhow::bail!("Server address must not be empty");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        self.transfer_config().validate()?;
        Ok(())
    }
}
