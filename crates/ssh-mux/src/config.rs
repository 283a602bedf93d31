//! Configuration for the multiplexer.
//!
//! [`MuxConfig`] carries the connector-level defaults (host, port, timeout,
//! shell mode, receiver buffer sizing, queue policy). Values come from code
//! via the builder, from a TOML file, or from `SSH_MUX_*` environment
//! overrides. [`ConnectionDetails`] is the immutable per-request value built
//! from those defaults plus the per-call credentials.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MuxError, Result};
use crate::queue::{OverflowPolicy, QueueConfig};
use crate::sink::CallbackSink;
use crate::transport::ssh::HostKeyPolicy;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Default connect timeout (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default receiver buffer size in bytes.
pub const DEFAULT_RECEIVER_BUFFER_SIZE: usize = 8192;

/// Default terminal type requested for shell-mode PTYs.
pub const DEFAULT_TERM: &str = "dumb";

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SSH_MUX";

/// Connector-level configuration defaults.
///
/// One `MuxConfig` describes one target host; per-call credentials are
/// supplied on each send and merged into a [`ConnectionDetails`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxConfig {
    /// Host name or address of the remote end.
    pub host: String,
    /// TCP port the remote end listens on.
    pub port: u16,
    /// Connect deadline, enforced around the TCP/handshake/auth phase.
    ///
    /// Per-send deadlines are not enforced; embedders that need them can wrap
    /// `send` in their own timeout.
    pub timeout: Duration,
    /// If true, each session allocates a PTY and starts an interactive shell
    /// whose context persists across sends. If false, each send writes a
    /// discrete payload on the session channel.
    pub shell_mode: bool,
    /// Read granularity for the producer loop, in bytes. Must be at least 1.
    pub receiver_buffer_size: usize,
    /// Terminal type requested for shell-mode PTYs.
    pub term: String,
    /// Capacity and overflow policy for each session's chunk queue.
    pub queue: QueueConfig,
    /// Server host key acceptance policy.
    pub host_key: HostKeyPolicy,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            shell_mode: false,
            receiver_buffer_size: DEFAULT_RECEIVER_BUFFER_SIZE,
            term: DEFAULT_TERM.to_string(),
            queue: QueueConfig::default(),
            host_key: HostKeyPolicy::default(),
        }
    }
}

impl MuxConfig {
    /// Create a new config for a host.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable shell mode.
    #[must_use]
    pub const fn shell_mode(mut self, shell_mode: bool) -> Self {
        self.shell_mode = shell_mode;
        self
    }

    /// Set the receiver buffer size.
    #[must_use]
    pub const fn receiver_buffer_size(mut self, size: usize) -> Self {
        self.receiver_buffer_size = size;
        self
    }

    /// Set the PTY terminal type.
    #[must_use]
    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    /// Set the chunk queue configuration.
    #[must_use]
    pub const fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set the host key policy.
    #[must_use]
    pub const fn host_key(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key = policy;
        self
    }

    /// Get the `host:port` address string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Config`] if the host is empty, the receiver buffer
    /// size is below 1, or a bounded queue has zero capacity.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(MuxError::config("host must not be empty"));
        }
        if self.receiver_buffer_size < 1 {
            return Err(MuxError::config(
                "receiver buffer size must be greater than or equal to 1",
            ));
        }
        if self.queue.capacity == Some(0) {
            return Err(MuxError::config(
                "queue capacity must be at least 1 chunk when bounded",
            ));
        }
        Ok(())
    }

    /// Load a config from a TOML string, starting from defaults.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Config`] on parse errors or invalid values.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(input)
            .map_err(|e| MuxError::config(format!("failed to parse config: {e}")))?;
        let config = Self::default().merged(raw);
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Config`] if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MuxError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Apply `SSH_MUX_*` environment overrides on top of this config.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Config`] if a set variable fails to parse, or if
    /// the resulting config is invalid.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_env_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Variable names are `SSH_MUX_` plus the upper-cased field name, e.g.
    /// `SSH_MUX_HOST`, `SSH_MUX_PORT`, `SSH_MUX_TIMEOUT_SECS`,
    /// `SSH_MUX_SHELL_MODE`, `SSH_MUX_RECEIVER_BUFFER_SIZE`, `SSH_MUX_TERM`,
    /// `SSH_MUX_QUEUE_CAPACITY` (`unbounded` disables the bound),
    /// `SSH_MUX_QUEUE_OVERFLOW` (`block` or `drop-oldest`).
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Config`] if a set variable fails to parse, or if
    /// the resulting config is invalid.
    pub fn with_env_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}_{name}"));

        if let Some(host) = var("HOST") {
            self.host = host;
        }
        if let Some(port) = var("PORT") {
            self.port = parse_env("PORT", &port)?;
        }
        if let Some(secs) = var("TIMEOUT_SECS") {
            self.timeout = Duration::from_secs(parse_env("TIMEOUT_SECS", &secs)?);
        }
        if let Some(flag) = var("SHELL_MODE") {
            self.shell_mode = parse_env_bool(&flag);
        }
        if let Some(size) = var("RECEIVER_BUFFER_SIZE") {
            self.receiver_buffer_size = parse_env("RECEIVER_BUFFER_SIZE", &size)?;
        }
        if let Some(term) = var("TERM") {
            self.term = term;
        }
        if let Some(capacity) = var("QUEUE_CAPACITY") {
            self.queue.capacity = if capacity.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(parse_env("QUEUE_CAPACITY", &capacity)?)
            };
        }
        if let Some(policy) = var("QUEUE_OVERFLOW") {
            self.queue.overflow = match policy.as_str() {
                "block" => OverflowPolicy::Block,
                "drop-oldest" => OverflowPolicy::DropOldest,
                other => {
                    return Err(MuxError::config(format!(
                        "invalid {ENV_PREFIX}_QUEUE_OVERFLOW value '{other}'"
                    )));
                }
            };
        }

        self.validate()?;
        Ok(self)
    }

    /// Overlay parsed file values onto this config.
    fn merged(mut self, raw: RawConfig) -> Self {
        if let Some(host) = raw.host {
            self.host = host;
        }
        if let Some(port) = raw.port {
            self.port = port;
        }
        if let Some(secs) = raw.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(shell_mode) = raw.shell_mode {
            self.shell_mode = shell_mode;
        }
        if let Some(size) = raw.receiver_buffer_size {
            self.receiver_buffer_size = size;
        }
        if let Some(term) = raw.term {
            self.term = term;
        }
        if raw.queue_unbounded == Some(true) {
            self.queue.capacity = None;
        } else if let Some(capacity) = raw.queue_capacity {
            self.queue.capacity = Some(capacity);
        }
        if let Some(overflow) = raw.queue_overflow {
            self.queue.overflow = overflow;
        }
        if let Some(host_key) = raw.host_key {
            self.host_key = host_key;
        }
        self
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        MuxError::config(format!(
            "invalid {ENV_PREFIX}_{name} value '{value}'"
        ))
    })
}

fn parse_env_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// File representation of [`MuxConfig`]; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    host: Option<String>,
    port: Option<u16>,
    timeout_secs: Option<u64>,
    shell_mode: Option<bool>,
    receiver_buffer_size: Option<usize>,
    term: Option<String>,
    queue_capacity: Option<usize>,
    queue_unbounded: Option<bool>,
    queue_overflow: Option<OverflowPolicy>,
    host_key: Option<HostKeyPolicy>,
}

/// Immutable per-request connection value.
///
/// Built fresh for every send from the connector defaults plus the per-call
/// credentials, and handed to the registry to key and open sessions.
#[derive(Clone)]
pub struct ConnectionDetails {
    /// Multiplexing key: at most one live session per identity.
    pub identity: String,
    /// Username for remote authentication.
    pub username: String,
    /// Password for remote authentication.
    pub password: String,
    /// Target host.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Connect deadline.
    pub timeout: Duration,
    /// Whether to allocate a PTY and start a shell.
    pub shell_mode: bool,
    /// Producer read granularity in bytes.
    pub receiver_buffer_size: usize,
    /// Terminal type for shell-mode PTYs.
    pub term: String,
    /// Chunk queue configuration for the session.
    pub queue: QueueConfig,
    /// Sink that receives the session's output and error notifications.
    pub sink: Arc<dyn CallbackSink>,
}

impl ConnectionDetails {
    /// Build details from connector defaults and per-call credentials.
    #[must_use]
    pub fn new(
        config: &MuxConfig,
        sink: Arc<dyn CallbackSink>,
        identity: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            username: username.into(),
            password: password.into(),
            host: config.host.clone(),
            port: config.port,
            timeout: config.timeout,
            shell_mode: config.shell_mode,
            receiver_buffer_size: config.receiver_buffer_size,
            term: config.term.clone(),
            queue: config.queue.clone(),
            sink,
        }
    }

    /// Get the `host:port` address string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDetails")
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("shell_mode", &self.shell_mode)
            .field("receiver_buffer_size", &self.receiver_buffer_size)
            .field("term", &self.term)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
