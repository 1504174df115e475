use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use wirecall_core::config::{CodecLimits, Configuration};
use wirecall_core::error::{Result, WireError};
use wirecall_core::protocol::ProtocolKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    pub version: u32,

    #[serde(default)]
    pub limits: LimitsSection,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub client: ClientSection,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(WireError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.limits.configuration()?;
        self.server.validate()?;
        self.client.validate()?;

        Ok(())
    }
}

// --------------------
// Limits
// --------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsSection {
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,

    #[serde(default)]
    pub string_limit: Option<usize>,

    #[serde(default)]
    pub container_limit: Option<usize>,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_frame_size: default_max_frame_size(),
            recursion_limit: default_recursion_limit(),
            string_limit: None,
            container_limit: None,
        }
    }
}

impl LimitsSection {
    /// Transport-level limits, validated.
    pub fn configuration(&self) -> Result<Configuration> {
        Configuration::builder()
            .max_message_size(self.max_message_size)
            .max_frame_size(self.max_frame_size)
            .recursion_limit(self.recursion_limit)
            .build()
    }

    pub fn codec_limits(&self) -> CodecLimits {
        CodecLimits::new(self.string_limit, self.container_limit)
    }
}

fn default_max_message_size() -> usize {
    wirecall_core::config::DEFAULT_MAX_MESSAGE_SIZE
}
fn default_max_frame_size() -> usize {
    wirecall_core::config::DEFAULT_MAX_FRAME_SIZE
}
fn default_recursion_limit() -> usize {
    wirecall_core::config::DEFAULT_RECURSION_LIMIT
}

// --------------------
// Server
// --------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolName {
    Binary,
    Compact,
    Json,
}

impl ProtocolName {
    pub fn kind(self) -> ProtocolKind {
        match self {
            ProtocolName::Binary => ProtocolKind::Binary,
            ProtocolName::Compact => ProtocolKind::Compact,
            ProtocolName::Json => ProtocolKind::Json,
        }
    }
}

/// How messages are delimited on a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// 4-byte big-endian length prefix per message.
    Framed,
    /// Raw byte stream; message ends are found by decoding.
    Buffered,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Optional HTTP endpoint (`POST /rpc`, `/metrics`, `/healthz`).
    #[serde(default)]
    pub http_listen: Option<String>,

    #[serde(default = "default_protocol")]
    pub protocol: ProtocolName,

    #[serde(default = "default_transport")]
    pub transport: TransportMode,

    /// Close the connection after replying PROTOCOL_ERROR to undecodable
    /// arguments.
    #[serde(default = "default_true")]
    pub close_on_protocol_error: bool,

    /// Propagate unexpected handler failures instead of replying
    /// INTERNAL_ERROR.
    #[serde(default)]
    pub rethrow_unhandled: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            http_listen: None,
            protocol: default_protocol(),
            transport: default_transport(),
            close_on_protocol_error: true,
            rethrow_unhandled: false,
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.http_listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_addr("server.listen", &self.listen)
    }

    pub fn http_listen_addr(&self) -> Result<Option<SocketAddr>> {
        self.http_listen
            .as_deref()
            .map(|s| parse_addr("server.http_listen", s))
            .transpose()
    }
}

fn parse_addr(field: &str, s: &str) -> Result<SocketAddr> {
    s.parse()
        .map_err(|_| WireError::Config(format!("{field} must be a valid SocketAddr: {s}")))
}

fn default_listen() -> String {
    "0.0.0.0:9090".into()
}
fn default_protocol() -> ProtocolName {
    ProtocolName::Binary
}
fn default_transport() -> TransportMode {
    TransportMode::Framed
}
fn default_true() -> bool {
    true
}

// --------------------
// Async client
// --------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    /// Per-call timeout; `0` disables it.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ClientSection {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms > 600_000 {
            return Err(WireError::Config(
                "client.timeout_ms must be at most 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}
