use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::fmt;

/// Maximum number of configured name servers.
pub const MAX_SERVERS: usize = 3;

/// Resolver configuration, as produced by the external configuration
/// loader.  Every tunable has a default so a minimal file only needs
/// the server list.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct Settings {
    /// Name servers to query, at most [`MAX_SERVERS`].
    pub servers: Vec<ServerSetting>,

    /// How a server is chosen for a new query.
    #[serde(default)]
    pub mode: SelectionMode,

    /// Bucket count for the answer cache.
    #[serde(default = "default_rr_hash_size")]
    pub rr_hash_size: usize,

    /// Bucket count for the in-flight query table.
    #[serde(default = "default_q_hash_size")]
    pub q_hash_size: usize,

    /// How long to wait for a response before retrying or giving up,
    /// in milliseconds.
    #[serde(default = "default_wait_response_ms")]
    pub wait_response_ms: u64,

    /// How long an unresponsive server is excluded from selection,
    /// in milliseconds.
    #[serde(default = "default_quarantine_ms")]
    pub quarantine_ms: u64,

    /// Consecutive no-response count a server may accumulate before
    /// it is quarantined.
    #[serde(default = "default_quarantine_threshold")]
    pub quarantine_threshold: u8,

    /// How many servers a single query may be sent to before it fails
    /// with no-response.
    #[serde(default = "default_max_servers_per_query")]
    pub max_servers_per_query: u8,
}

impl Settings {
    pub fn new(filename: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(filename))
            .build()?
            .try_deserialize()
    }
}

/// One configured name server.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct ServerSetting {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub priority: u8,
}

/// How a server is chosen for a new query: lowest healthy priority,
/// or cycling through the healthy set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    #[default]
    Priority,
    RoundRobin,
}

fn default_rr_hash_size() -> usize {
    128
}

fn default_q_hash_size() -> usize {
    64
}

fn default_wait_response_ms() -> u64 {
    3000
}

fn default_quarantine_ms() -> u64 {
    300_000
}

fn default_quarantine_threshold() -> u8 {
    3
}

fn default_max_servers_per_query() -> u8 {
    2
}

/// Errors that can arise when turning a `Settings` into a running
/// resolver.
#[derive(Debug)]
pub enum SettingsError {
    /// The server list is empty.
    NoServers,

    /// The server list is longer than [`MAX_SERVERS`].
    TooManyServers { count: usize },

    /// A server's `ip` field does not parse as an IP address.
    InvalidServerAddress {
        ip: String,
        source: std::net::AddrParseError,
    },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SettingsError::NoServers => write!(f, "no name servers configured"),
            SettingsError::TooManyServers { count } => {
                write!(f, "{count} name servers configured, at most {MAX_SERVERS} allowed")
            }
            SettingsError::InvalidServerAddress { ip, .. } => {
                write!(f, "'{ip}' is not a valid server address")
            }
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::InvalidServerAddress { source, .. } => Some(source),
            _ => None,
        }
    }
}
