use std::net::SocketAddr;
use std::time::Duration;

use crate::settings::{SelectionMode, Settings, SettingsError, MAX_SERVERS};
use crate::timer::{TimerEvent, TimerId, Timers};

/// One configured name server and its health state.
#[derive(Debug)]
pub struct ServerInfo {
    address: SocketAddr,
    priority: u8,

    /// Consecutive no-response count.  Reset to zero whenever any
    /// response from this server is matched to a query, so e.g. with
    /// queries A, B, C, D: A no response, count=1; B no response,
    /// count=2; C response, count=0; D no response, count=1.
    no_rsp_count: u8,

    /// Non-`None` while the server is quarantined.
    quarantine_timer: Option<TimerId>,
}

impl ServerInfo {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantine_timer.is_some()
    }
}

/// The configured servers sorted ascending by priority, plus the
/// selection state.
#[derive(Debug)]
pub struct ServerPool {
    servers: Vec<ServerInfo>,
    mode: SelectionMode,

    /// Next starting index for round-robin selection.
    cursor: usize,

    quarantine_threshold: u8,
    quarantine: Duration,
}

impl ServerPool {
    pub fn new(settings: &Settings) -> Result<Self, SettingsError> {
        if settings.servers.is_empty() {
            return Err(SettingsError::NoServers);
        }
        if settings.servers.len() > MAX_SERVERS {
            return Err(SettingsError::TooManyServers {
                count: settings.servers.len(),
            });
        }

        let mut servers = Vec::with_capacity(settings.servers.len());
        for server in &settings.servers {
            let ip = server.ip.parse::<std::net::IpAddr>().map_err(|source| {
                SettingsError::InvalidServerAddress {
                    ip: server.ip.clone(),
                    source,
                }
            })?;
            servers.push(ServerInfo {
                address: SocketAddr::new(ip, server.port),
                priority: server.priority,
                no_rsp_count: 0,
                quarantine_timer: None,
            });
        }
        servers.sort_by_key(|server| server.priority);

        Ok(Self {
            servers,
            mode: settings.mode,
            cursor: 0,
            quarantine_threshold: settings.quarantine_threshold,
            quarantine: Duration::from_millis(settings.quarantine_ms),
        })
    }

    pub fn address(&self, index: usize) -> SocketAddr {
        self.servers[index].address
    }

    pub fn server(&self, index: usize) -> &ServerInfo {
        &self.servers[index]
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Select a server for a send, skipping quarantined servers and
    /// the excluded index (the server a retried query was already
    /// bound to).  Returns the index into the pool, or `None` if
    /// nothing usable is left.
    pub fn pick(&mut self, exclude: Option<usize>) -> Option<usize> {
        match self.mode {
            SelectionMode::Priority => (0..self.servers.len()).find(|i| self.usable(*i, exclude)),
            SelectionMode::RoundRobin => {
                let start = self.cursor % self.servers.len();
                self.cursor = self.cursor.wrapping_add(1);
                (start..self.servers.len())
                    .chain(0..start)
                    .find(|i| self.usable(*i, exclude))
            }
        }
    }

    fn usable(&self, index: usize, exclude: Option<usize>) -> bool {
        !self.servers[index].is_quarantined() && Some(index) != exclude
    }

    /// A wait-for-response timer fired for a query bound to this
    /// server.  Crossing the threshold arms the quarantine timer;
    /// while quarantined the count is left alone.
    pub fn note_no_response<M: Timers>(&mut self, index: usize, timers: &mut M) {
        let server = &mut self.servers[index];
        if server.quarantine_timer.is_some() {
            return;
        }

        server.no_rsp_count = server.no_rsp_count.saturating_add(1);
        if server.no_rsp_count > self.quarantine_threshold {
            let timer = timers.start(self.quarantine, TimerEvent::Quarantine(index));
            server.quarantine_timer = Some(timer);
            tracing::warn!(
                peer = %server.address,
                count = server.no_rsp_count,
                "quarantining unresponsive server"
            );
        }
    }

    /// A response from this server was matched to a query.
    pub fn note_response(&mut self, index: usize) {
        self.servers[index].no_rsp_count = 0;
    }

    /// The quarantine timer fired: the server rejoins the healthy set
    /// with a clean slate.  Ignored if the id does not match the
    /// armed timer.
    pub fn quarantine_expired(&mut self, index: usize, timer: TimerId) {
        let server = &mut self.servers[index];
        if server.quarantine_timer != Some(timer) {
            tracing::warn!(
                peer = %server.address,
                timer,
                "stale quarantine timer, ignoring"
            );
            return;
        }

        server.quarantine_timer = None;
        server.no_rsp_count = 0;
        tracing::info!(peer = %server.address, "server released from quarantine");
    }
}
