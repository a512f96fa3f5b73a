//! Shared helpers for the unit tests: deterministic stand-ins for
//! the transport and timer seams, plus callback recorders.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::resolver::{DnsResponse, QueryCallback};
use crate::settings::{SelectionMode, ServerSetting, Settings};
use crate::timer::{TimerEvent, TimerId, Timers};
use crate::transport::Transport;

/// A `Settings` with `server_count` servers at 127.0.0.1.., 127.0.0.2..,
/// priorities 10, 20, 30, ..., and the stock defaults otherwise.
pub fn settings(server_count: usize) -> Settings {
    let mut servers = Vec::with_capacity(server_count);
    for i in 0..server_count {
        servers.push(ServerSetting {
            ip: format!("127.0.0.{}", i + 1),
            port: 53,
            priority: (i as u8 + 1) * 10,
        });
    }
    Settings {
        servers,
        mode: SelectionMode::Priority,
        rr_hash_size: 16,
        q_hash_size: 16,
        wait_response_ms: 3000,
        quarantine_ms: 300_000,
        quarantine_threshold: 3,
        max_servers_per_query: 2,
    }
}

/// A transport that records every datagram instead of sending it.
/// Cloning shares the record, so a test can keep one handle and give
/// the resolver the other.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    sent: Vec<(SocketAddr, Vec<u8>)>,
    fail: bool,
}

impl MockTransport {
    pub fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.inner.lock().unwrap().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.inner.lock().unwrap().sent.len()
    }

    pub fn set_fail(&self, fail: bool) {
        self.inner.lock().unwrap().fail = fail;
    }
}

impl Transport for MockTransport {
    fn send(&mut self, peer: SocketAddr, payload: &[u8]) -> std::io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "send refused",
            ));
        }
        inner.sent.push((peer, payload.to_vec()));
        Ok(())
    }
}

/// A timer service that records what was armed and leaves firing to
/// the test, which picks an entry from `armed()` and hands it to
/// `Resolver::on_timer`.
#[derive(Clone, Default)]
pub struct MockTimers {
    inner: Arc<Mutex<MockTimersInner>>,
}

#[derive(Default)]
struct MockTimersInner {
    next_id: TimerId,
    armed: Vec<(TimerId, Duration, TimerEvent)>,
    stopped: Vec<TimerId>,
}

impl MockTimers {
    /// Timers started and not stopped, in arming order.
    pub fn armed(&self) -> Vec<(TimerId, Duration, TimerEvent)> {
        let inner = self.inner.lock().unwrap();
        inner
            .armed
            .iter()
            .filter(|(id, _, _)| !inner.stopped.contains(id))
            .cloned()
            .collect()
    }

    pub fn stopped(&self) -> Vec<TimerId> {
        self.inner.lock().unwrap().stopped.clone()
    }

    /// The most recently armed live timer.
    pub fn last_armed(&self) -> (TimerId, Duration, TimerEvent) {
        self.armed().pop().expect("no live timer armed")
    }
}

impl Timers for MockTimers {
    fn start(&mut self, duration: Duration, event: TimerEvent) -> TimerId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.armed.push((id, duration, event));
        id
    }

    fn stop(&mut self, id: TimerId) {
        self.inner.lock().unwrap().stopped.push(id);
    }
}

/// A callback that appends everything it sees to a shared log.
pub fn recorder() -> (QueryCallback, Arc<Mutex<Vec<DnsResponse>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let inner = seen.clone();
    (
        Box::new(move |response| inner.lock().unwrap().push(response)),
        seen,
    )
}

/// A callback that appends `(tag, response)` to a shared log, for
/// asserting delivery order across several callers.
pub fn tagged_recorder(
    tag: &'static str,
    log: &Arc<Mutex<Vec<(&'static str, DnsResponse)>>>,
) -> QueryCallback {
    let log = log.clone();
    Box::new(move |response| log.lock().unwrap().push((tag, response)))
}
