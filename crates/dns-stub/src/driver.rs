//! A single-task tokio host for the resolver.  The resolver core is
//! synchronous; this module owns the UDP socket and multiplexes
//! inbound datagrams, timer expirations, and caller submissions onto
//! it over one channel, which keeps every touch of the resolver's
//! state on one task.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

use dns_types::protocol::types::{QueryType, MAX_MSG_SIZE};

use crate::resolver::{DnsResponse, QueryError, Resolver};
use crate::settings::{Settings, SettingsError};
use crate::timer::{TimerEvent, TimerId, Timers};
use crate::transport::Transport;

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] reply slot mutex poisoned, cannot recover from this - aborting";

enum Command {
    Query {
        name: String,
        qtype: QueryType,
        resolve_all: bool,
        cache: bool,
        reply: oneshot::Sender<Result<DnsResponse, QueryError>>,
    },
    TimerFired {
        id: TimerId,
        event: TimerEvent,
    },
}

/// Handle to a resolver running on its own task.  Cloning is cheap;
/// all clones talk to the same resolver.
#[derive(Clone)]
pub struct ResolverHandle {
    commands: mpsc::Sender<Command>,
}

impl ResolverHandle {
    /// Submit a query and wait for its terminal result.  The
    /// callback plumbing of [`Resolver::query`] is bridged to
    /// `async` here: synchronous hits, asynchronous responses, and
    /// failure statuses all come back the same way.
    pub async fn query(
        &self,
        name: &str,
        qtype: QueryType,
        resolve_all: bool,
        cache: bool,
    ) -> Result<DnsResponse, QueryError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Query {
                name: name.to_string(),
                qtype,
                resolve_all,
                cache,
                reply,
            })
            .await
            .map_err(|_| QueryError::Closed)?;
        response.await.map_err(|_| QueryError::Closed)?
    }
}

/// Errors that can arise when starting the driver.
#[derive(Debug)]
pub enum SpawnError {
    Bind(std::io::Error),
    Settings(SettingsError),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SpawnError::Bind(error) => write!(f, "could not bind UDP socket: {error}"),
            SpawnError::Settings(error) => write!(f, "bad resolver configuration: {error}"),
        }
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpawnError::Bind(error) => Some(error),
            SpawnError::Settings(error) => Some(error),
        }
    }
}

/// Bind an ephemeral UDP socket, build a resolver from the settings,
/// and run it on a new task.
pub async fn spawn(settings: Settings) -> Result<ResolverHandle, SpawnError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .map_err(SpawnError::Bind)?;
    let socket = Arc::new(socket);

    let (commands, inbox) = mpsc::channel(32);
    let resolver = Resolver::new(
        &settings,
        UdpTransport {
            socket: socket.clone(),
        },
        TaskTimers {
            commands: commands.clone(),
            next_id: 0,
        },
    )
    .map_err(SpawnError::Settings)?;

    tokio::spawn(run(resolver, socket, inbox));

    Ok(ResolverHandle { commands })
}

async fn run(
    mut resolver: Resolver<UdpTransport, TaskTimers>,
    socket: Arc<UdpSocket>,
    mut inbox: mpsc::Receiver<Command>,
) {
    let mut buf = [0u8; MAX_MSG_SIZE];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    tracing::trace!(%peer, len, "datagram received");
                    resolver.handle_datagram(&buf[..len]);
                }
                Err(error) => {
                    tracing::warn!(%error, "udp receive failed");
                }
            },
            command = inbox.recv() => match command {
                Some(Command::Query { name, qtype, resolve_all, cache, reply }) => {
                    submit_query(&mut resolver, &name, qtype, resolve_all, cache, reply);
                }
                Some(Command::TimerFired { id, event }) => resolver.on_timer(id, event),
                // every handle is gone: nobody can submit or observe
                None => break,
            },
        }
    }

    tracing::debug!("resolver driver stopping");
}

fn submit_query(
    resolver: &mut Resolver<UdpTransport, TaskTimers>,
    name: &str,
    qtype: QueryType,
    resolve_all: bool,
    cache: bool,
    reply: oneshot::Sender<Result<DnsResponse, QueryError>>,
) {
    // the reply channel is needed in two places: the callback (for
    // synchronous and asynchronous completion) and the error path
    // below, so it goes in a shared take-once slot
    let slot = Arc::new(Mutex::new(Some(reply)));
    let callback_slot = slot.clone();
    let callback = Box::new(move |response| {
        if let Some(reply) = callback_slot.lock().expect(MUTEX_POISON_MESSAGE).take() {
            let _ = reply.send(Ok(response));
        }
    });

    if let Err(error) = resolver.query(name, qtype, resolve_all, cache, callback) {
        if let Some(reply) = slot.lock().expect(MUTEX_POISON_MESSAGE).take() {
            let _ = reply.send(Err(error));
        }
    }
}

/// Transport backed by the driver's socket.  Sends are non-blocking;
/// a kernel buffer that is somehow full counts as a refused send.
struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl Transport for UdpTransport {
    fn send(&mut self, peer: std::net::SocketAddr, payload: &[u8]) -> std::io::Result<()> {
        self.socket.try_send_to(payload, peer).map(|_| ())
    }
}

/// Timers backed by sleep tasks which post back onto the command
/// channel.  `stop` does nothing: a fired timer whose id no longer
/// matches the entry that armed it is ignored by the resolver.
struct TaskTimers {
    commands: mpsc::Sender<Command>,
    next_id: TimerId,
}

impl Timers for TaskTimers {
    fn start(&mut self, duration: Duration, event: TimerEvent) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = commands.send(Command::TimerFired { id, event }).await;
        });
        id
    }

    fn stop(&mut self, _id: TimerId) {}
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use dns_types::protocol::types::test_util::*;
    use dns_types::protocol::types::Message;

    use super::*;
    use crate::resolver::Status;
    use crate::settings::ServerSetting;
    use crate::test_util;

    fn settings_for(server: std::net::SocketAddr) -> Settings {
        let mut settings = test_util::settings(0);
        settings.servers.push(ServerSetting {
            ip: server.ip().to_string(),
            port: server.port(),
            priority: 10,
        });
        settings
    }

    #[tokio::test]
    async fn query_round_trip_over_udp() {
        let server = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server_addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_MSG_SIZE];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let query = Message::from_octets(&buf[..len]).unwrap();
            let mut response = query.make_response();
            response.answers = vec![a_record(
                "example.com",
                Ipv4Addr::new(93, 184, 216, 34),
            )];
            server
                .send_to(&response.to_octets().unwrap(), peer)
                .await
                .unwrap();
        });

        let handle = spawn(settings_for(server_addr)).await.unwrap();
        let response = handle
            .query("example.com", QueryType::A, false, true)
            .await
            .unwrap();

        assert!(response.is_no_error());
        match response {
            DnsResponse::Message(message) => assert_eq!(1, message.answers.len()),
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_servers_surface_no_response() {
        // two bound sockets that never answer, so the query times out
        // on the primary and again on the retry
        let primary = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let secondary = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();

        let mut settings = settings_for(primary.local_addr().unwrap());
        settings.servers.push(ServerSetting {
            ip: secondary.local_addr().unwrap().ip().to_string(),
            port: secondary.local_addr().unwrap().port(),
            priority: 20,
        });
        settings.wait_response_ms = 50;

        let handle = spawn(settings).await.unwrap();
        let response = handle
            .query("example.com", QueryType::A, false, false)
            .await
            .unwrap();

        assert!(matches!(response, DnsResponse::Status(Status::NoResponse)));
        drop((primary, secondary));
    }

    #[tokio::test]
    async fn silent_lone_server_surfaces_socket_status() {
        // one silent server: the wait timer fires with nowhere left
        // to retry
        let server = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut settings = settings_for(server_addr);
        settings.wait_response_ms = 50;

        let handle = spawn(settings).await.unwrap();
        let response = handle
            .query("example.com", QueryType::A, false, false)
            .await
            .unwrap();

        assert!(matches!(response, DnsResponse::Status(Status::Socket)));
        drop(server);
    }
}
