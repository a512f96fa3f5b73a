use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dns_types::protocol::deserialise::Error as DecodeError;
use dns_types::protocol::serialise::WritableBuffer;
use dns_types::protocol::types::*;

use crate::cache::{CacheEntry, QueryKey, Table};
use crate::pool::ServerPool;
use crate::settings::{Settings, SettingsError};
use crate::timer::{TimerEvent, TimerId, Timers};
use crate::transport::Transport;
use crate::walker::Walk;

/// What a caller receives: a single response, the aggregated
/// responses of a resolve-all walk, or a failure status.
#[derive(Debug, Clone)]
pub enum DnsResponse {
    Message(Arc<Message>),
    MessageList(Vec<Arc<Message>>),
    Status(Status),
}

impl DnsResponse {
    /// Whether this is a successful response with RCODE NOERROR
    /// throughout.  Callers get responses with other RCODEs delivered
    /// as `Message` payloads and are expected to check.
    pub fn is_no_error(&self) -> bool {
        match self {
            DnsResponse::Message(message) => message.header.rcode == Rcode::NoError,
            DnsResponse::MessageList(messages) => messages
                .iter()
                .all(|message| message.header.rcode == Rcode::NoError),
            DnsResponse::Status(_) => false,
        }
    }
}

/// Failure status surfaced to callers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Status {
    /// The wait-for-response timer fired with no retry left, or the
    /// one resend was refused by the transport.
    NoResponse,

    /// No server was available: every other configured server is
    /// quarantined.  On submission this surfaces synchronously as
    /// [`QueryError::NoServer`]; this status is the same condition
    /// arising while a query is being retried.
    Socket,

    /// A follow-up query in a resolve-all walk failed.
    Recursive,

    /// The server rejected the query as malformed.
    Other,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::NoResponse => write!(f, "no-response"),
            Status::Socket => write!(f, "socket"),
            Status::Recursive => write!(f, "recursive"),
            Status::Other => write!(f, "other"),
        }
    }
}

/// How a caller is notified.  The opaque application context of the
/// original interface is whatever the closure captures.
pub type QueryCallback = Box<dyn FnOnce(DnsResponse) + Send>;

/// Result of a successfully submitted query.
#[derive(Debug)]
pub enum QueryOutcome {
    /// Answered synchronously; the callback has already run and the
    /// same response is returned here.
    Done(DnsResponse),

    /// In flight; the callback runs when the query completes.
    Ongoing,
}

/// Errors returned synchronously from [`Resolver::query`].
#[derive(Debug)]
pub enum QueryError {
    /// The name cannot be encoded as a query: a label over 63 octets,
    /// the whole name over 125 octets, or malformed.
    EncodeTooLong { name: String },

    /// Only A, SRV, and NAPTR queries can be issued.
    UnsupportedQueryType(QueryType),

    /// Every configured server is quarantined.
    NoServer,

    /// The transport refused the datagram.
    Transport(std::io::Error),

    /// The driver loop is gone.
    Closed,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryError::EncodeTooLong { name } => {
                write!(f, "'{name}' cannot be encoded as a query name")
            }
            QueryError::UnsupportedQueryType(qtype) => {
                write!(f, "cannot query for records of type {qtype}")
            }
            QueryError::NoServer => write!(f, "no name server available"),
            QueryError::Transport(error) => write!(f, "could not send query: {error}"),
            QueryError::Closed => write!(f, "resolver driver has shut down"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Transport(error) => Some(error),
            _ => None,
        }
    }
}

/// Who is waiting on an in-flight query: an application callback, or
/// a resolve-all walk identified by id.
pub(crate) enum Caller {
    App(QueryCallback),
    Walk(u64),
}

/// An in-flight query.  Owned by the query table; on delivery it is
/// removed and released once every caller has been notified.
pub(crate) struct QueryEntry {
    /// The encoded question, kept so a retry sends the identical
    /// bytes (transaction id included) to the alternate server.
    question: Bytes,

    txid: u16,

    /// Index into the pool of the server currently queried.
    server: usize,

    /// How many servers this query has been sent to and given up on.
    servers_tried: u8,

    /// Wait-for-response timer; armed exactly while a datagram is
    /// outstanding.
    timer: Option<TimerId>,

    /// Sticky: set if any of the waiting callers asked for the answer
    /// to be cached.
    cache_on_success: bool,

    /// Waiting callers, notified in registration order.
    callers: Vec<Caller>,
}

/// What gets fanned out to the callers of one query.
pub(crate) enum ChildOutcome {
    Message(Arc<Message>),
    Status(Status),
}

impl ChildOutcome {
    fn to_response(&self) -> DnsResponse {
        match self {
            ChildOutcome::Message(message) => DnsResponse::Message(message.clone()),
            ChildOutcome::Status(status) => DnsResponse::Status(*status),
        }
    }
}

/// Result of submitting a single query internally.
pub(crate) enum Submit {
    /// Answered from the record cache.
    Hit(Arc<Message>),

    /// A datagram is (or already was) outstanding for this key.
    Ongoing,
}

/// A client-side stub resolver: issues A, SRV, and NAPTR queries over
/// UDP, deduplicates concurrent requests for the same name and type,
/// caches positive answers for their TTL, fails over between
/// configured servers, and optionally walks NAPTR/SRV/A chains to
/// completion.
///
/// One instance owns all its state and must only be driven from a
/// single thread of control: the public methods take `&mut self`, and
/// callbacks never re-enter the resolver.
pub struct Resolver<T, M> {
    pub(crate) transport: T,
    pub(crate) timers: M,

    wait_response: Duration,
    max_servers_per_query: u8,

    pub(crate) pool: ServerPool,

    /// In-flight queries; at most one entry per key.
    pub(crate) queries: Table<QueryEntry>,

    /// Cached positive answers.
    pub(crate) records: Table<CacheEntry>,

    /// Live resolve-all walks.
    pub(crate) walks: HashMap<u64, Walk>,

    next_txid: u16,
    next_walk: u64,
}

impl<T: Transport, M: Timers> Resolver<T, M> {
    pub fn new(settings: &Settings, transport: T, timers: M) -> Result<Self, SettingsError> {
        let pool = ServerPool::new(settings)?;
        Ok(Self {
            transport,
            timers,
            wait_response: Duration::from_millis(settings.wait_response_ms),
            max_servers_per_query: settings.max_servers_per_query,
            pool,
            queries: Table::with_bucket_count(settings.q_hash_size),
            records: Table::with_bucket_count(settings.rr_hash_size),
            walks: HashMap::new(),
            next_txid: 0,
            next_walk: 0,
        })
    }

    /// Submit a query.
    ///
    /// With `cache` set, the record cache is consulted first and a
    /// positive answer is cached for its TTL.  With `resolve_all` set
    /// and an SRV or NAPTR query type, the response tree is walked
    /// down to address records and the callback receives the whole
    /// expansion at once.
    ///
    /// On a synchronous answer the callback runs before this returns,
    /// and the same response comes back in [`QueryOutcome::Done`].
    /// Otherwise the callback runs when the response arrives or the
    /// query times out.
    ///
    /// # Errors
    ///
    /// See [`QueryError`].  On error the callback never runs.
    pub fn query(
        &mut self,
        name: &str,
        qtype: QueryType,
        resolve_all: bool,
        cache: bool,
        callback: QueryCallback,
    ) -> Result<QueryOutcome, QueryError> {
        let Some(name) = DomainName::from_dotted_string(name) else {
            return Err(QueryError::EncodeTooLong {
                name: name.to_string(),
            });
        };
        if qtype.is_unknown() {
            return Err(QueryError::UnsupportedQueryType(qtype));
        }

        if resolve_all && matches!(qtype, QueryType::SRV | QueryType::NAPTR) {
            self.query_resolve_all(name, qtype, cache, callback)
        } else {
            match self.submit(name, qtype, cache, Caller::App(callback))? {
                Submit::Hit(message) => Ok(QueryOutcome::Done(DnsResponse::Message(message))),
                Submit::Ongoing => Ok(QueryOutcome::Ongoing),
            }
        }
    }

    /// Submit one query on behalf of a caller: cache probe, then
    /// dedup against the in-flight table, then a fresh datagram.
    pub(crate) fn submit(
        &mut self,
        name: DomainName,
        qtype: QueryType,
        cache: bool,
        caller: Caller,
    ) -> Result<Submit, QueryError> {
        let key = (name, qtype);

        if cache {
            if let Some(entry) = self.records.lookup(&key) {
                tracing::debug!(name = %key.0, qtype = %key.1, "answering from record cache");
                let message = entry.message.clone();
                if let Caller::App(callback) = caller {
                    callback(DnsResponse::Message(message.clone()));
                }
                return Ok(Submit::Hit(message));
            }
        }

        if let Some(entry) = self.queries.lookup_mut(&key) {
            if cache {
                entry.cache_on_success = true;
            }
            entry.callers.push(caller);
            tracing::debug!(
                name = %key.0,
                qtype = %key.1,
                callers = entry.callers.len(),
                "joining in-flight query"
            );
            return Ok(Submit::Ongoing);
        }

        let txid = self.next_txid();
        let question = encode_question(txid, &key.0, key.1);

        let Some(server) = self.pool.pick(None) else {
            tracing::warn!(name = %key.0, qtype = %key.1, "no name server available");
            return Err(QueryError::NoServer);
        };
        let peer = self.pool.address(server);
        self.transport
            .send(peer, &question)
            .map_err(QueryError::Transport)?;
        let timer = self
            .timers
            .start(self.wait_response, TimerEvent::QueryTimeout(key.clone()));
        tracing::debug!(name = %key.0, qtype = %key.1, txid, %peer, "sent query");

        self.queries.insert(
            key,
            QueryEntry {
                question,
                txid,
                server,
                servers_tried: 0,
                timer: Some(timer),
                cache_on_success: cache,
                callers: vec![caller],
            },
        );

        Ok(Submit::Ongoing)
    }

    /// Feed an inbound datagram to the dispatcher.  Undecodable input
    /// is dropped; the matching query, if any, then times out
    /// naturally.
    pub fn handle_datagram(&mut self, datagram: &[u8]) {
        let message = match Message::from_octets(datagram) {
            Ok(message) => message,
            Err(DecodeError::ServerRejected { id, question }) => {
                tracing::info!(id, %question, "server rejected query as malformed");
                let key = (question.name, question.qtype);
                if let Some(entry) = self.queries.remove(&key) {
                    if let Some(timer) = entry.timer {
                        self.timers.stop(timer);
                    }
                    self.pool.note_response(entry.server);
                    self.fan_out(entry.callers, &ChildOutcome::Status(Status::Other));
                }
                return;
            }
            Err(error) => {
                tracing::debug!(%error, "dropping undecodable datagram");
                return;
            }
        };

        if !message.header.is_response {
            tracing::debug!(id = message.header.id, "dropping DNS request");
            return;
        }

        let key = (message.question.name.clone(), message.question.qtype);
        let Some(entry) = self.queries.remove(&key) else {
            tracing::debug!(name = %key.0, qtype = %key.1, "dropping unmatched response");
            return;
        };

        if let Some(timer) = entry.timer {
            self.timers.stop(timer);
        }
        self.pool.note_response(entry.server);

        tracing::debug!(
            name = %key.0,
            qtype = %key.1,
            txid = entry.txid,
            rcode = %message.header.rcode,
            answers = message.answers.len(),
            "delivering response"
        );

        let message = Arc::new(message);
        let cacheable = entry.cache_on_success && message.header.rcode == Rcode::NoError;

        self.fan_out(entry.callers, &ChildOutcome::Message(message.clone()));

        if cacheable {
            self.cache_response(key, message);
        }
    }

    /// A timer expiration, delivered by the host with the event the
    /// timer was armed with.
    pub fn on_timer(&mut self, id: TimerId, event: TimerEvent) {
        match event {
            TimerEvent::QueryTimeout(key) => self.on_query_timeout(id, key),
            TimerEvent::CacheExpiry(key) => self.on_cache_expiry(id, key),
            TimerEvent::Quarantine(index) => self.pool.quarantine_expired(index, id),
        }
    }

    fn on_query_timeout(&mut self, id: TimerId, key: QueryKey) {
        let (prev_server, servers_tried, question) = match self.queries.lookup_mut(&key) {
            None => {
                tracing::debug!(name = %key.0, qtype = %key.1, "timeout for completed query");
                return;
            }
            Some(entry) => {
                if entry.timer != Some(id) {
                    tracing::warn!(name = %key.0, qtype = %key.1, id, "stale query timer, ignoring");
                    return;
                }
                entry.timer = None;
                entry.servers_tried += 1;
                (entry.server, entry.servers_tried, entry.question.clone())
            }
        };

        self.pool.note_no_response(prev_server, &mut self.timers);

        if servers_tried < self.max_servers_per_query {
            if let Some(next) = self.pool.pick(Some(prev_server)) {
                let peer = self.pool.address(next);
                match self.transport.send(peer, &question) {
                    Ok(()) => {
                        let timer = self
                            .timers
                            .start(self.wait_response, TimerEvent::QueryTimeout(key.clone()));
                        if let Some(entry) = self.queries.lookup_mut(&key) {
                            entry.server = next;
                            entry.timer = Some(timer);
                        }
                        tracing::info!(name = %key.0, qtype = %key.1, %peer, "retrying on alternate server");
                        return;
                    }
                    Err(error) => {
                        // the retry is spent; fails over to the
                        // no-response delivery below
                        tracing::warn!(name = %key.0, qtype = %key.1, %peer, %error, "resend failed");
                    }
                }
            } else {
                // retries left, but no other server to send to: the
                // no-server condition, arising mid-query
                tracing::warn!(name = %key.0, qtype = %key.1, "no alternate server for retry");
                let Some(entry) = self.queries.remove(&key) else {
                    return;
                };
                self.fan_out(entry.callers, &ChildOutcome::Status(Status::Socket));
                return;
            }
        }

        let Some(entry) = self.queries.remove(&key) else {
            return;
        };
        tracing::info!(name = %key.0, qtype = %key.1, "query got no response");
        self.fan_out(entry.callers, &ChildOutcome::Status(Status::NoResponse));
    }

    fn on_cache_expiry(&mut self, id: TimerId, key: QueryKey) {
        let expired = match self.records.lookup(&key) {
            Some(entry) if entry.ttl_timer == id => true,
            Some(_) => {
                tracing::warn!(name = %key.0, qtype = %key.1, id, "stale TTL timer, ignoring");
                false
            }
            None => false,
        };

        if expired {
            self.records.remove(&key);
            tracing::debug!(name = %key.0, qtype = %key.1, "cached answer expired");
        }
    }

    /// Notify every caller of one query, in registration order.
    /// Walks are advanced in place, which may submit follow-up
    /// queries.
    pub(crate) fn fan_out(&mut self, callers: Vec<Caller>, outcome: &ChildOutcome) {
        for caller in callers {
            match caller {
                Caller::App(callback) => callback(outcome.to_response()),
                Caller::Walk(walk) => match outcome {
                    ChildOutcome::Message(message) => {
                        self.walk_child_response(walk, message.clone());
                    }
                    ChildOutcome::Status(status) => {
                        self.walk_child_failure(walk, *status);
                    }
                },
            }
        }
    }

    fn cache_response(&mut self, key: QueryKey, message: Arc<Message>) {
        let Some(ttl) = cache_ttl(&message) else {
            tracing::debug!(name = %key.0, qtype = %key.1, "not caching zero-ttl answer");
            return;
        };

        let timer = self.timers.start(
            Duration::from_secs(u64::from(ttl)),
            TimerEvent::CacheExpiry(key.clone()),
        );
        tracing::debug!(name = %key.0, qtype = %key.1, ttl, "caching answer");

        if let Some(old) = self.records.insert(key, CacheEntry {
            message,
            ttl_timer: timer,
        }) {
            self.timers.stop(old.ttl_timer);
        }
    }

    pub(crate) fn next_walk_id(&mut self) -> u64 {
        let id = self.next_walk;
        self.next_walk += 1;
        id
    }

    fn next_txid(&mut self) -> u16 {
        let id = self.next_txid;
        self.next_txid = self.next_txid.wrapping_add(1);
        id
    }
}

/// The cache lifetime of a positive answer: the smallest TTL in the
/// answer section.  `None` if there is nothing cacheable (no answers,
/// or a zero TTL).
fn cache_ttl(message: &Message) -> Option<u32> {
    message
        .answers
        .iter()
        .map(|rr| rr.ttl)
        .min()
        .filter(|ttl| *ttl > 0)
}

/// Encode an outgoing question: header with a fresh transaction id
/// and only RD set, qdcount 1, the name as length-prefixed labels,
/// qtype, and class IN.
fn encode_question(txid: u16, name: &DomainName, qtype: QueryType) -> Bytes {
    let mut buffer = WritableBuffer::default();
    Header {
        id: txid,
        is_response: false,
        opcode: Opcode::Standard,
        is_authoritative: false,
        is_truncated: false,
        recursion_desired: true,
        recursion_available: false,
        rcode: Rcode::NoError,
    }
    .serialise(&mut buffer);
    buffer.write_u16(1);
    buffer.write_u16(0);
    buffer.write_u16(0);
    buffer.write_u16(0);
    Question {
        name: name.clone(),
        qtype,
        qclass: QueryClass::IN,
    }
    .serialise(&mut buffer);
    buffer.octets.freeze()
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    use dns_types::protocol::types::test_util::*;

    use super::*;
    use crate::test_util::*;

    fn resolver(server_count: usize) -> (Resolver<MockTransport, MockTimers>, MockTransport, MockTimers) {
        let transport = MockTransport::default();
        let timers = MockTimers::default();
        let resolver = Resolver::new(&settings(server_count), transport.clone(), timers.clone())
            .unwrap();
        (resolver, transport, timers)
    }

    fn inject(resolver: &mut Resolver<MockTransport, MockTimers>, message: &Message) {
        resolver.handle_datagram(&message.to_octets().unwrap());
    }

    fn fire_query_timeout(resolver: &mut Resolver<MockTransport, MockTimers>, timers: &MockTimers) {
        let (id, _, event) = timers
            .armed()
            .into_iter()
            .rev()
            .find(|(_, _, event)| matches!(event, TimerEvent::QueryTimeout(_)))
            .expect("no query timeout armed");
        resolver.on_timer(id, event);
    }

    #[test]
    fn encode_question_matches_message_serialisation() {
        let name = domain("mtas.ims.example.com");
        for qtype in [QueryType::A, QueryType::SRV, QueryType::NAPTR] {
            assert_eq!(
                Message::query(77, name.clone(), qtype).to_octets().unwrap().freeze(),
                encode_question(77, &name, qtype)
            );
        }
    }

    #[test]
    fn query_sends_one_datagram_and_arms_timer() {
        let (mut resolver, transport, timers) = resolver(1);
        let (callback, seen) = recorder();

        let outcome = resolver
            .query("example.com", QueryType::A, false, false, callback)
            .unwrap();

        assert!(matches!(outcome, QueryOutcome::Ongoing));
        assert_eq!(1, transport.sent_count());
        assert_eq!("127.0.0.1:53", transport.sent()[0].0.to_string());

        let (_, duration, event) = timers.last_armed();
        assert_eq!(Duration::from_millis(3000), duration);
        assert_eq!(
            TimerEvent::QueryTimeout((domain("example.com"), QueryType::A)),
            event
        );

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn query_rejects_bad_names_and_types() {
        let (mut resolver, transport, _) = resolver(1);

        let (callback, _) = recorder();
        let overlong = "x".repeat(64);
        assert!(matches!(
            resolver.query(&overlong, QueryType::A, false, false, callback),
            Err(QueryError::EncodeTooLong { .. })
        ));

        let (callback, _) = recorder();
        assert!(matches!(
            resolver.query("example.com", QueryType::from(16), false, false, callback),
            Err(QueryError::UnsupportedQueryType(_))
        ));

        assert_eq!(0, transport.sent_count());
    }

    #[test]
    fn query_fails_when_transport_refuses() {
        let (mut resolver, transport, _) = resolver(1);
        transport.set_fail(true);

        let (callback, seen) = recorder();
        assert!(matches!(
            resolver.query("example.com", QueryType::A, false, false, callback),
            Err(QueryError::Transport(_))
        ));
        assert!(seen.lock().unwrap().is_empty());
        assert!(resolver.queries.is_empty());
    }

    // scenario: A hit cached
    #[test]
    fn positive_response_is_cached_and_answers_synchronously() {
        let (mut resolver, transport, timers) = resolver(1);

        let (callback, seen) = recorder();
        resolver
            .query("example.com", QueryType::A, false, true, callback)
            .unwrap();
        assert_eq!(1, transport.sent_count());

        let answer = a_record("example.com", Ipv4Addr::new(93, 184, 216, 34));
        inject(
            &mut resolver,
            &response("example.com", QueryType::A, &[answer], &[], &[]),
        );

        {
            let seen = seen.lock().unwrap();
            assert_eq!(1, seen.len());
            assert!(seen[0].is_no_error());
        }

        // the response timer was disarmed, the TTL timer armed
        let (_, duration, event) = timers.last_armed();
        assert_eq!(Duration::from_secs(300), duration);
        assert_eq!(
            TimerEvent::CacheExpiry((domain("example.com"), QueryType::A)),
            event
        );

        // second query: synchronous hit, no extra datagram
        let (callback, seen2) = recorder();
        let outcome = resolver
            .query("example.com", QueryType::A, false, true, callback)
            .unwrap();
        assert_eq!(1, transport.sent_count());
        match outcome {
            QueryOutcome::Done(DnsResponse::Message(message)) => {
                assert_eq!(1, message.answers.len());
            }
            other => panic!("expected Done(Message), got {other:?}"),
        }
        assert_eq!(1, seen2.lock().unwrap().len());
    }

    #[test]
    fn cache_hit_gone_after_ttl_expires() {
        let (mut resolver, transport, timers) = resolver(1);

        let (callback, _) = recorder();
        resolver
            .query("example.com", QueryType::A, false, true, callback)
            .unwrap();
        inject(
            &mut resolver,
            &response(
                "example.com",
                QueryType::A,
                &[a_record("example.com", Ipv4Addr::new(1, 1, 1, 1))],
                &[],
                &[],
            ),
        );

        let (id, _, event) = timers.last_armed();
        assert!(matches!(event, TimerEvent::CacheExpiry(_)));
        resolver.on_timer(id, event);

        // a fresh query goes back to the network
        let (callback, _) = recorder();
        let outcome = resolver
            .query("example.com", QueryType::A, false, true, callback)
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::Ongoing));
        assert_eq!(2, transport.sent_count());
    }

    #[test]
    fn cache_ignores_queries_without_cache_flag() {
        let (mut resolver, transport, _) = resolver(1);

        let (callback, _) = recorder();
        resolver
            .query("example.com", QueryType::A, false, true, callback)
            .unwrap();
        inject(
            &mut resolver,
            &response(
                "example.com",
                QueryType::A,
                &[a_record("example.com", Ipv4Addr::new(1, 1, 1, 1))],
                &[],
                &[],
            ),
        );

        let (callback, _) = recorder();
        let outcome = resolver
            .query("example.com", QueryType::A, false, false, callback)
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::Ongoing));
        assert_eq!(2, transport.sent_count());
    }

    #[test]
    fn zero_ttl_answers_are_not_cached() {
        let (mut resolver, _, _) = resolver(1);

        let (callback, _) = recorder();
        resolver
            .query("example.com", QueryType::A, false, true, callback)
            .unwrap();

        let mut answer = a_record("example.com", Ipv4Addr::new(1, 1, 1, 1));
        answer.ttl = 0;
        inject(
            &mut resolver,
            &response("example.com", QueryType::A, &[answer], &[], &[]),
        );

        assert!(resolver.records.is_empty());
    }

    #[test]
    fn cache_lifetime_is_minimum_answer_ttl() {
        let (mut resolver, _, timers) = resolver(1);

        let (callback, _) = recorder();
        resolver
            .query("example.com", QueryType::A, false, true, callback)
            .unwrap();

        let mut short = a_record("example.com", Ipv4Addr::new(1, 1, 1, 1));
        short.ttl = 60;
        let mut long = a_record("example.com", Ipv4Addr::new(2, 2, 2, 2));
        long.ttl = 600;
        inject(
            &mut resolver,
            &response("example.com", QueryType::A, &[long, short], &[], &[]),
        );

        let (_, duration, event) = timers.last_armed();
        assert!(matches!(event, TimerEvent::CacheExpiry(_)));
        assert_eq!(Duration::from_secs(60), duration);
    }

    // scenario: dedup in flight
    #[test]
    fn concurrent_queries_share_one_datagram_and_fan_out_in_order() {
        let (mut resolver, transport, _) = resolver(1);
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let outcome = resolver
                .query("x.test", QueryType::A, false, false, tagged_recorder(tag, &log))
                .unwrap();
            assert!(matches!(outcome, QueryOutcome::Ongoing));
        }
        assert_eq!(1, transport.sent_count());

        inject(
            &mut resolver,
            &response(
                "x.test",
                QueryType::A,
                &[a_record("x.test", Ipv4Addr::new(1, 1, 1, 1))],
                &[],
                &[],
            ),
        );

        let log = log.lock().unwrap();
        assert_eq!(
            vec!["first", "second", "third"],
            log.iter().map(|(tag, _)| *tag).collect::<Vec<_>>()
        );
        assert!(log.iter().all(|(_, response)| response.is_no_error()));
    }

    #[test]
    fn dedup_latches_cache_flag() {
        let (mut resolver, _, _) = resolver(1);

        let (callback, _) = recorder();
        resolver
            .query("x.test", QueryType::A, false, false, callback)
            .unwrap();
        let (callback, _) = recorder();
        resolver
            .query("x.test", QueryType::A, false, true, callback)
            .unwrap();

        inject(
            &mut resolver,
            &response(
                "x.test",
                QueryType::A,
                &[a_record("x.test", Ipv4Addr::new(1, 1, 1, 1))],
                &[],
                &[],
            ),
        );

        assert_eq!(1, resolver.records.len());
    }

    // scenario: timeout with retry
    #[test]
    fn timeout_retries_identical_bytes_on_alternate_server() {
        let (mut resolver, transport, timers) = resolver(2);

        let (callback, seen) = recorder();
        resolver
            .query("example.com", QueryType::A, false, false, callback)
            .unwrap();

        fire_query_timeout(&mut resolver, &timers);

        let sent = transport.sent();
        assert_eq!(2, sent.len());
        assert_eq!("127.0.0.1:53", sent[0].0.to_string());
        assert_eq!("127.0.0.2:53", sent[1].0.to_string());
        // identical bytes, transaction id included
        assert_eq!(sent[0].1, sent[1].1);

        inject(
            &mut resolver,
            &response(
                "example.com",
                QueryType::A,
                &[a_record("example.com", Ipv4Addr::new(1, 1, 1, 1))],
                &[],
                &[],
            ),
        );

        assert_eq!(1, seen.lock().unwrap().len());
    }

    #[test]
    fn retries_exhausted_fails_with_no_response() {
        let (mut resolver, transport, timers) = resolver(2);

        let (callback, seen) = recorder();
        resolver
            .query("example.com", QueryType::A, false, false, callback)
            .unwrap();

        fire_query_timeout(&mut resolver, &timers);
        fire_query_timeout(&mut resolver, &timers);

        assert_eq!(2, transport.sent_count());
        let seen = seen.lock().unwrap();
        assert_eq!(1, seen.len());
        assert!(matches!(seen[0], DnsResponse::Status(Status::NoResponse)));
        assert!(resolver.queries.is_empty());
    }

    #[test]
    fn refused_resend_fails_with_no_response() {
        let (mut resolver, transport, timers) = resolver(2);

        let (callback, seen) = recorder();
        resolver
            .query("example.com", QueryType::A, false, false, callback)
            .unwrap();

        transport.set_fail(true);
        fire_query_timeout(&mut resolver, &timers);

        let seen = seen.lock().unwrap();
        assert_eq!(1, seen.len());
        assert!(matches!(seen[0], DnsResponse::Status(Status::NoResponse)));
        assert!(resolver.queries.is_empty());
    }

    #[test]
    fn single_server_timeout_fails_with_socket_status() {
        let (mut resolver, transport, timers) = resolver(1);

        let (callback, seen) = recorder();
        resolver
            .query("example.com", QueryType::A, false, false, callback)
            .unwrap();

        fire_query_timeout(&mut resolver, &timers);

        // the retry budget is not spent, there is just nowhere to
        // send: that is the no-server outcome, not a plain timeout
        assert_eq!(1, transport.sent_count());
        let seen = seen.lock().unwrap();
        assert_eq!(1, seen.len());
        assert!(matches!(seen[0], DnsResponse::Status(Status::Socket)));
    }

    // scenario: quarantine
    #[test]
    fn unresponsive_server_is_quarantined_and_skipped() {
        let (mut resolver, transport, timers) = resolver(2);

        // four queries: the primary drops each, the retry on the
        // secondary is answered
        for i in 0..4 {
            let name = format!("q{i}.example.com");
            let (callback, _) = recorder();
            resolver
                .query(&name, QueryType::A, false, false, callback)
                .unwrap();
            fire_query_timeout(&mut resolver, &timers);
            inject(
                &mut resolver,
                &response(&name, QueryType::A, &[a_record(&name, Ipv4Addr::new(1, 1, 1, 1))], &[], &[]),
            );
        }

        assert!(resolver.pool.server(0).is_quarantined());
        assert!(timers
            .armed()
            .iter()
            .any(|(_, duration, event)| *event == TimerEvent::Quarantine(0)
                && *duration == Duration::from_millis(300_000)));

        // the fifth query goes straight to the secondary
        let (callback, _) = recorder();
        resolver
            .query("q4.example.com", QueryType::A, false, false, callback)
            .unwrap();
        let sent = transport.sent();
        assert_eq!("127.0.0.2:53", sent.last().unwrap().0.to_string());

        // after the quarantine elapses the primary is used again
        let (id, _, event) = timers
            .armed()
            .into_iter()
            .find(|(_, _, event)| matches!(event, TimerEvent::Quarantine(_)))
            .unwrap();
        resolver.on_timer(id, event);
        assert!(!resolver.pool.server(0).is_quarantined());

        let (callback, _) = recorder();
        resolver
            .query("q5.example.com", QueryType::A, false, false, callback)
            .unwrap();
        assert_eq!(
            "127.0.0.1:53",
            transport.sent().last().unwrap().0.to_string()
        );
    }

    #[test]
    fn all_servers_quarantined_fails_with_no_server() {
        let (mut resolver, _, timers) = resolver(1);

        for i in 0..4 {
            let name = format!("q{i}.example.com");
            let (callback, _) = recorder();
            resolver
                .query(&name, QueryType::A, false, false, callback)
                .unwrap();
            fire_query_timeout(&mut resolver, &timers);
        }
        assert!(resolver.pool.server(0).is_quarantined());

        let (callback, _) = recorder();
        assert!(matches!(
            resolver.query("q4.example.com", QueryType::A, false, false, callback),
            Err(QueryError::NoServer)
        ));
    }

    #[test]
    fn response_resets_no_response_count() {
        let (mut resolver, _, timers) = resolver(1);

        // three timeouts, then a served query: counter back to zero
        for i in 0..3 {
            let name = format!("q{i}.example.com");
            let (callback, _) = recorder();
            resolver
                .query(&name, QueryType::A, false, false, callback)
                .unwrap();
            fire_query_timeout(&mut resolver, &timers);
        }

        let (callback, _) = recorder();
        resolver
            .query("ok.example.com", QueryType::A, false, false, callback)
            .unwrap();
        inject(
            &mut resolver,
            &response(
                "ok.example.com",
                QueryType::A,
                &[a_record("ok.example.com", Ipv4Addr::new(1, 1, 1, 1))],
                &[],
                &[],
            ),
        );

        let (callback, _) = recorder();
        resolver
            .query("again.example.com", QueryType::A, false, false, callback)
            .unwrap();
        fire_query_timeout(&mut resolver, &timers);

        assert!(!resolver.pool.server(0).is_quarantined());
    }

    #[test]
    fn non_noerror_response_is_delivered_and_not_cached() {
        let (mut resolver, _, _) = resolver(1);

        let (callback, seen) = recorder();
        resolver
            .query("missing.example.com", QueryType::A, false, true, callback)
            .unwrap();

        let mut message = response("missing.example.com", QueryType::A, &[], &[], &[]);
        message.header.rcode = Rcode::NameError;
        inject(&mut resolver, &message);

        let seen = seen.lock().unwrap();
        assert_eq!(1, seen.len());
        match &seen[0] {
            DnsResponse::Message(message) => {
                assert!(!seen[0].is_no_error());
                assert_eq!(Rcode::NameError, message.header.rcode);
            }
            other => panic!("expected Message, got {other:?}"),
        }
        assert!(resolver.records.is_empty());
    }

    #[test]
    fn format_error_response_delivers_status_other() {
        let (mut resolver, _, timers) = resolver(1);

        let (callback, seen) = recorder();
        resolver
            .query("bad.example.com", QueryType::A, false, false, callback)
            .unwrap();

        let mut message = response("bad.example.com", QueryType::A, &[], &[], &[]);
        message.header.rcode = Rcode::FormatError;
        inject(&mut resolver, &message);

        let seen = seen.lock().unwrap();
        assert_eq!(1, seen.len());
        assert!(matches!(seen[0], DnsResponse::Status(Status::Other)));
        assert!(resolver.queries.is_empty());
        // the wait timer was disarmed
        assert_eq!(1, timers.stopped().len());
    }

    #[test]
    fn requests_and_unmatched_responses_are_dropped() {
        let (mut resolver, _, _) = resolver(1);

        let (callback, seen) = recorder();
        resolver
            .query("example.com", QueryType::A, false, false, callback)
            .unwrap();

        // a request (QR=0) for the same name must not match
        let request = Message::query(1, domain("example.com"), QueryType::A);
        inject(&mut resolver, &request);
        assert!(seen.lock().unwrap().is_empty());

        // a response for some other name must not match
        inject(
            &mut resolver,
            &response(
                "other.example.com",
                QueryType::A,
                &[a_record("other.example.com", Ipv4Addr::new(1, 1, 1, 1))],
                &[],
                &[],
            ),
        );
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(1, resolver.queries.len());
    }

    #[test]
    fn truncated_datagram_is_dropped_and_query_survives() {
        let (mut resolver, _, _) = resolver(1);

        let (callback, seen) = recorder();
        resolver
            .query("example.com", QueryType::A, false, false, callback)
            .unwrap();

        let octets = response(
            "example.com",
            QueryType::A,
            &[a_record("example.com", Ipv4Addr::new(1, 1, 1, 1))],
            &[],
            &[],
        )
        .to_octets()
        .unwrap();
        resolver.handle_datagram(&octets[..octets.len() - 3]);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(1, resolver.queries.len());
    }

    #[test]
    fn stale_query_timer_is_ignored() {
        let (mut resolver, transport, timers) = resolver(2);

        let (callback, _) = recorder();
        resolver
            .query("example.com", QueryType::A, false, false, callback)
            .unwrap();

        let (stale_id, _, stale_event) = timers.last_armed();
        fire_query_timeout(&mut resolver, &timers);
        assert_eq!(2, transport.sent_count());

        // the first timer's id no longer matches the re-armed entry
        resolver.on_timer(stale_id, stale_event);
        assert_eq!(2, transport.sent_count());
        assert_eq!(1, resolver.queries.len());
    }

    #[test]
    fn transaction_ids_are_sequential() {
        let (mut resolver, transport, _) = resolver(1);

        let (callback, _) = recorder();
        resolver
            .query("a.example.com", QueryType::A, false, false, callback)
            .unwrap();
        let (callback, _) = recorder();
        resolver
            .query("b.example.com", QueryType::A, false, false, callback)
            .unwrap();

        let sent = transport.sent();
        let id0 = u16::from_be_bytes([sent[0].1[0], sent[0].1[1]]);
        let id1 = u16::from_be_bytes([sent[1].1[0], sent[1].1[1]]);
        assert_eq!(id0.wrapping_add(1), id1);
    }
}
