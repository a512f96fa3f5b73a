use std::time::Duration;

use crate::cache::QueryKey;

/// Identifier of a started timer.  Entries keep the id of the timer
/// they armed and ignore expirations carrying any other id, so a
/// timer which fires after its entry has moved on is harmless.
pub type TimerId = u64;

/// What a timer was armed for.  The host hands the event back
/// verbatim through [`Resolver::on_timer`](crate::Resolver::on_timer)
/// when the timer expires.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TimerEvent {
    /// The wait-for-response timer of an in-flight query.
    QueryTimeout(QueryKey),

    /// The TTL of a cached answer elapsed.
    CacheExpiry(QueryKey),

    /// A quarantined server (by pool index) may rejoin the healthy
    /// set.
    Quarantine(usize),
}

/// The timer service the host supplies.  `start` returns an
/// identifier which must be unique for the lifetime of the service;
/// `stop` is advisory - a stopped timer may still fire, and the
/// resolver's stale-id checks make that a no-op.
pub trait Timers {
    fn start(&mut self, duration: Duration, event: TimerEvent) -> TimerId;

    fn stop(&mut self, id: TimerId);
}
