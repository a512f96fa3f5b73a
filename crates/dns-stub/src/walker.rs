//! The resolve-all walk: after an SRV or NAPTR response, follow the
//! chain down to address records (NAPTR -> SRV -> A, or SRV -> A),
//! reusing whatever the server already put in the Additional section
//! and querying only for the missing layers.  The caller gets exactly
//! one terminal notification: the whole expansion, or a single
//! failure.

use std::sync::Arc;

use dns_types::protocol::types::*;

use crate::resolver::{
    Caller, DnsResponse, QueryCallback, QueryError, QueryOutcome, Resolver, Status, Submit,
};
use crate::timer::Timers;
use crate::transport::Transport;

/// State of one resolve-all walk.
pub(crate) struct Walk {
    /// Every response gathered so far, first layer included.
    responses: Vec<Arc<Message>>,

    /// Sticky failure: once set, later child responses are drained
    /// but no longer appended.
    failed: Option<Status>,

    /// Child queries still outstanding.  The walk completes when this
    /// drains to zero.
    pending: usize,

    /// The original caller, notified exactly once.
    callback: Option<QueryCallback>,
}

impl<T: Transport, M: Timers> Resolver<T, M> {
    /// Entry point for `query(.., resolve_all: true, ..)` with an SRV
    /// or NAPTR query type.
    pub(crate) fn query_resolve_all(
        &mut self,
        name: DomainName,
        qtype: QueryType,
        cache: bool,
        callback: QueryCallback,
    ) -> Result<QueryOutcome, QueryError> {
        let walk = self.next_walk_id();
        self.walks.insert(
            walk,
            Walk {
                responses: Vec::new(),
                failed: None,
                pending: 1,
                callback: Some(callback),
            },
        );

        match self.submit(name, qtype, cache, Caller::Walk(walk)) {
            Ok(Submit::Ongoing) => Ok(QueryOutcome::Ongoing),
            Ok(Submit::Hit(message)) => {
                // everything may resolve synchronously from cache and
                // the Additional sections
                match self.walk_child_response(walk, message) {
                    Some(response) => Ok(QueryOutcome::Done(response)),
                    None => Ok(QueryOutcome::Ongoing),
                }
            }
            Err(error) => {
                self.walks.remove(&walk);
                Err(error)
            }
        }
    }

    /// A child query of this walk produced a response.  Append it,
    /// derive the next layer, and complete the walk if nothing is
    /// left outstanding.
    pub(crate) fn walk_child_response(
        &mut self,
        walk: u64,
        message: Arc<Message>,
    ) -> Option<DnsResponse> {
        let failed = match self.walks.get_mut(&walk) {
            None => {
                tracing::warn!(walk, "response for unknown walk, dropping");
                return None;
            }
            Some(state) => {
                if state.failed.is_none() {
                    state.responses.push(message.clone());
                }
                state.failed.is_some()
            }
        };

        if !failed && matches!(message.question.qtype, QueryType::SRV | QueryType::NAPTR) {
            self.walk_next_layer(walk, &message);
        }

        // this child counts as pending until its next layer has been
        // derived, so a synchronous sub-answer cannot complete the
        // walk early
        if let Some(state) = self.walks.get_mut(&walk) {
            state.pending = state.pending.saturating_sub(1);
        }
        self.walk_try_complete(walk)
    }

    /// A child query of this walk failed.  The first failure poisons
    /// the walk; the rest of the children are drained silently.
    pub(crate) fn walk_child_failure(&mut self, walk: u64, status: Status) -> Option<DnsResponse> {
        match self.walks.get_mut(&walk) {
            None => {
                tracing::warn!(walk, "failure for unknown walk, dropping");
                return None;
            }
            Some(state) => {
                if state.failed.is_none() {
                    tracing::info!(walk, %status, "resolve-all walk poisoned by child failure");
                    state.failed = Some(Status::Recursive);
                    state.responses.clear();
                }
                state.pending = state.pending.saturating_sub(1);
            }
        }
        self.walk_try_complete(walk)
    }

    /// Derive the next resolution layer from a response's answers and
    /// submit queries for whatever the Additional section does not
    /// already cover.
    fn walk_next_layer(&mut self, walk: u64, message: &Message) {
        for answer in &message.answers {
            // a poisoned walk stops spawning
            if self
                .walks
                .get(&walk)
                .map_or(true, |state| state.failed.is_some())
            {
                return;
            }

            let (name, qtype) = match &answer.data {
                RecordData::Srv { target, .. } if message.question.qtype == QueryType::SRV => {
                    (target.clone(), QueryType::A)
                }
                RecordData::Naptr {
                    flags, replacement, ..
                } if message.question.qtype == QueryType::NAPTR => match flags {
                    NaptrFlags::S => (replacement.clone(), QueryType::SRV),
                    NaptrFlags::A => (replacement.clone(), QueryType::A),
                    NaptrFlags::U | NaptrFlags::P | NaptrFlags::Other => continue,
                },
                _ => continue,
            };

            let mut deferred = Vec::new();
            if search_additional(&name, qtype, &message.additional, &mut deferred) {
                tracing::debug!(%name, %qtype, "next layer satisfied from additional section");
                continue;
            }

            if deferred.is_empty() {
                self.walk_submit_child(walk, name, qtype);
            } else {
                // the SRV layer was in Additional but some targets
                // were not: only the address layer is still missing
                for target in deferred {
                    self.walk_submit_child(walk, target, QueryType::A);
                }
            }
        }
    }

    fn walk_submit_child(&mut self, walk: u64, name: DomainName, qtype: QueryType) {
        tracing::debug!(%name, %qtype, walk, "querying next layer");
        match self.submit(name, qtype, true, Caller::Walk(walk)) {
            Ok(Submit::Ongoing) => {
                if let Some(state) = self.walks.get_mut(&walk) {
                    state.pending += 1;
                }
            }
            Ok(Submit::Hit(message)) => {
                if let Some(state) = self.walks.get_mut(&walk) {
                    state.pending += 1;
                }
                self.walk_child_response(walk, message);
            }
            Err(error) => {
                tracing::warn!(%error, walk, "could not start next-layer query");
                if let Some(state) = self.walks.get_mut(&walk) {
                    if state.failed.is_none() {
                        state.failed = Some(Status::Recursive);
                        state.responses.clear();
                    }
                }
            }
        }
    }

    /// If nothing is outstanding, remove the walk and notify the
    /// original caller with the aggregate result.
    fn walk_try_complete(&mut self, walk: u64) -> Option<DnsResponse> {
        if self.walks.get(&walk).map_or(true, |state| state.pending > 0) {
            return None;
        }

        let state = self.walks.remove(&walk)?;
        let response = match state.failed {
            Some(status) => DnsResponse::Status(status),
            None => DnsResponse::MessageList(state.responses),
        };
        tracing::debug!(walk, "resolve-all walk complete");

        if let Some(callback) = state.callback {
            callback(response.clone());
        }
        Some(response)
    }
}

/// Search the Additional section for the answer to a derived probe.
///
/// For an A probe the first matching record settles it.  For an SRV
/// probe, every matching SRV is checked for a nested A answer for its
/// target; targets without one are pushed onto `deferred`.  Returns
/// true only if every probed name was satisfied - when it returns
/// false with a non-empty `deferred`, those names are the A queries
/// still needed.
fn search_additional(
    name: &DomainName,
    qtype: QueryType,
    additional: &[ResourceRecord],
    deferred: &mut Vec<DomainName>,
) -> bool {
    let mut found = false;

    for rr in additional {
        if rr.name != *name {
            continue;
        }

        match &rr.data {
            RecordData::A { .. } if qtype == QueryType::A => {
                return true;
            }
            RecordData::Srv { target, .. } if qtype == QueryType::SRV => {
                let mut nested = Vec::new();
                found = search_additional(target, QueryType::A, additional, &mut nested);
                if !found {
                    deferred.push(target.clone());
                }
            }
            _ => {}
        }
    }

    found && deferred.is_empty()
}
