use std::collections::HashMap;
use std::sync::Arc;

use dns_types::protocol::types::{DomainName, Message, QueryType};

use crate::timer::TimerId;

/// The deduplication identity: lowercased name plus query type.
/// `DomainName` lowercases at construction, so two spellings of the
/// same name produce equal keys.
pub type QueryKey = (DomainName, QueryType);

/// A keyed table with the shape both caches share: the in-flight
/// query index maps keys to pending queries, the answer cache maps
/// keys to cached responses.
#[derive(Debug)]
pub struct Table<V> {
    entries: HashMap<QueryKey, V>,
}

impl<V> Table<V> {
    pub fn with_bucket_count(buckets: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(buckets),
        }
    }

    pub fn lookup(&self, key: &QueryKey) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn lookup_mut(&mut self, key: &QueryKey) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Insert an entry, returning the displaced one if the key was
    /// already present.
    pub fn insert(&mut self, key: QueryKey, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &QueryKey) -> Option<V> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A cached answer.  The TTL timer holds no ownership: it carries the
/// key and its id, and expiry only deletes the entry if the stored id
/// still matches.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub message: Arc<Message>,
    pub ttl_timer: TimerId,
}
