//! In-process [`Store`] with expiring keys and sorted sets.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use super::{parse_count, Command, Reply, Store};
use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};

#[derive(Debug)]
enum Value {
    Text(String),
    Sorted(Vec<(u64, String)>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

/// A single-process store. Every batch runs under one lock, so batches are
/// atomic with respect to each other.
///
/// Useful for tests and for deployments where all callers share one process.
pub struct MemoryStore {
    entries: Mutex<AHashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store that expires keys by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store that expires keys by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(AHashMap::new()),
            clock,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !is_expired(entry, now))
            .count()
    }

    /// True if no live keys remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a key in seconds, if it has one.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| !is_expired(entry, now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_sub(now))
    }
}

fn is_expired(entry: &Entry, now: u64) -> bool {
    matches!(entry.expires_at, Some(at) if at <= now)
}

struct Txn<'a> {
    entries: &'a mut AHashMap<String, Entry>,
    now: u64,
}

impl Txn<'_> {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| is_expired(e, self.now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn text(&mut self, key: &str) -> StoreResult<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn sorted(&mut self, key: &str) -> StoreResult<Option<&mut Vec<(u64, String)>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => Ok(Some(set)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn apply(&mut self, command: &Command) -> StoreResult<Reply> {
        let now = self.now;
        match command {
            Command::Get { key } => Ok(self.text(key)?.map_or(Reply::Nil, Reply::Text)),
            Command::SetWithTtl { key, value, ttl } => {
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Text(value.clone()),
                        expires_at: Some(now.saturating_add(*ttl)),
                    },
                );
                Ok(Reply::Ok)
            }
            Command::SetIfAbsent { key, value, ttl } => {
                if self.live(key).is_some() {
                    return Ok(Reply::Bool(false));
                }
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Text(value.clone()),
                        expires_at: Some(now.saturating_add(*ttl)),
                    },
                );
                Ok(Reply::Bool(true))
            }
            Command::Increment { key, by } => {
                let current = match self.text(key)? {
                    Some(text) => parse_count(&text)? as i64,
                    None => 0,
                };
                let next = current + by;
                match self.live(key) {
                    Some(entry) => entry.value = Value::Text(next.to_string()),
                    None => {
                        self.entries.insert(
                            key.clone(),
                            Entry {
                                value: Value::Text(next.to_string()),
                                expires_at: None,
                            },
                        );
                    }
                }
                Ok(Reply::Integer(next))
            }
            Command::Expire { key, ttl } => match self.live(key) {
                Some(entry) => {
                    entry.expires_at = Some(now.saturating_add(*ttl));
                    Ok(Reply::Bool(true))
                }
                None => Ok(Reply::Bool(false)),
            },
            Command::Delete { key } => {
                let existed = self.live(key).is_some();
                self.entries.remove(key);
                Ok(Reply::Bool(existed))
            }
            Command::DeleteIfEquals { key, value } => {
                if self.text(key)?.as_deref() != Some(value.as_str()) {
                    return Ok(Reply::Bool(false));
                }
                self.entries.remove(key);
                Ok(Reply::Bool(true))
            }
            Command::SortedSetAdd { key, score, member } => {
                if self.live(key).is_none() {
                    self.entries.insert(
                        key.clone(),
                        Entry {
                            value: Value::Sorted(Vec::new()),
                            expires_at: None,
                        },
                    );
                }
                let set = self
                    .sorted(key)?
                    .ok_or(StoreError::UnexpectedReply("sorted set"))?;
                let existed = match set.iter().position(|(_, m)| m == member) {
                    Some(idx) => {
                        set.remove(idx);
                        true
                    }
                    None => false,
                };
                let at = set
                    .partition_point(|(s, m)| (*s, m.as_str()) < (*score, member.as_str()));
                set.insert(at, (*score, member.clone()));
                Ok(Reply::Bool(!existed))
            }
            Command::SortedSetRemove { key, member } => {
                let removed = match self.sorted(key)? {
                    Some(set) => match set.iter().position(|(_, m)| m == member) {
                        Some(idx) => {
                            set.remove(idx);
                            true
                        }
                        None => false,
                    },
                    None => false,
                };
                if matches!(self.sorted(key)?, Some(set) if set.is_empty()) {
                    self.entries.remove(key);
                }
                Ok(Reply::Bool(removed))
            }
            Command::SortedSetLast { key } => Ok(self
                .sorted(key)?
                .and_then(|set| set.last().map(|(_, m)| m.clone()))
                .map_or(Reply::Nil, Reply::Text)),
            Command::RangeByScore { key, min, max } => {
                let members = self
                    .sorted(key)?
                    .map(|set| {
                        set.iter()
                            .filter(|(s, _)| s >= min && s <= max)
                            .map(|(_, m)| m.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Reply::Members(members))
            }
            Command::MultiGet { keys } => {
                let mut values = Vec::with_capacity(keys.len());
                for key in keys {
                    // Redis MGET answers nil for keys of another type
                    values.push(self.text(key).unwrap_or(None));
                }
                Ok(Reply::Values(values))
            }
        }
    }
}

impl Store for MemoryStore {
    fn execute(&self, commands: &[Command]) -> StoreResult<Vec<Reply>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let mut txn = Txn {
            entries: &mut *entries,
            now,
        };
        // Like a Redis transaction: isolated, but no rollback on a failed command.
        commands.iter().map(|command| txn.apply(command)).collect()
    }
}
