//! The shared key/value and sorted-set store the breaker keeps its state in.
//!
//! Implementations only have to provide [`Store::execute`], which runs a batch
//! of commands without interleaving other batches. The single-command helpers are
//! built on top of it.

mod memory;

pub use memory::MemoryStore;

use crate::error::{StoreError, StoreResult};

/// One store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read a string value. Replies `Text` or `Nil`.
    Get { key: String },
    /// Write a string value with a TTL in seconds. Replies `Ok`.
    SetWithTtl { key: String, value: String, ttl: u64 },
    /// Write a string value with a TTL only if the key is absent. Replies `Bool`.
    SetIfAbsent { key: String, value: String, ttl: u64 },
    /// Add `by` to an integer value, creating it at zero. Replies `Integer`.
    Increment { key: String, by: i64 },
    /// Set a TTL in seconds on an existing key. Replies `Bool`.
    Expire { key: String, ttl: u64 },
    /// Remove a key. Replies `Bool`.
    Delete { key: String },
    /// Remove a string key only while it holds `value`. Replies `Bool`.
    DeleteIfEquals { key: String, value: String },
    /// Insert or re-score a sorted-set member. Replies `Bool` (true if new).
    SortedSetAdd { key: String, score: u64, member: String },
    /// Remove a sorted-set member. Replies `Bool`.
    SortedSetRemove { key: String, member: String },
    /// The member with the greatest score. Replies `Text` or `Nil`.
    SortedSetLast { key: String },
    /// Members with `min <= score <= max`, ascending. Replies `Members`.
    RangeByScore { key: String, min: u64, max: u64 },
    /// Read many string values. Replies `Values`.
    MultiGet { keys: Vec<String> },
}

/// The result of one [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// No value.
    Nil,
    /// The command succeeded and returns nothing.
    Ok,
    /// Yes/no outcome.
    Bool(bool),
    /// Integer outcome.
    Integer(i64),
    /// A single string value.
    Text(String),
    /// Sorted-set members.
    Members(Vec<String>),
    /// One optional value per requested key.
    Values(Vec<Option<String>>),
}

impl Reply {
    /// Reads an optional string, as returned by `Get` and `SortedSetLast`.
    pub fn into_text(self) -> StoreResult<Option<String>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Text(text) => Ok(Some(text)),
            _ => Err(StoreError::UnexpectedReply("text")),
        }
    }

    /// Reads an integer-valued string, treating a missing value as zero.
    pub fn into_count(self) -> StoreResult<u64> {
        match self {
            Reply::Nil => Ok(0),
            Reply::Integer(n) => Ok(n.max(0) as u64),
            Reply::Text(text) => parse_count(&text),
            _ => Err(StoreError::UnexpectedReply("count")),
        }
    }

    fn into_bool(self) -> StoreResult<bool> {
        match self {
            Reply::Bool(b) => Ok(b),
            _ => Err(StoreError::UnexpectedReply("bool")),
        }
    }

    fn into_members(self) -> StoreResult<Vec<String>> {
        match self {
            Reply::Members(members) => Ok(members),
            _ => Err(StoreError::UnexpectedReply("members")),
        }
    }

    fn into_values(self) -> StoreResult<Vec<Option<String>>> {
        match self {
            Reply::Values(values) => Ok(values),
            _ => Err(StoreError::UnexpectedReply("values")),
        }
    }
}

impl From<Option<String>> for Reply {
    fn from(value: Option<String>) -> Self {
        value.map_or(Reply::Nil, Reply::Text)
    }
}

pub(crate) fn parse_count(text: &str) -> StoreResult<u64> {
    text.trim()
        .parse::<i64>()
        .map(|n| n.max(0) as u64)
        .map_err(|_| StoreError::NotAnInteger(text.to_string()))
}

/// A store shared by every process using the same key namespace.
pub trait Store: Send + Sync + 'static {
    /// Runs `commands` as one batch that no other batch interleaves with,
    /// returning one reply each. Execution stops at the first failing command.
    fn execute(&self, commands: &[Command]) -> StoreResult<Vec<Reply>>;

    /// Reads a string value.
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        single(self, Command::Get { key: key.to_string() })?.into_text()
    }

    /// Writes a string value that expires after `ttl` seconds.
    fn set_with_ttl(&self, key: &str, value: &str, ttl: u64) -> StoreResult<()> {
        single(
            self,
            Command::SetWithTtl {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
        )
        .map(|_| ())
    }

    /// Writes a value with a TTL if the key is absent; true if written.
    fn set_if_absent(&self, key: &str, value: &str, ttl: u64) -> StoreResult<bool> {
        single(
            self,
            Command::SetIfAbsent {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
        )?
        .into_bool()
    }

    /// Increments an integer value by one.
    fn increment(&self, key: &str) -> StoreResult<u64> {
        single(
            self,
            Command::Increment {
                key: key.to_string(),
                by: 1,
            },
        )?
        .into_count()
    }

    /// Sets a TTL on an existing key.
    fn expire(&self, key: &str, ttl: u64) -> StoreResult<bool> {
        single(
            self,
            Command::Expire {
                key: key.to_string(),
                ttl,
            },
        )?
        .into_bool()
    }

    /// Removes a key.
    fn delete(&self, key: &str) -> StoreResult<bool> {
        single(self, Command::Delete { key: key.to_string() })?.into_bool()
    }

    /// Removes a key if its value is still `value`; true if removed.
    fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool> {
        single(
            self,
            Command::DeleteIfEquals {
                key: key.to_string(),
                value: value.to_string(),
            },
        )?
        .into_bool()
    }

    /// Adds a member to a sorted set.
    fn add_to_sorted_set(&self, key: &str, score: u64, member: &str) -> StoreResult<bool> {
        single(
            self,
            Command::SortedSetAdd {
                key: key.to_string(),
                score,
                member: member.to_string(),
            },
        )?
        .into_bool()
    }

    /// Removes a member from a sorted set.
    fn remove_from_sorted_set(&self, key: &str, member: &str) -> StoreResult<bool> {
        single(
            self,
            Command::SortedSetRemove {
                key: key.to_string(),
                member: member.to_string(),
            },
        )?
        .into_bool()
    }

    /// The highest-scored member of a sorted set.
    fn last_in_sorted_set(&self, key: &str) -> StoreResult<Option<String>> {
        single(self, Command::SortedSetLast { key: key.to_string() })?.into_text()
    }

    /// Members scored within `[min, max]`.
    fn range_by_score(&self, key: &str, min: u64, max: u64) -> StoreResult<Vec<String>> {
        single(
            self,
            Command::RangeByScore {
                key: key.to_string(),
                min,
                max,
            },
        )?
        .into_members()
    }

    /// Reads many keys in one round trip.
    fn multi_get(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        single(
            self,
            Command::MultiGet {
                keys: keys.to_vec(),
            },
        )?
        .into_values()
    }
}

fn single<S: Store + ?Sized>(store: &S, command: Command) -> StoreResult<Reply> {
    store
        .execute(std::slice::from_ref(&command))?
        .into_iter()
        .next()
        .ok_or(StoreError::UnexpectedReply("empty batch"))
}
