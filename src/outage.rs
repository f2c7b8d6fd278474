//! Outage records and their persistence.
//!
//! Each service keeps its outages in one sorted set scored by start time.
//! The member is the JSON-encoded record, so changing a record means
//! removing the old member and inserting the new one in a single batch.
//! Two processes doing this at once is last-write-wins on the whole record.

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::registry::Shared;
use crate::store::Command;

/// One incident on one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outage {
    #[serde(skip)]
    service: String,
    start_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_test_time: Option<u64>,
    #[serde(default)]
    forced: bool,
    #[serde(skip)]
    member: String,
}

impl Outage {
    /// Name of the service the outage belongs to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// When the outage began, in epoch seconds.
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// When the outage ended, if it has.
    pub fn end_time(&self) -> Option<u64> {
        self.end_time
    }

    /// When a probe last went out, falling back to the start time.
    pub fn last_test_time(&self) -> u64 {
        self.last_test_time.unwrap_or(self.start_time)
    }

    /// Forced outages are never probed and must be cleared by hand.
    pub fn is_forced(&self) -> bool {
        self.forced
    }

    /// True until the outage has been ended.
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// True once strictly more than `wait_seconds` have passed since the
    /// last probe.
    pub fn ready_for_retest(&self, now: u64, wait_seconds: u64) -> bool {
        now.saturating_sub(self.last_test_time()) > wait_seconds
    }

    fn encode(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    #[cfg(test)]
    pub(crate) fn open_for_tests(service: &str, start_time: u64) -> Self {
        Self {
            service: service.to_string(),
            start_time,
            end_time: None,
            last_test_time: None,
            forced: false,
            member: String::new(),
        }
    }
}

/// Outage persistence scoped to one service.
pub(crate) struct OutageLog<'a> {
    shared: &'a Shared,
    service: &'a str,
}

impl<'a> OutageLog<'a> {
    pub(crate) fn new(shared: &'a Shared, service: &'a str) -> Self {
        Self { shared, service }
    }

    pub(crate) fn key(&self) -> String {
        format!("{}{}-outages", self.shared.prefix, self.service)
    }

    /// The read that fetches the current outage, for use inside a batch.
    pub(crate) fn current_read(&self) -> Command {
        Command::SortedSetLast { key: self.key() }
    }

    pub(crate) fn decode(&self, member: String) -> StoreResult<Outage> {
        let mut outage: Outage = serde_json::from_str(&member)?;
        outage.service = self.service.to_string();
        outage.member = member;
        Ok(outage)
    }

    /// Persists a new outage starting now and announces it.
    pub(crate) fn create(&self, forced: bool) -> StoreResult<Outage> {
        let now = self.shared.clock.now();
        let mut outage = Outage {
            service: self.service.to_string(),
            start_time: now,
            end_time: None,
            last_test_time: None,
            forced,
            member: String::new(),
        };
        outage.member = outage.encode()?;
        self.shared
            .store
            .add_to_sorted_set(&self.key(), now, &outage.member)?;

        tracing::error!(
            service = self.service,
            forced,
            start_time = now,
            "breakers outage beginning"
        );
        self.shared.plugins.outage_begin(&outage);

        Ok(outage)
    }

    /// The outage with the greatest start time.
    pub(crate) fn current(&self) -> StoreResult<Option<Outage>> {
        self.shared
            .store
            .last_in_sorted_set(&self.key())?
            .map(|member| self.decode(member))
            .transpose()
    }

    /// Outages that began within `[start, end]`, oldest first.
    pub(crate) fn in_range(&self, start: u64, end: u64) -> StoreResult<Vec<Outage>> {
        self.shared
            .store
            .range_by_score(&self.key(), start, end)?
            .into_iter()
            .map(|member| self.decode(member))
            .collect()
    }

    /// Closes the outage and announces it.
    pub(crate) fn end(&self, outage: &mut Outage) -> StoreResult<()> {
        let mut next = outage.clone();
        next.end_time = Some(self.shared.clock.now().max(outage.start_time));
        self.replace(outage, next)?;

        tracing::info!(
            service = self.service,
            forced = outage.forced,
            end_time = ?outage.end_time,
            "breakers outage ending"
        );
        self.shared.plugins.outage_end(outage);
        Ok(())
    }

    /// Records that a probe just went out without closing the outage.
    pub(crate) fn update_last_test_time(&self, outage: &mut Outage) -> StoreResult<()> {
        let mut next = outage.clone();
        next.last_test_time = Some(self.shared.clock.now().max(outage.last_test_time()));
        self.replace(outage, next)
    }

    fn replace(&self, outage: &mut Outage, mut next: Outage) -> StoreResult<()> {
        next.member = next.encode()?;
        let key = self.key();
        self.shared.store.execute(&[
            Command::SortedSetRemove {
                key: key.clone(),
                member: outage.member.clone(),
            },
            Command::SortedSetAdd {
                key,
                score: next.start_time,
                member: next.member.clone(),
            },
        ])?;
        *outage = next;
        Ok(())
    }
}
