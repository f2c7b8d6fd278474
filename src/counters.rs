//! Per-minute success and error counters kept in the shared store.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::StoreResult;
use crate::registry::Shared;
use crate::store::{Command, Reply};

/// Default spacing between points of a history series.
pub const DEFAULT_SAMPLE_MINUTES: u64 = 60;

/// Which counter a bucket holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Successful requests.
    Successes,
    /// Failed requests.
    Errors,
}

impl Metric {
    fn segment(self) -> &'static str {
        match self {
            Metric::Successes => "successes",
            Metric::Errors => "errors",
        }
    }
}

/// One point of a counter series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// Minute-aligned epoch seconds.
    pub time: u64,
    /// Count recorded in that minute's bucket.
    pub count: u64,
}

/// Rounds an epoch timestamp down to the start of its minute.
pub fn align_on_minute(time: u64) -> u64 {
    time - (time % 60)
}

/// Counter operations scoped to one service.
pub(crate) struct Counters<'a> {
    shared: &'a Shared,
    service: &'a str,
    retention_seconds: u64,
    sample_per: u32,
}

impl<'a> Counters<'a> {
    pub(crate) fn new(
        shared: &'a Shared,
        service: &'a str,
        retention_seconds: u64,
        sample_per: u32,
    ) -> Self {
        Self {
            shared,
            service,
            retention_seconds,
            sample_per,
        }
    }

    pub(crate) fn key(&self, metric: Metric, time: u64) -> String {
        format!(
            "{}{}-{}-{}",
            self.shared.prefix,
            self.service,
            metric.segment(),
            align_on_minute(time)
        )
    }

    fn increment(&self, metric: Metric, by: i64) -> StoreResult<()> {
        let key = self.key(metric, self.shared.clock.now());
        self.shared.store.execute(&[
            Command::Increment {
                key: key.clone(),
                by,
            },
            Command::Expire {
                key,
                ttl: self.retention_seconds,
            },
        ])?;
        Ok(())
    }

    /// Counts one error in the current minute.
    pub(crate) fn add_error(&self) -> StoreResult<()> {
        self.increment(Metric::Errors, 1)
    }

    /// Counts a success one time in `sample_per`, weighted by `sample_per`.
    /// Returns whether a write happened.
    pub(crate) fn add_success(&self) -> StoreResult<bool> {
        if !self.shared.random.one_in(self.sample_per) {
            return Ok(false);
        }
        self.increment(Metric::Successes, i64::from(self.sample_per))?;
        Ok(true)
    }

    /// Reads of the current and previous minute buckets, errors first.
    pub(crate) fn window_reads(&self, now: u64) -> SmallVec<[Command; 5]> {
        let previous = now.saturating_sub(60);
        [
            self.key(Metric::Errors, now),
            self.key(Metric::Errors, previous),
            self.key(Metric::Successes, now),
            self.key(Metric::Successes, previous),
        ]
        .into_iter()
        .map(|key| Command::Get { key })
        .collect()
    }

    /// Samples `metric` every `sample_minutes` from `start` through `end`.
    pub(crate) fn series_in_range(
        &self,
        metric: Metric,
        start: u64,
        end: u64,
        sample_minutes: u64,
    ) -> StoreResult<Vec<SamplePoint>> {
        let start = align_on_minute(start);
        let end = align_on_minute(end);
        if start > end {
            return Ok(Vec::new());
        }
        let step = sample_minutes
            .max(1)
            .checked_mul(60)
            .and_then(|seconds| usize::try_from(seconds).ok());
        let times: Vec<u64> = match step {
            Some(step) => (start..=end).step_by(step).collect(),
            // Wider than any timeline: only the first point fits.
            None => vec![start],
        };

        let keys: Vec<String> = times.iter().map(|&t| self.key(metric, t)).collect();
        let replies = self.shared.store.multi_get(&keys)?;
        times
            .into_iter()
            .zip(replies)
            .map(|(time, value)| {
                let count = Reply::from(value).into_count()?;
                Ok(SamplePoint { time, count })
            })
            .collect()
    }
}
