//! History payloads for dashboards.

use serde::{Deserialize, Serialize};

use crate::counters::SamplePoint;
use crate::error::StoreResult;
use crate::outage::Outage;
use crate::service::Service;

/// Outages of one service over a time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutageReport {
    /// Service name.
    pub service: String,
    /// Outages that began in the range, oldest first.
    pub outages: Vec<Outage>,
}

impl OutageReport {
    /// Reads the outages of `service` that began within `[start, end]`.
    pub fn collect(service: &Service, start: u64, end: u64) -> StoreResult<Self> {
        Ok(Self {
            service: service.name().to_string(),
            outages: service.outages_in_range(start, end)?,
        })
    }
}

/// Success and error series of one service over a time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestReport {
    /// Service name.
    pub service: String,
    /// Success counts, one point per sample.
    pub successes: Vec<SamplePoint>,
    /// Error counts, one point per sample.
    pub errors: Vec<SamplePoint>,
}

impl RequestReport {
    /// Samples both counters of `service` every `sample_minutes` over
    /// `[start, end]`.
    pub fn collect(
        service: &Service,
        start: u64,
        end: u64,
        sample_minutes: u64,
    ) -> StoreResult<Self> {
        Ok(Self {
            service: service.name().to_string(),
            successes: service.successes_in_range(start, end, sample_minutes)?,
            errors: service.errors_in_range(start, end, sample_minutes)?,
        })
    }
}
