//! Outage detection policy over the trailing two-minute window.

/// Error and success totals over the current and previous minute buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    /// Errors recorded in the window.
    pub errors: u64,
    /// Successes recorded in the window, scaled back up by the sample rate.
    pub successes: u64,
}

impl WindowCounts {
    /// Fraction of failed calls, or `None` if nothing was recorded.
    pub fn error_rate(&self) -> Option<f64> {
        let total = self.errors + self.successes;
        (total > 0).then(|| self.errors as f64 / total as f64)
    }
}

/// Decides whether the window counts amount to an outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRatePolicy {
    error_threshold: u8,
    min_errors: u64,
}

impl ErrorRatePolicy {
    /// `error_threshold` is a percentage, `min_errors` an absolute floor.
    pub fn new(error_threshold: u8, min_errors: u64) -> Self {
        Self {
            error_threshold,
            min_errors,
        }
    }

    /// True if the window should open an outage.
    ///
    /// Below `min_errors` nothing trips. Errors with no successes always trip.
    /// Otherwise the error rate trips at or above the threshold; the
    /// comparison is done in integers so the boundary is exact.
    pub fn should_trip(&self, counts: &WindowCounts) -> bool {
        if counts.errors < self.min_errors {
            return false;
        }
        if counts.errors > 0 && counts.successes == 0 {
            return true;
        }

        let total = u128::from(counts.errors) + u128::from(counts.successes);
        u128::from(counts.errors) * 100 >= u128::from(self.error_threshold) * total
    }
}
