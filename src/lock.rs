//! Single-flight lock around recovery probes.

use crate::error::StoreResult;
use crate::registry::Shared;

/// A short-lived, store-wide lock that lets one process at a time probe a
/// service. The TTL frees it if the holder dies mid-probe.
///
/// Each lock writes its own random token and only deletes the key while that
/// token is still there, so a holder that outlives the TTL cannot free a lock
/// someone else has since taken.
pub(crate) struct RetestLock<'a> {
    shared: &'a Shared,
    key: String,
    token: String,
    ttl: u64,
}

impl<'a> RetestLock<'a> {
    pub(crate) fn new(shared: &'a Shared, service: &str, ttl: u64) -> Self {
        Self {
            shared,
            key: format!("{}{}-retest-lock", shared.prefix, service),
            token: format!("{:016x}", rand::random::<u64>()),
            ttl,
        }
    }

    /// True if this caller now holds the lock.
    pub(crate) fn acquire(&self) -> StoreResult<bool> {
        self.shared
            .store
            .set_if_absent(&self.key, &self.token, self.ttl)
    }

    /// Frees the lock if this caller still holds it.
    pub(crate) fn release(&self) -> StoreResult<()> {
        let released = self.shared.store.delete_if_equals(&self.key, &self.token)?;
        if !released {
            tracing::debug!(key = %self.key, "breakers retest lock expired before release");
        }
        Ok(())
    }
}
