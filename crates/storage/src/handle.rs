//! The store handle contract.

use crate::Result;
use std::future::Future;

/// An independent connection to one relational backend.
///
/// Every insert is a single atomic statement; nothing here spans more than
/// one write. Implementations must be usable from many ingestion tasks at
/// once as well as from the health monitor.
pub trait StoreHandle: Send + Sync + 'static {
    /// Record the start of an attendance interval.
    fn insert_attendance(&self, timestamp: &str) -> impl Future<Output = Result<()>> + Send;

    /// Record one pause interval.
    fn insert_pause(
        &self,
        departure: &str,
        return_time: &str,
        kind: i64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Record one audit log entry.
    fn insert_audit(
        &self,
        subject: &str,
        action: &str,
        hostname: &str,
        ip: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Liveness probe. `Ok(())` means the store is reachable.
    fn probe(&self) -> impl Future<Output = Result<()>> + Send;
}
