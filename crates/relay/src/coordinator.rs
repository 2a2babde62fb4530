//! Dual-store write path.

use std::sync::Arc;
use std::time::Duration;

use storage::StoreHandle;
use tracing::{debug, warn};

use crate::buffer::{BufferedRecord, DurabilityBuffer};
use crate::record::{AttendanceFact, AuditFact, EventRecord};
use crate::stores::{bounded, PendingStores, StorePair, StoreRole};
use crate::Result;

/// What happened to one submitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Stores whose attendance fact failed; non-empty means the record was
    /// buffered.
    pub pending: PendingStores,
    /// Stores whose audit insert failed. Never buffered.
    pub audit_failed: PendingStores,
}

impl WriteOutcome {
    pub fn buffered(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Writes each record to both stores and buffers what did not commit.
pub struct WriteCoordinator<S> {
    stores: Arc<StorePair<S>>,
    buffer: Arc<DurabilityBuffer>,
    timeout: Duration,
}

impl<S: StoreHandle> WriteCoordinator<S> {
    pub fn new(
        stores: Arc<StorePair<S>>,
        buffer: Arc<DurabilityBuffer>,
        timeout: Duration,
    ) -> Self {
        Self {
            stores,
            buffer,
            timeout,
        }
    }

    /// Persist one record to both stores.
    ///
    /// Store failures are never returned; they decide buffering. Waits while
    /// the buffer is full. Errors only once the buffer has been closed.
    pub async fn submit(&self, record: EventRecord) -> Result<WriteOutcome> {
        let mut pending = PendingStores::none();
        for role in StoreRole::ALL {
            let store = self.stores.get(role);
            if !write_attendance(store, role, &record.attendance, self.timeout).await {
                pending.insert(role);
            }
        }

        if !pending.is_empty() {
            warn!(stores = ?pending, "attendance write failed, buffering record");
            self.buffer
                .push(BufferedRecord::new(record.clone(), pending))
                .await?;
        }

        let mut audit_failed = PendingStores::none();
        for role in StoreRole::ALL {
            let store = self.stores.get(role);
            if !write_audit(store, role, &record.audit, self.timeout).await {
                audit_failed.insert(role);
            }
        }

        Ok(WriteOutcome {
            pending,
            audit_failed,
        })
    }
}

/// Attendance and pause inserts against one store. Both are attempted even
/// if the first fails; returns whether both succeeded.
pub(crate) async fn write_attendance<S: StoreHandle>(
    store: &S,
    role: StoreRole,
    fact: &AttendanceFact,
    timeout: Duration,
) -> bool {
    let attendance = bounded(timeout, store.insert_attendance(&fact.departure_time)).await;
    if let Err(e) = &attendance {
        warn!(store = %role, error = %e, "attendance insert failed");
    }

    let pause = bounded(
        timeout,
        store.insert_pause(&fact.departure_time, &fact.return_time, fact.break_kind),
    )
    .await;
    if let Err(e) = &pause {
        warn!(store = %role, error = %e, "pause insert failed");
    }

    attendance.is_ok() && pause.is_ok()
}

/// Best-effort audit insert against one store.
pub(crate) async fn write_audit<S: StoreHandle>(
    store: &S,
    role: StoreRole,
    fact: &AuditFact,
    timeout: Duration,
) -> bool {
    let result = bounded(
        timeout,
        store.insert_audit(&fact.subject_id, &fact.action, &fact.hostname, &fact.source_ip),
    )
    .await;

    match result {
        Ok(()) => {
            debug!(store = %role, "audit entry written");
            true
        }
        Err(e) => {
            warn!(store = %role, error = %e, "audit insert failed");
            false
        }
    }
}
