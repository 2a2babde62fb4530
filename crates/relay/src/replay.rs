//! Buffer replay into a recovered store.

use std::sync::Arc;
use std::time::Duration;

use storage::StoreHandle;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::buffer::DurabilityBuffer;
use crate::coordinator::{write_attendance, write_audit};
use crate::record::EventRecord;
use crate::stores::{StorePair, StoreRole};

/// How a replay pass treats the entries it drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPolicy {
    /// Write every drained entry to the target once and remove it, whatever
    /// the outcome and whichever store it was buffered for.
    #[default]
    Drain,
    /// Write only the entries the target still owes. Entries owed to the
    /// other store, and failures with attempts left, stay in the buffer at
    /// their original position.
    Retry { max_attempts: u32 },
}

/// Tally of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Entries taken off the buffer.
    pub drained: usize,
    /// Entries no store owes anymore.
    pub restored: usize,
    /// Entries kept because some store still owes them.
    pub requeued: usize,
    /// Entries kept untouched because the target did not owe them.
    pub skipped: usize,
    /// Entries removed although the target write failed.
    pub dropped: usize,
}

/// Drains the buffer into one store at a time.
pub struct Replayer<S> {
    stores: Arc<StorePair<S>>,
    buffer: Arc<DurabilityBuffer>,
    pass: Mutex<()>,
    policy: ReplayPolicy,
    timeout: Duration,
}

impl<S: StoreHandle> Replayer<S> {
    pub fn new(
        stores: Arc<StorePair<S>>,
        buffer: Arc<DurabilityBuffer>,
        policy: ReplayPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            stores,
            buffer,
            pass: Mutex::new(()),
            policy,
            timeout,
        }
    }

    /// Run one replay pass against `target`.
    ///
    /// Passes never overlap. A pass visits each entry that was buffered when
    /// it started at most once; entries pushed during the pass wait for the
    /// next one.
    pub async fn replay(&self, target: StoreRole) -> ReplayReport {
        let _pass = self.pass.lock().await;

        let backlog = self.buffer.len();
        info!(store = %target, backlog, policy = ?self.policy, "replaying buffer");

        let report = match self.policy {
            ReplayPolicy::Drain => self.drain_pass(target, backlog).await,
            ReplayPolicy::Retry { max_attempts } => {
                self.retry_pass(target, backlog, max_attempts.max(1)).await
            }
        };

        info!(
            store = %target,
            drained = report.drained,
            restored = report.restored,
            requeued = report.requeued,
            skipped = report.skipped,
            dropped = report.dropped,
            remaining = self.buffer.len(),
            "replay pass finished"
        );
        report
    }

    async fn drain_pass(&self, target: StoreRole, backlog: usize) -> ReplayReport {
        let mut report = ReplayReport::default();

        for _ in 0..backlog {
            let Some(entry) = self.buffer.drain_one() else {
                break;
            };
            report.drained += 1;

            if self.write(target, &entry.record).await {
                report.restored += 1;
            } else {
                error!(
                    store = %target,
                    departure_time = %entry.record.attendance.departure_time,
                    "replay failed, buffered record lost"
                );
                report.dropped += 1;
            }
        }
        report
    }

    async fn retry_pass(
        &self,
        target: StoreRole,
        backlog: usize,
        max_attempts: u32,
    ) -> ReplayReport {
        let mut report = ReplayReport::default();
        let mut held = self.buffer.hold();

        for _ in 0..backlog {
            let Some(mut entry) = held.take() else {
                break;
            };
            report.drained += 1;

            if !entry.pending.contains(target) {
                report.skipped += 1;
                held.keep(entry);
                continue;
            }

            if self.write(target, &entry.record).await {
                entry.pending.remove(target);
                if entry.pending.is_empty() {
                    report.restored += 1;
                    held.release();
                } else {
                    report.requeued += 1;
                    held.keep(entry);
                }
                continue;
            }

            entry.attempts += 1;
            if entry.attempts >= max_attempts {
                error!(
                    store = %target,
                    attempts = entry.attempts,
                    departure_time = %entry.record.attendance.departure_time,
                    "giving up on buffered record"
                );
                report.dropped += 1;
                held.release();
            } else {
                warn!(store = %target, attempts = entry.attempts, "replay failed, keeping record");
                report.requeued += 1;
                held.keep(entry);
            }
        }
        report
    }

    /// Attendance, pause and audit against `target`. Returns whether the
    /// attendance fact landed.
    async fn write(&self, target: StoreRole, record: &EventRecord) -> bool {
        let store = self.stores.get(target);
        let written = write_attendance(store, target, &record.attendance, self.timeout).await;
        write_audit(store, target, &record.audit, self.timeout).await;
        written
    }
}
