//! In-crate test doubles.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use storage::{Error, Result, StoreHandle};

use crate::record::{AttendanceFact, AuditFact, EventRecord};

/// A record whose `break_kind` identifies it.
pub fn record(kind: i64) -> EventRecord {
    EventRecord {
        attendance: AttendanceFact {
            departure_time: "08:00".into(),
            return_time: "08:15".into(),
            break_kind: kind,
        },
        audit: AuditFact {
            subject_id: "E1".into(),
            action: "pause".into(),
            hostname: "H1".into(),
            source_ip: "10.0.0.1".into(),
        },
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Rows {
    pub attendance: Vec<String>,
    pub pauses: Vec<i64>,
    pub audits: Vec<String>,
    pub probes: usize,
}

/// An in-memory store whose reachability can be switched at runtime.
#[derive(Default)]
pub struct FlakyStore {
    down: AtomicBool,
    writes_broken: AtomicBool,
    audit_broken: AtomicBool,
    delay_ms: AtomicU64,
    rows: Mutex<Rows>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn down() -> Self {
        let store = Self::default();
        store.set_down(true);
        store
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail every insert while probes keep succeeding.
    pub fn break_writes(&self, broken: bool) {
        self.writes_broken.store(broken, Ordering::SeqCst);
    }

    /// Make every insert take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fail only audit inserts, leaving everything else reachable.
    pub fn break_audit(&self, broken: bool) {
        self.audit_broken.store(broken, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Rows {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(Error::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }

    async fn check_write(&self) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check()?;
        if self.writes_broken.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("disk full".into()));
        }
        Ok(())
    }
}

impl StoreHandle for FlakyStore {
    async fn insert_attendance(&self, timestamp: &str) -> Result<()> {
        self.check_write().await?;
        self.lock().attendance.push(timestamp.to_owned());
        Ok(())
    }

    async fn insert_pause(&self, _departure: &str, _return_time: &str, kind: i64) -> Result<()> {
        self.check_write().await?;
        self.lock().pauses.push(kind);
        Ok(())
    }

    async fn insert_audit(
        &self,
        subject: &str,
        _action: &str,
        _hostname: &str,
        _ip: &str,
    ) -> Result<()> {
        self.check_write().await?;
        if self.audit_broken.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("audit table locked".into()));
        }
        self.lock().audits.push(subject.to_owned());
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        self.lock().probes += 1;
        self.check()
    }
}
