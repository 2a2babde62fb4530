//! Bounded in-memory holding area for records that did not fully commit.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Semaphore;

use crate::record::EventRecord;
use crate::stores::PendingStores;
use crate::{Error, Result};

/// A record waiting in the buffer, tagged with the stores that still owe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedRecord {
    pub record: EventRecord,
    pub pending: PendingStores,
    /// Failed replay attempts so far.
    pub attempts: u32,
}

impl BufferedRecord {
    pub fn new(record: EventRecord, pending: PendingStores) -> Self {
        Self {
            record,
            pending,
            attempts: 0,
        }
    }
}

/// Bounded FIFO shared by the write path and the replayer.
///
/// `push` waits for a free slot; `drain_one` never waits. Each free slot is a
/// semaphore permit, so `available permits + len + held == capacity` holds
/// whenever the queue lock is released, where `held` counts entries taken
/// through a [`Held`] guard and not yet released.
pub struct DurabilityBuffer {
    entries: Mutex<VecDeque<BufferedRecord>>,
    slots: Semaphore,
    capacity: usize,
}

impl DurabilityBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            slots: Semaphore::new(capacity),
            capacity,
        }
    }

    /// Append an entry, waiting while the buffer is full.
    ///
    /// Fails only after [`close`](Self::close).
    pub async fn push(&self, entry: BufferedRecord) -> Result<()> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| Error::BufferClosed)?;
        permit.forget();
        self.lock().push_back(entry);
        Ok(())
    }

    /// Append an entry without waiting. Hands the entry back when no slot is
    /// free or the buffer is closed.
    pub fn try_push(&self, entry: BufferedRecord) -> std::result::Result<(), BufferedRecord> {
        match self.slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.lock().push_back(entry);
                Ok(())
            }
            Err(_) => Err(entry),
        }
    }

    /// Remove the oldest entry, or `None` when empty.
    pub fn drain_one(&self) -> Option<BufferedRecord> {
        let entry = self.lock().pop_front()?;
        self.slots.add_permits(1);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reject all further pushes and wake every blocked pusher.
    ///
    /// Entries already buffered stay drainable.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Take entries off the front while keeping their slots reserved.
    pub(crate) fn hold(&self) -> Held<'_> {
        Held {
            buffer: self,
            kept: Vec::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<BufferedRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Entries taken off the front of a [`DurabilityBuffer`] whose slots stay
/// reserved, so no pusher can claim them in the meantime.
///
/// Every taken entry must be either kept or released. Dropping the guard
/// puts the kept entries back at the front, oldest first, ahead of anything
/// pushed while they were held.
pub(crate) struct Held<'a> {
    buffer: &'a DurabilityBuffer,
    kept: Vec<BufferedRecord>,
}

impl Held<'_> {
    pub(crate) fn take(&mut self) -> Option<BufferedRecord> {
        self.buffer.lock().pop_front()
    }

    /// Return the entry to the buffer when the guard drops.
    pub(crate) fn keep(&mut self, entry: BufferedRecord) {
        self.kept.push(entry);
    }

    /// Give up the slot of an entry that is done with.
    pub(crate) fn release(&mut self) {
        self.buffer.slots.add_permits(1);
    }
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        let mut entries = self.buffer.lock();
        for entry in self.kept.drain(..).rev() {
            entries.push_front(entry);
        }
    }
}
