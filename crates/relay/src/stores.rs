//! The two replicated stores and the bookkeeping around them.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Which of the two replicas a handle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreRole {
    Primary,
    Secondary,
}

impl StoreRole {
    /// Both roles, in write order.
    pub const ALL: [StoreRole; 2] = [StoreRole::Primary, StoreRole::Secondary];

    fn bit(self) -> u8 {
        match self {
            StoreRole::Primary => 0b01,
            StoreRole::Secondary => 0b10,
        }
    }
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreRole::Primary => f.write_str("primary"),
            StoreRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// The primary and secondary store handles.
#[derive(Debug)]
pub struct StorePair<S> {
    pub primary: S,
    pub secondary: S,
}

impl<S> StorePair<S> {
    pub fn new(primary: S, secondary: S) -> Self {
        Self { primary, secondary }
    }

    pub fn get(&self, role: StoreRole) -> &S {
        match role {
            StoreRole::Primary => &self.primary,
            StoreRole::Secondary => &self.secondary,
        }
    }
}

/// The set of stores that still owe a record its attendance fact.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingStores(u8);

impl PendingStores {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn only(role: StoreRole) -> Self {
        Self(role.bit())
    }

    pub fn insert(&mut self, role: StoreRole) {
        self.0 |= role.bit();
    }

    pub fn remove(&mut self, role: StoreRole) {
        self.0 &= !role.bit();
    }

    pub fn contains(&self, role: StoreRole) -> bool {
        self.0 & role.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = StoreRole> + '_ {
        StoreRole::ALL.into_iter().filter(|role| self.contains(*role))
    }
}

impl FromIterator<StoreRole> for PendingStores {
    fn from_iter<I: IntoIterator<Item = StoreRole>>(iter: I) -> Self {
        let mut pending = Self::none();
        for role in iter {
            pending.insert(role);
        }
        pending
    }
}

impl fmt::Debug for PendingStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Run one store operation under the store timeout.
pub async fn bounded<F>(limit: Duration, op: F) -> storage::Result<()>
where
    F: Future<Output = storage::Result<()>>,
{
    tokio::time::timeout(limit, op)
        .await
        .unwrap_or(Err(storage::Error::Timeout(limit)))
}
