//! Relational store handles for breaklog.
//!
//! This crate defines what the relay needs from a backing store and ships the
//! SQLite implementation used in production and in tests.
//!
//! # Overview
//!
//! The relay writes every event twice, once to a *primary* and once to a
//! *secondary* store. Both are driven through the same [`StoreHandle`]
//! contract:
//!
//! - `insert_attendance`: the start of an attendance interval
//! - `insert_pause`: one pause interval (departure, return, kind)
//! - `insert_audit`: one audit log entry
//! - `probe`: liveness check used by the health monitor
//!
//! Every operation is a single atomic insert. Errors are reported as
//! [`Error`] and are never fatal to the caller; the relay decides whether a
//! failure means buffering.
//!
//! # Example
//!
//! ```no_run
//! use storage::{SqliteStore, StoreHandle};
//!
//! # async fn example() -> storage::Result<()> {
//! let store = SqliteStore::open("primary.db")?;
//! store.probe().await?;
//! store.insert_attendance("08:00").await?;
//! store.insert_pause("08:00", "08:15", 1).await?;
//! store.insert_audit("E1", "pause", "H1", "10.0.0.1").await?;
//!
//! let counts = store.counts()?;
//! assert_eq!(counts.pauses, 1);
//! # Ok(())
//! # }
//! ```

mod error;
mod handle;
mod store;

pub use error::{Error, Result};
pub use handle::StoreHandle;
pub use store::{PauseRow, SqliteStore, TableCounts};
