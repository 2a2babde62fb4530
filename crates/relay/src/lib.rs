//! breaklog relay: dual-store replication of attendance events.
//!
//! Clients stream event records over a persistent connection. Each record is
//! written to two failure-independent stores, *primary* and *secondary*.
//! When either store is unreachable the record is held in a bounded
//! in-memory buffer and replayed once the store comes back.
//!
//! # Overview
//!
//! - **EventRecord**: a validated attendance fact plus an audit fact.
//! - **WriteCoordinator**: attempts every write against both stores and
//!   buffers records whose attendance fact did not land everywhere. Audit
//!   writes are best-effort and never buffered.
//! - **DurabilityBuffer**: bounded FIFO. A full buffer blocks ingestion
//!   instead of dropping data.
//! - **HealthMonitor**: probes both stores on a fixed interval and starts a
//!   replay pass when a store goes from down to up.
//! - **Replayer**: drains buffered records into the recovered store, once
//!   each by default. Passes are serialized process-wide.
//! - **Listener**: accepts newline-delimited JSON frames over TCP.
//!
//! The buffer lives only as long as the process. Nothing here promises
//! exactly-once delivery or cross-store consistency.
//!
//! # Example
//!
//! ```no_run
//! use relay::{Relay, RelayConfig, StorePair};
//! use storage::SqliteStore;
//! use tokio::net::TcpListener;
//! use tokio::sync::watch;
//!
//! # async fn example() -> relay::Result<()> {
//! let stores = StorePair::new(
//!     SqliteStore::open("primary.db")?,
//!     SqliteStore::open("secondary.db")?,
//! );
//! let relay = Relay::new(stores, RelayConfig::default());
//!
//! let tcp = TcpListener::bind("0.0.0.0:8080").await?;
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! relay.run(tcp, shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

mod buffer;
mod coordinator;
mod error;
mod ingest;
mod monitor;
mod record;
mod replay;
mod service;
mod stores;

#[cfg(test)]
mod testing;

pub use buffer::{BufferedRecord, DurabilityBuffer};
pub use coordinator::{WriteCoordinator, WriteOutcome};
pub use error::{Error, Result};
pub use ingest::{handle_connection, ConnectionStats, Listener, DEFAULT_MAX_FRAME_SIZE};
pub use monitor::{Health, HealthMonitor, TickEvent, Transition};
pub use record::{AttendanceFact, AuditFact, DecodeError, EventRecord};
pub use replay::{ReplayPolicy, ReplayReport, Replayer};
pub use service::{Relay, RelayConfig};
pub use stores::{bounded, PendingStores, StorePair, StoreRole};
