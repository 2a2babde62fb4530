//! Wiring of the relay components.

use std::sync::Arc;
use std::time::Duration;

use storage::StoreHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::buffer::DurabilityBuffer;
use crate::coordinator::WriteCoordinator;
use crate::ingest::{Listener, DEFAULT_MAX_FRAME_SIZE};
use crate::monitor::HealthMonitor;
use crate::replay::{ReplayPolicy, Replayer};
use crate::stores::StorePair;
use crate::Result;

/// Tuning knobs of the relay core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub buffer_capacity: usize,
    pub probe_interval: Duration,
    /// Upper bound on every probe and insert.
    pub store_timeout: Duration,
    pub replay: ReplayPolicy,
    pub max_connections: usize,
    pub max_frame_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 100_000,
            probe_interval: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
            replay: ReplayPolicy::default(),
            max_connections: 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// A fully wired relay over two stores.
pub struct Relay<S> {
    stores: Arc<StorePair<S>>,
    buffer: Arc<DurabilityBuffer>,
    coordinator: Arc<WriteCoordinator<S>>,
    replayer: Arc<Replayer<S>>,
    config: RelayConfig,
}

impl<S: StoreHandle> Relay<S> {
    pub fn new(stores: StorePair<S>, config: RelayConfig) -> Self {
        let stores = Arc::new(stores);
        let buffer = Arc::new(DurabilityBuffer::new(config.buffer_capacity));
        let coordinator = Arc::new(WriteCoordinator::new(
            Arc::clone(&stores),
            Arc::clone(&buffer),
            config.store_timeout,
        ));
        let replayer = Arc::new(Replayer::new(
            Arc::clone(&stores),
            Arc::clone(&buffer),
            config.replay,
            config.store_timeout,
        ));

        Self {
            stores,
            buffer,
            coordinator,
            replayer,
            config,
        }
    }

    pub fn stores(&self) -> &StorePair<S> {
        &self.stores
    }

    pub fn buffer(&self) -> &DurabilityBuffer {
        &self.buffer
    }

    pub fn coordinator(&self) -> &WriteCoordinator<S> {
        &self.coordinator
    }

    /// Build the health monitor. [`run`](Self::run) does this itself.
    pub fn monitor(&self) -> HealthMonitor<S> {
        HealthMonitor::new(
            Arc::clone(&self.stores),
            Arc::clone(&self.replayer),
            self.config.probe_interval,
            self.config.store_timeout,
        )
    }

    /// Serve clients and monitor store health until `shutdown` flips to
    /// `true`, then close the buffer.
    ///
    /// The monitor stops whenever serving ends, including on a listener error.
    pub async fn run(&self, tcp: TcpListener, shutdown: watch::Receiver<bool>) -> Result<()> {
        let (stop_monitor, monitor_stop) = watch::channel(false);
        let monitor = tokio::spawn(self.monitor().run(monitor_stop));

        let listener = Listener::new(
            Arc::clone(&self.coordinator),
            self.config.max_connections,
            self.config.max_frame_size,
        );
        let served = listener.serve(tcp, shutdown).await;

        self.buffer.close();
        let _ = stop_monitor.send(true);
        if let Err(e) = monitor.await {
            warn!(error = %e, "health monitor task failed");
        }

        let unreplayed = self.buffer.len();
        if unreplayed > 0 {
            warn!(unreplayed, "shutting down with buffered records; they will be lost");
        }
        info!("relay stopped");
        served
    }
}
