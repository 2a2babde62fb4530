//! Store health monitoring.

use std::sync::Arc;
use std::time::Duration;

use storage::StoreHandle;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::replay::{ReplayReport, Replayer};
use crate::stores::{bounded, StorePair, StoreRole};

/// Last observed reachability of one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    #[default]
    Up,
    Down,
}

/// A change of [`Health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentDown,
    CameUp,
}

impl Health {
    /// Fold one probe result into the state.
    pub fn observe(self, probe_ok: bool) -> (Health, Option<Transition>) {
        match (self, probe_ok) {
            (Health::Up, false) => (Health::Down, Some(Transition::WentDown)),
            (Health::Down, true) => (Health::Up, Some(Transition::CameUp)),
            (state, _) => (state, None),
        }
    }
}

/// What one tick did to one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent {
    pub role: StoreRole,
    pub transition: Transition,
    /// Present when the transition triggered a replay pass.
    pub replay: Option<ReplayReport>,
}

/// Periodically probes both stores and replays the buffer into any store
/// that comes back.
///
/// Sole owner of the per-store health state.
pub struct HealthMonitor<S> {
    stores: Arc<StorePair<S>>,
    replayer: Arc<Replayer<S>>,
    primary: Health,
    secondary: Health,
    period: Duration,
    timeout: Duration,
}

impl<S: StoreHandle> HealthMonitor<S> {
    pub fn new(
        stores: Arc<StorePair<S>>,
        replayer: Arc<Replayer<S>>,
        period: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            stores,
            replayer,
            primary: Health::Up,
            secondary: Health::Up,
            period,
            timeout,
        }
    }

    pub fn health(&self, role: StoreRole) -> Health {
        match role {
            StoreRole::Primary => self.primary,
            StoreRole::Secondary => self.secondary,
        }
    }

    fn health_mut(&mut self, role: StoreRole) -> &mut Health {
        match role {
            StoreRole::Primary => &mut self.primary,
            StoreRole::Secondary => &mut self.secondary,
        }
    }

    /// Probe primary, then secondary. A slow probe delays the next one.
    pub async fn tick(&mut self) -> Vec<TickEvent> {
        let mut events = Vec::new();
        for role in StoreRole::ALL {
            if let Some(event) = self.check(role).await {
                events.push(event);
            }
        }
        events
    }

    async fn check(&mut self, role: StoreRole) -> Option<TickEvent> {
        let probe = bounded(self.timeout, self.stores.get(role).probe()).await;
        if let Err(e) = &probe {
            debug!(store = %role, error = %e, "probe failed");
        }

        let (next, transition) = self.health(role).observe(probe.is_ok());
        *self.health_mut(role) = next;

        let transition = transition?;
        let replay = match transition {
            Transition::WentDown => {
                warn!(store = %role, "store is down, failed writes will be buffered");
                None
            }
            Transition::CameUp => {
                info!(store = %role, "store is back online, replaying buffer");
                Some(self.replayer.replay(role).await)
            }
        };

        Some(TickEvent {
            role,
            transition,
            replay,
        })
    }

    /// Tick every period until `shutdown` flips to `true`. The first probe
    /// happens one period after start.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("health monitor stopping");
                        return;
                    }
                }
            }
        }
    }
}
