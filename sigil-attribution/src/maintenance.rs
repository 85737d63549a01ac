//! Background maintenance
//!
//! Runs bridge cleanup and registry cleanup on their own intervals until the
//! shutdown token is cancelled.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::AttributionEngine;

/// Totals reported when the loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceSummary {
    pub bridge_runs: u64,
    pub registry_runs: u64,
}

/// Spawn the maintenance loop
pub fn spawn_maintenance(
    engine: Arc<AttributionEngine>,
    shutdown: CancellationToken,
) -> JoinHandle<MaintenanceSummary> {
    tokio::spawn(async move { maintenance_loop(engine, shutdown).await })
}

/// Run maintenance until `shutdown` is cancelled
///
/// The first tick of each interval is skipped so nothing runs at startup.
pub async fn maintenance_loop(
    engine: Arc<AttributionEngine>,
    shutdown: CancellationToken,
) -> MaintenanceSummary {
    let bridge_every = engine.config().bridge.cleanup_interval();
    let registry_every = engine.config().registry.cleanup_interval();
    info!(
        bridge_interval_secs = bridge_every.as_secs(),
        registry_interval_secs = registry_every.as_secs(),
        "Attribution maintenance loop starting"
    );

    let mut bridge_tick = time::interval_at(time::Instant::now() + bridge_every, bridge_every);
    bridge_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut registry_tick =
        time::interval_at(time::Instant::now() + registry_every, registry_every);
    registry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut summary = MaintenanceSummary::default();
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(
                    bridge_runs = summary.bridge_runs,
                    registry_runs = summary.registry_runs,
                    "Attribution maintenance received shutdown signal"
                );
                return summary;
            }

            _ = bridge_tick.tick() => {
                let report = engine.cleanup_bridge(Utc::now()).await;
                summary.bridge_runs += 1;
                debug!(
                    deactivated = report.deactivated_sessions,
                    evicted = report.evicted_sessions,
                    "Bridge maintenance tick"
                );
            }

            _ = registry_tick.tick() => {
                engine.cleanup_registry(Utc::now()).await;
                summary.registry_runs += 1;
            }
        }
    }
}
