//! Periodic subscription expiry sweep.
//!
//! Runs [`SubscriptionManager::sweep_expired`] on a fixed interval so
//! lapsed subscriptions stop governing plan limits even when no webhook
//! arrives for them.

use super::gateway::PaymentGateway;
use super::manager::SubscriptionManager;
use crate::config::SweepConfig;
use crate::storage::{OrganizationStore, PaymentStore, PlanStore, UserStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Request shutdown and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// Spawn the sweeper.
///
/// The first sweep runs after one full interval, not immediately, so a
/// restart loop cannot hammer the store. Sweep errors are logged and the
/// loop continues; the sweep itself is idempotent.
pub fn spawn_sweeper<S, G>(
    manager: SubscriptionManager<S, G>,
    config: SweepConfig,
) -> SweeperHandle
where
    S: OrganizationStore + UserStore + PaymentStore + PlanStore + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately on the first tick
        ticker.tick().await;

        info!(interval_secs = config.interval.as_secs(), "Subscription sweeper started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Subscription sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match manager.sweep_expired().await {
                        Ok(swept) if swept > 0 => {
                            info!(swept, "Sweep pass expired subscriptions");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "Sweep pass failed");
                        }
                    }
                }
            }
        }
    });

    SweeperHandle { shutdown_tx, task }
}
