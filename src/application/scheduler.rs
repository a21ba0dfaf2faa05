use super::dispatch::TicketDispatcher;
use super::reconciliation::ReconciliationSweeper;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Spawns a task running `tick` every `interval` until `shutdown` flips to
/// `true` or its sender is dropped.
///
/// A slow tick delays the next one instead of piling up extra runs.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(task = name, "periodic task stopped");
                        break;
                    }
                }
            }
        }
    })
}

/// Starts the reconciliation and ticket dispatch sweepers.
pub fn spawn_sweepers(
    reconciler: Arc<ReconciliationSweeper>,
    dispatcher: Arc<TicketDispatcher>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let reconcile = spawn_periodic("reconciliation", interval, shutdown.clone(), move || {
        let reconciler = Arc::clone(&reconciler);
        async move {
            if let Err(err) = reconciler.sweep().await {
                error!(error = %err, "reconciliation sweep aborted");
            }
        }
    });
    let dispatch = spawn_periodic("ticket-dispatch", interval, shutdown, move || {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            if let Err(err) = dispatcher.sweep().await {
                error!(error = %err, "ticket dispatch sweep aborted");
            }
        }
    });
    vec![reconcile, dispatch]
}
