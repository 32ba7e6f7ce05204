//! Recurring timers for metrics that have no push event.
//!
//! Each timer runs on its own task so a slow poll never delays the stream
//! dispatcher or another timer. All timers share one cancellation token and
//! are stopped together on shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shortest period a timer will run at.
pub const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Owner of every polling task.
#[derive(Clone, Default)]
pub struct Poller {
    cancel: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `tick` every `period`, starting immediately.
    ///
    /// A tick that overruns its period delays the next one instead of
    /// firing a burst to catch up. Periods shorter than [`MIN_PERIOD`] are
    /// raised to it.
    pub fn every<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            warn!(poll = name, "poller already stopped, not scheduling");
            return;
        }

        if period < MIN_PERIOD {
            warn!(poll = name, ?period, "polling period too short, using {MIN_PERIOD:?}");
        }
        let period = period.max(MIN_PERIOD);

        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        debug!(poll = name, "polling");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tick() => {}
                        }
                    }
                }
            }
            debug!(poll = name, "polling stopped");
        });

        self.tasks.lock().push(task);
    }

    /// Number of scheduled timers.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every timer and waits for in-flight ticks to be abandoned.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("polling task ended abnormally: {e}");
            }
        }
    }
}
