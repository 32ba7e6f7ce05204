//! Lazily registered gauges and counters.
//!
//! A lazy metric starts out unregistered. Its first write registers it with
//! the [`MetricsRegistry`] exactly once, so a metric that never fires is
//! absent from scrapes while one observed at zero is exported as `0`.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use prometheus::core::Collector;
use prometheus::{Counter, Gauge};
use tracing::error;

use super::registry::MetricsRegistry;

/// Registration state of a lazy metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LazyState {
    /// Never written; not visible to scrapes.
    Unregistered,
    /// Written at least once and exported.
    Registered,
    /// Written, but the registry refused it (conflicting identity).
    Rejected,
}

struct Inner<M> {
    metric: M,
    registry: MetricsRegistry,
    // Set exactly once, on first write; `true` when the registry accepted it.
    registered: OnceCell<bool>,
}

/// A metric registered on its first write.
///
/// Clones share the same metric and registration state.
pub struct LazyMetric<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for LazyMetric<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub type LazyGauge = LazyMetric<Gauge>;
pub type LazyCounter = LazyMetric<Counter>;

impl<M> LazyMetric<M>
where
    M: Collector + Clone + 'static,
{
    pub fn new(metric: M, registry: MetricsRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                metric,
                registry,
                registered: OnceCell::new(),
            }),
        }
    }

    pub fn state(&self) -> LazyState {
        match self.inner.registered.get() {
            None => LazyState::Unregistered,
            Some(true) => LazyState::Registered,
            Some(false) => LazyState::Rejected,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state() == LazyState::Registered
    }

    /// Applies `update` to the local metric, then registers it if this is
    /// the first write. The value is in place before the metric becomes
    /// visible, so a concurrent scrape never sees a placeholder zero.
    fn write(&self, update: impl FnOnce(&M)) {
        update(&self.inner.metric);
        self.inner.registered.get_or_init(|| {
            match self
                .inner
                .registry
                .register(Box::new(self.inner.metric.clone()))
            {
                Ok(()) => true,
                Err(e) => {
                    error!("lazy metric registration failed: {e}");
                    false
                }
            }
        });
    }
}

impl LazyGauge {
    pub fn set(&self, value: f64) {
        self.write(|g| g.set(value));
    }

    pub fn inc(&self) {
        self.write(|g| g.inc());
    }

    pub fn add(&self, delta: f64) {
        self.write(|g| g.add(delta));
    }

    /// Sets an exported gauge back to 0. A gauge that was never written
    /// stays unexported.
    pub fn zero(&self) {
        if self.is_registered() {
            self.inner.metric.set(0.0);
        }
    }

    /// Current local value, whether or not it is exported yet.
    pub fn get(&self) -> f64 {
        self.inner.metric.get()
    }
}

impl LazyCounter {
    pub fn inc(&self) {
        self.write(|c| c.inc());
    }

    /// Increments by `delta`; negative deltas are ignored since counters
    /// only go up.
    pub fn inc_by(&self, delta: f64) {
        if delta < 0.0 {
            return;
        }
        self.write(|c| c.inc_by(delta));
    }

    pub fn get(&self) -> f64 {
        self.inner.metric.get()
    }
}
