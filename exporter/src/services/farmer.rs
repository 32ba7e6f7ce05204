//! Farmer metrics: pool partials, proofs and polled pool point totals.

use std::sync::Arc;

use bytes::Bytes;
use prometheus::{CounterVec, GaugeVec};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::RegistryError;
use crate::metrics::LazyCounter;
use crate::types::{Service, WebsocketResponse};

use super::{CommonMetrics, ServiceContext, ServiceMetrics, parse_body, parse_payload};

const SERVICE: Service = Service::Farmer;

#[derive(Debug, Deserialize)]
struct SubmittedPartial {
    launcher_id: String,
    current_difficulty: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PoolConfig {
    launcher_id: String,
}

#[derive(Debug, Deserialize)]
struct PoolState {
    points_found_since_start: Option<f64>,
    points_acknowledged_since_start: Option<f64>,
    pool_config: PoolConfig,
}

#[derive(Debug, Deserialize)]
struct PoolStatePayload {
    #[serde(default)]
    pool_state: Vec<PoolState>,
}

/// Per-pool point totals, which the farmer only exposes over RPC.
#[derive(Clone)]
struct PoolStateMetrics {
    points_found: GaugeVec,
    points_acknowledged: GaugeVec,
}

impl PoolStateMetrics {
    fn receive(&self, origin: &str, body: &[u8]) {
        let Some(payload) = parse_body::<PoolStatePayload>(origin, "get_pool_state", body) else {
            return;
        };
        for pool in payload.pool_state {
            let labels = [pool.pool_config.launcher_id.as_str()];
            if let Some(found) = pool.points_found_since_start {
                self.points_found.with_label_values(&labels).set(found);
            }
            if let Some(acknowledged) = pool.points_acknowledged_since_start {
                self.points_acknowledged
                    .with_label_values(&labels)
                    .set(acknowledged);
            }
        }
    }
}

/// Metrics for the farmer.
pub struct FarmerMetrics {
    ctx: Arc<ServiceContext>,
    common: CommonMetrics,
    submitted_partials: CounterVec,
    pool_difficulty: GaugeVec,
    proofs_found: LazyCounter,
    signage_points: LazyCounter,
    pool_state: PoolStateMetrics,
}

impl FarmerMetrics {
    fn receive_partial(&self, resp: &WebsocketResponse) {
        let Some(partial) = parse_payload::<SubmittedPartial>(resp) else {
            return;
        };
        let labels = [partial.launcher_id.as_str()];
        self.submitted_partials.with_label_values(&labels).inc();
        if let Some(difficulty) = partial.current_difficulty {
            self.pool_difficulty.with_label_values(&labels).set(difficulty);
        }
    }
}

impl ServiceMetrics for FarmerMetrics {
    fn init_metrics(ctx: Arc<ServiceContext>) -> Result<Self, RegistryError> {
        let r = &ctx.registry;
        Ok(Self {
            common: CommonMetrics::new(r, SERVICE)?,
            submitted_partials: r.new_counter_vec(
                SERVICE,
                "submitted_partials_total",
                "Partials submitted to each pool",
                &["launcher_id"],
            )?,
            pool_difficulty: r.new_gauge_vec(
                SERVICE,
                "pool_difficulty",
                "Current partial difficulty of each pool",
                &["launcher_id"],
            )?,
            proofs_found: r.new_counter(SERVICE, "proofs_found_total", "Proofs found by the farmer")?,
            signage_points: r.new_counter(
                SERVICE,
                "signage_points_total",
                "Signage points received by the farmer",
            )?,
            pool_state: PoolStateMetrics {
                points_found: r.new_gauge_vec(
                    SERVICE,
                    "pool_points_found_since_start",
                    "Pool points found since the farmer started",
                    &["launcher_id"],
                )?,
                points_acknowledged: r.new_gauge_vec(
                    SERVICE,
                    "pool_points_acknowledged_since_start",
                    "Pool points acknowledged by the pool since the farmer started",
                    &["launcher_id"],
                )?,
            },
            ctx,
        })
    }

    fn initial_data(&self) {
        self.ctx.request(SERVICE, "get_connections", json!({}));
    }

    fn setup_polling_metrics(&self) {
        let pool_state = self.pool_state.clone();
        let origin = SERVICE.origin(self.ctx.registry.namespace());
        self.ctx.poll(
            SERVICE,
            "get_pool_state",
            self.ctx.config.polling.pool_state_interval,
            move |body: &Bytes| pool_state.receive(&origin, body),
        );
    }

    fn receive_response(&self, resp: &WebsocketResponse) {
        if self.common.receive(resp) {
            return;
        }
        match resp.command.as_str() {
            "submitted_partial" => self.receive_partial(resp),
            "proof" => self.proofs_found.inc(),
            "new_signage_point" => self.signage_points.inc(),
            "get_pool_state" => self.pool_state.receive(&resp.origin, &resp.data),
            _ => debug!(command = %resp.command, "ignoring unknown command"),
        }
    }

    fn disconnected(&self) {
        self.common.reset_connections();
    }

    fn reconnected(&self) {
        self.initial_data();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::metrics::test_util::sample;
    use crate::services::test_support::harness;
    use crate::transport::mock::event;

    const ORIGIN: &str = "chik_farmer";

    #[test]
    fn partials_are_counted_per_pool() {
        let h = harness();
        let farmer = FarmerMetrics::init_metrics(Arc::clone(&h.ctx)).expect("init");

        for difficulty in [10, 12] {
            farmer.receive_response(&event(
                ORIGIN,
                "submitted_partial",
                &format!(r#"{{"launcher_id": "0xaa", "current_difficulty": {difficulty}}}"#),
            ));
        }
        farmer.receive_response(&event(ORIGIN, "proof", "{}"));

        let text = h.registry.snapshot();
        assert_eq!(
            sample(&text, r#"chik_farmer_submitted_partials_total{launcher_id="0xaa"}"#),
            Some(2.0)
        );
        assert_eq!(
            sample(&text, r#"chik_farmer_pool_difficulty{launcher_id="0xaa"}"#),
            Some(12.0)
        );
        assert_eq!(sample(&text, "chik_farmer_proofs_found_total"), Some(1.0));
        assert!(!text.contains("chik_farmer_signage_points_total"));
    }

    #[test]
    fn partial_without_launcher_is_dropped() {
        let h = harness();
        let farmer = FarmerMetrics::init_metrics(Arc::clone(&h.ctx)).expect("init");

        farmer.receive_response(&event(ORIGIN, "submitted_partial", r#"{"current_difficulty": 1}"#));
        assert!(!h.registry.snapshot().contains("submitted_partials_total{"));
    }

    #[tokio::test(start_paused = true)]
    async fn pool_state_is_polled() {
        let h = harness();
        h.requester.respond(
            "get_pool_state",
            r#"{"pool_state": [
                {"points_found_since_start": 40, "points_acknowledged_since_start": 38,
                 "pool_config": {"launcher_id": "0xaa"}},
                {"points_found_since_start": 5, "pool_config": {"launcher_id": "0xbb"}}
            ], "success": true}"#,
        );
        let farmer = FarmerMetrics::init_metrics(Arc::clone(&h.ctx)).expect("init");

        farmer.setup_polling_metrics();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let text = h.registry.snapshot();
        assert_eq!(
            sample(&text, r#"chik_farmer_pool_points_found_since_start{launcher_id="0xaa"}"#),
            Some(40.0)
        );
        assert_eq!(
            sample(&text, r#"chik_farmer_pool_points_acknowledged_since_start{launcher_id="0xaa"}"#),
            Some(38.0)
        );
        assert_eq!(
            sample(&text, r#"chik_farmer_pool_points_found_since_start{launcher_id="0xbb"}"#),
            Some(5.0)
        );
        assert_eq!(h.requester.calls(), vec![(Service::Farmer, "get_pool_state".to_string())]);

        h.ctx.poller().shutdown().await;
    }
}
