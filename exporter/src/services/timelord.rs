//! Timelord metrics: proof of time races, compact proofs and VDF speed.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::RegistryError;
use crate::metrics::{LazyCounter, LazyGauge};
use crate::types::{Service, WebsocketResponse};

use super::{CommonMetrics, ServiceContext, ServiceMetrics, parse_payload};

const SERVICE: Service = Service::Timelord;

#[derive(Debug, Deserialize)]
struct FinishedPot {
    estimated_ips: Option<f64>,
}

/// Metrics for the timelord.
pub struct TimelordMetrics {
    ctx: Arc<ServiceContext>,
    common: CommonMetrics,
    fastest_timelord: LazyCounter,
    slow_timelord: LazyCounter,
    estimated_ips: LazyGauge,
    compact_proofs: LazyCounter,
    new_peaks: LazyCounter,
}

impl TimelordMetrics {
    fn receive_finished_pot(&self, resp: &WebsocketResponse) {
        let Some(pot) = parse_payload::<FinishedPot>(resp) else {
            return;
        };
        self.fastest_timelord.inc();
        if let Some(ips) = pot.estimated_ips {
            self.estimated_ips.set(ips);
        }
    }
}

impl ServiceMetrics for TimelordMetrics {
    fn init_metrics(ctx: Arc<ServiceContext>) -> Result<Self, RegistryError> {
        let r = &ctx.registry;
        Ok(Self {
            common: CommonMetrics::new(r, SERVICE)?,
            fastest_timelord: r.new_counter(
                SERVICE,
                "fastest_timelord_total",
                "Times this timelord was first to finish a proof of time",
            )?,
            slow_timelord: r.new_counter(
                SERVICE,
                "slow_timelord_total",
                "Times this timelord skipped a peak another timelord finished first",
            )?,
            estimated_ips: r.new_gauge(
                SERVICE,
                "estimated_ips",
                "Estimated VDF iterations per second",
            )?,
            compact_proofs: r.new_counter(
                SERVICE,
                "compact_proofs_total",
                "Compact proofs of time produced",
            )?,
            new_peaks: r.new_counter(SERVICE, "new_peak_total", "New peaks received")?,
            ctx,
        })
    }

    fn initial_data(&self) {
        self.ctx.request(SERVICE, "get_connections", json!({}));
    }

    fn setup_polling_metrics(&self) {}

    fn receive_response(&self, resp: &WebsocketResponse) {
        if self.common.receive(resp) {
            return;
        }
        match resp.command.as_str() {
            "finished_pot" => self.receive_finished_pot(resp),
            "skipping_peak" => self.slow_timelord.inc(),
            "new_compact_proof" => self.compact_proofs.inc(),
            "new_peak" => self.new_peaks.inc(),
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
    use super::*;
    use crate::metrics::test_util::sample;
    use crate::services::test_support::harness;
    use crate::transport::mock::event;

    const ORIGIN: &str = "chik_timelord";

    #[test]
    fn events_drive_counters() {
        let h = harness();
        let timelord = TimelordMetrics::init_metrics(Arc::clone(&h.ctx)).expect("init");

        timelord.receive_response(&event(ORIGIN, "finished_pot", r#"{"estimated_ips": 180000.5}"#));
        timelord.receive_response(&event(ORIGIN, "finished_pot", r#"{"estimated_ips": 181000}"#));
        timelord.receive_response(&event(ORIGIN, "skipping_peak", "{}"));
        timelord.receive_response(&event(ORIGIN, "new_peak", "{}"));

        let text = h.registry.snapshot();
        assert_eq!(sample(&text, "chik_timelord_fastest_timelord_total"), Some(2.0));
        assert_eq!(sample(&text, "chik_timelord_estimated_ips"), Some(181000.0));
        assert_eq!(sample(&text, "chik_timelord_slow_timelord_total"), Some(1.0));
        assert_eq!(sample(&text, "chik_timelord_new_peak_total"), Some(1.0));
        assert!(!text.contains("chik_timelord_compact_proofs_total"));
    }

    #[test]
    fn counters_survive_disconnect() {
        let h = harness();
        let timelord = TimelordMetrics::init_metrics(Arc::clone(&h.ctx)).expect("init");
        timelord.receive_response(&event(ORIGIN, "new_compact_proof", "{}"));

        timelord.disconnected();
        timelord.reconnected();

        let text = h.registry.snapshot();
        assert_eq!(sample(&text, "chik_timelord_compact_proofs_total"), Some(1.0));
        assert_eq!(
            h.stream.take_sent(),
            vec![(ORIGIN.to_string(), "get_connections".to_string())]
        );
    }
}
