//! Network crawler metrics: peer totals and the software versions peers report.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::RegistryError;
use crate::metrics::LazyGauge;
use crate::types::{Service, WebsocketResponse};

use super::{CommonMetrics, ReplacedGaugeVec, ServiceContext, ServiceMetrics, parse_payload};

const SERVICE: Service = Service::Crawler;

#[derive(Debug, Deserialize)]
struct PeerCounts {
    total_last_5_days: Option<f64>,
    reliable_nodes: Option<f64>,
    ipv4_last_5_days: Option<f64>,
    ipv6_last_5_days: Option<f64>,
    #[serde(default)]
    versions: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct PeerCountsPayload {
    peer_counts: Option<PeerCounts>,
}

/// Metrics for the network crawler.
pub struct CrawlerMetrics {
    ctx: Arc<ServiceContext>,
    common: CommonMetrics,
    total_nodes: LazyGauge,
    reliable_nodes: LazyGauge,
    ipv4_nodes: LazyGauge,
    ipv6_nodes: LazyGauge,
    versions: ReplacedGaugeVec,
}

impl CrawlerMetrics {
    fn request_peer_counts(&self) {
        self.ctx.request(SERVICE, "get_peer_counts", json!({}));
    }

    fn receive_peer_counts(&self, resp: &WebsocketResponse) {
        let Some(counts) = parse_payload::<PeerCountsPayload>(resp).and_then(|p| p.peer_counts) else {
            return;
        };

        for (gauge, value) in [
            (&self.total_nodes, counts.total_last_5_days),
            (&self.reliable_nodes, counts.reliable_nodes),
            (&self.ipv4_nodes, counts.ipv4_last_5_days),
            (&self.ipv6_nodes, counts.ipv6_last_5_days),
        ] {
            if let Some(value) = value {
                gauge.set(value);
            }
        }

        // Versions that vanished from the crawl stop being exported.
        self.versions.replace(counts.versions);
    }
}

impl ServiceMetrics for CrawlerMetrics {
    fn init_metrics(ctx: Arc<ServiceContext>) -> Result<Self, RegistryError> {
        let r = &ctx.registry;
        Ok(Self {
            common: CommonMetrics::new(r, SERVICE)?,
            total_nodes: r.new_gauge(
                SERVICE,
                "total_nodes_5_days",
                "Nodes seen in the last 5 days",
            )?,
            reliable_nodes: r.new_gauge(SERVICE, "reliable_nodes", "Reliable nodes")?,
            ipv4_nodes: r.new_gauge(
                SERVICE,
                "ipv4_nodes_5_days",
                "IPv4 nodes seen in the last 5 days",
            )?,
            ipv6_nodes: r.new_gauge(
                SERVICE,
                "ipv6_nodes_5_days",
                "IPv6 nodes seen in the last 5 days",
            )?,
            versions: ReplacedGaugeVec::new(r.new_gauge_vec(
                SERVICE,
                "peer_version",
                "Peers by reported software version",
                &["version"],
            )?),
            ctx,
        })
    }

    fn initial_data(&self) {
        self.request_peer_counts();
    }

    fn setup_polling_metrics(&self) {}

    fn receive_response(&self, resp: &WebsocketResponse) {
        if self.common.receive(resp) {
            return;
        }
        match resp.command.as_str() {
            "get_peer_counts" => self.receive_peer_counts(resp),
            "loaded_initial_peers" | "crawl_batch_completed" => self.request_peer_counts(),
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

    const ORIGIN: &str = "chik_crawler";

    #[test]
    fn peer_counts_replace_version_labels() {
        let h = harness();
        let crawler = CrawlerMetrics::init_metrics(Arc::clone(&h.ctx)).expect("init");

        crawler.receive_response(&event(
            ORIGIN,
            "get_peer_counts",
            r#"{"peer_counts": {"total_last_5_days": 900, "reliable_nodes": 400,
                "ipv4_last_5_days": 800, "ipv6_last_5_days": 100,
                "versions": {"1.8.0": 500, "1.7.1": 400}}}"#,
        ));
        crawler.receive_response(&event(
            ORIGIN,
            "get_peer_counts",
            r#"{"peer_counts": {"total_last_5_days": 950, "versions": {"1.8.0": 950}}}"#,
        ));

        let text = h.registry.snapshot();
        assert_eq!(sample(&text, "chik_crawler_total_nodes_5_days"), Some(950.0));
        assert_eq!(sample(&text, "chik_crawler_reliable_nodes"), Some(400.0));
        assert_eq!(
            sample(&text, r#"chik_crawler_peer_version{version="1.8.0"}"#),
            Some(950.0)
        );
        assert!(!text.contains(r#"version="1.7.1""#));
    }

    #[test]
    fn scrapes_never_see_a_partial_version_family() {
        let h = harness();
        let crawler = CrawlerMetrics::init_metrics(Arc::clone(&h.ctx)).expect("init");
        let wide = event(
            ORIGIN,
            "get_peer_counts",
            r#"{"peer_counts": {"versions": {"1.8.0": 500, "1.7.1": 400, "1.6.2": 20, "1.5.0": 3}}}"#,
        );
        let narrow = event(
            ORIGIN,
            "get_peer_counts",
            r#"{"peer_counts": {"versions": {"1.8.0": 510, "1.7.1": 390}}}"#,
        );
        crawler.receive_response(&wide);

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..2_000 {
                    crawler.receive_response(if i % 2 == 0 { &narrow } else { &wide });
                }
                crawler.receive_response(&narrow);
            });
            for _ in 0..2_000 {
                let text = h.registry.snapshot();
                assert!(text.contains(r#"chik_crawler_peer_version{version="1.8.0"}"#));
                assert!(text.contains(r#"chik_crawler_peer_version{version="1.7.1"}"#));
            }
        });

        let text = h.registry.snapshot();
        assert_eq!(
            sample(&text, r#"chik_crawler_peer_version{version="1.8.0"}"#),
            Some(510.0)
        );
        assert!(!text.contains(r#"version="1.6.2""#));
        assert!(!text.contains(r#"version="1.5.0""#));
    }

    #[test]
    fn crawl_progress_rerequests_counts() {
        let h = harness();
        let crawler = CrawlerMetrics::init_metrics(Arc::clone(&h.ctx)).expect("init");

        crawler.receive_response(&event(ORIGIN, "loaded_initial_peers", "{}"));
        crawler.receive_response(&event(ORIGIN, "crawl_batch_completed", "{}"));

        assert_eq!(
            h.stream.take_sent(),
            vec![
                (ORIGIN.to_string(), "get_peer_counts".to_string()),
                (ORIGIN.to_string(), "get_peer_counts".to_string()),
            ]
        );
    }

    #[test]
    fn missing_peer_counts_changes_nothing() {
        let h = harness();
        let crawler = CrawlerMetrics::init_metrics(Arc::clone(&h.ctx)).expect("init");
        let before = h.registry.snapshot();

        crawler.receive_response(&event(ORIGIN, "get_peer_counts", r#"{"success": true}"#));
        assert_eq!(h.registry.snapshot(), before);
    }
}
