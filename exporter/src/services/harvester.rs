//! Harvester metrics: plot inventory and per-signage-point farming results.
//!
//! When proofs are found and a proof log file is configured, each hit is
//! also appended to that file so operators keep a record outside of
//! Prometheus retention. Inside a runtime the append runs on the blocking
//! pool, off the stream reader task.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::metrics::{LazyCounter, LazyGauge};
use crate::types::{Service, WebsocketResponse};

use super::{CommonMetrics, ReplacedGaugeVec, ServiceContext, ServiceMetrics, parse_payload};

const SERVICE: Service = Service::Harvester;

#[derive(Debug, Deserialize)]
struct Plot {
    size: u8,
    #[serde(default)]
    file_size: f64,
}

#[derive(Debug, Deserialize)]
struct PlotsPayload {
    #[serde(default)]
    plots: Vec<Plot>,
    #[serde(default)]
    failed_to_open_filenames: Vec<String>,
    #[serde(default)]
    not_found_filenames: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FarmingInfo {
    #[serde(default)]
    challenge_hash: String,
    #[serde(default)]
    signage_point: String,
    #[serde(default)]
    proofs: u64,
    #[serde(default)]
    passed_filter: u64,
    total_plots: Option<f64>,
    lookup_time: Option<f64>,
}

/// Metrics for the harvester.
pub struct HarvesterMetrics {
    ctx: Arc<ServiceContext>,
    common: CommonMetrics,
    plot_count: ReplacedGaugeVec,
    plot_files_size: LazyGauge,
    failed_to_open: LazyGauge,
    not_found: LazyGauge,
    total_found_proofs: LazyCounter,
    total_eligible_plots: LazyCounter,
    last_found_proofs: LazyGauge,
    last_eligible_plots: LazyGauge,
    last_lookup_time: LazyGauge,
    total_plots: LazyGauge,
}

impl HarvesterMetrics {
    fn receive_plots(&self, resp: &WebsocketResponse) {
        let Some(payload) = parse_payload::<PlotsPayload>(resp) else {
            return;
        };

        let mut by_ksize: HashMap<u8, f64> = HashMap::new();
        let mut total_size = 0.0;
        for plot in &payload.plots {
            *by_ksize.entry(plot.size).or_default() += 1.0;
            total_size += plot.file_size;
        }

        self.plot_count.replace(
            by_ksize
                .into_iter()
                .map(|(k_size, count)| (k_size.to_string(), count)),
        );
        self.plot_files_size.set(total_size);
        self.failed_to_open
            .set(payload.failed_to_open_filenames.len() as f64);
        self.not_found.set(payload.not_found_filenames.len() as f64);
    }

    fn receive_farming_info(&self, resp: &WebsocketResponse) {
        let Some(info) = parse_payload::<FarmingInfo>(resp) else {
            return;
        };

        self.total_found_proofs.inc_by(info.proofs as f64);
        self.total_eligible_plots.inc_by(info.passed_filter as f64);
        self.last_found_proofs.set(info.proofs as f64);
        self.last_eligible_plots.set(info.passed_filter as f64);
        if let Some(lookup_time) = info.lookup_time {
            self.last_lookup_time.set(lookup_time);
        }
        if let Some(total_plots) = info.total_plots {
            self.total_plots.set(total_plots);
        }

        if info.proofs > 0 {
            self.log_proofs(&info);
        }
    }

    fn log_proofs(&self, info: &FarmingInfo) {
        info!(
            proofs = info.proofs,
            challenge = %info.challenge_hash,
            "harvester found proofs"
        );
        let Some(filename) = self.ctx.config.file_log.proof_log_file.as_deref() else {
            return;
        };
        let line = format!(
            "challenge={} signage_point={} proofs={} eligible_plots={}",
            info.challenge_hash, info.signage_point, info.proofs, info.passed_filter
        );
        let file_log = self.ctx.file_log.clone();
        let filename = filename.to_string();
        let write = move || {
            if let Err(e) = file_log.append(&filename, &line) {
                warn!(file = %file_log.path(&filename).display(), "could not write proof log: {e}");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(write);
            }
            Err(_) => write(),
        }
    }
}

impl ServiceMetrics for HarvesterMetrics {
    fn init_metrics(ctx: Arc<ServiceContext>) -> Result<Self, RegistryError> {
        let r = &ctx.registry;
        Ok(Self {
            common: CommonMetrics::new(r, SERVICE)?,
            plot_count: ReplacedGaugeVec::new(r.new_gauge_vec(
                SERVICE,
                "plot_count",
                "Plots by k size",
                &["k_size"],
            )?),
            plot_files_size: r.new_gauge(
                SERVICE,
                "plot_files_size_bytes",
                "Total size of all plot files in bytes",
            )?,
            failed_to_open: r.new_gauge(
                SERVICE,
                "failed_to_open_plots",
                "Plot files that could not be opened",
            )?,
            not_found: r.new_gauge(SERVICE, "not_found_plots", "Plot files that were not found")?,
            total_found_proofs: r.new_counter(
                SERVICE,
                "total_found_proofs",
                "Proofs found since the exporter started",
            )?,
            total_eligible_plots: r.new_counter(
                SERVICE,
                "total_eligible_plots",
                "Plots that passed the filter since the exporter started",
            )?,
            last_found_proofs: r.new_gauge(
                SERVICE,
                "last_found_proofs",
                "Proofs found for the last signage point",
            )?,
            last_eligible_plots: r.new_gauge(
                SERVICE,
                "last_eligible_plots",
                "Plots that passed the filter for the last signage point",
            )?,
            last_lookup_time: r.new_gauge(
                SERVICE,
                "last_lookup_time_seconds",
                "Proof lookup time for the last signage point",
            )?,
            total_plots: r.new_gauge(SERVICE, "total_plots", "Plots the harvester is farming")?,
            ctx,
        })
    }

    fn initial_data(&self) {
        self.ctx.request(SERVICE, "get_connections", json!({}));
        self.ctx.request(SERVICE, "get_plots", json!({}));
    }

    fn setup_polling_metrics(&self) {}

    fn receive_response(&self, resp: &WebsocketResponse) {
        if self.common.receive(resp) {
            return;
        }
        match resp.command.as_str() {
            "get_plots" => self.receive_plots(resp),
            "plots" => self.ctx.request(SERVICE, "get_plots", json!({})),
            "farming_info" => self.receive_farming_info(resp),
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
