//! Full node metrics: peer connections, blockchain state, blocks, signage
//! points, and polled compact-block counts.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use prometheus::{CounterVec, GaugeVec};
use serde::Deserialize;
use tracing::debug;

use crate::error::RegistryError;
use crate::metrics::{LazyCounter, LazyGauge};
use crate::types::{Service, WebsocketResponse};

use super::{CommonMetrics, ServiceContext, ServiceMetrics, bool_gauge, parse_body, parse_payload};

const SERVICE: Service = Service::FullNode;

#[derive(Debug, Default, Deserialize)]
struct Peak {
    height: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncState {
    synced: Option<bool>,
    sync_mode: Option<bool>,
    sync_progress_height: Option<f64>,
    sync_tip_height: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct BlockchainState {
    difficulty: Option<f64>,
    sub_slot_iters: Option<f64>,
    space: Option<f64>,
    mempool_size: Option<f64>,
    mempool_cost: Option<f64>,
    mempool_max_total_cost: Option<f64>,
    block_max_cost: Option<f64>,
    mempool_min_fees: Option<HashMap<String, f64>>,
    peak: Option<Peak>,
    sync: Option<SyncState>,
}

#[derive(Debug, Deserialize)]
struct BlockchainStatePayload {
    blockchain_state: Option<BlockchainState>,
}

#[derive(Debug, Deserialize)]
struct BlockPayload {
    #[serde(default)]
    transaction_block: bool,
    k_size: Option<u8>,
    height: Option<f64>,
    block_cost: Option<f64>,
    block_fees: Option<f64>,
    transaction_generator_size_bytes: Option<f64>,
    transaction_generator_ref_list: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct BroadcastFarmer {
    signage_point_index: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SignagePointPayload {
    broadcast_farmer: Option<BroadcastFarmer>,
}

#[derive(Debug, Default, Deserialize)]
struct BlockCounts {
    compact_blocks: Option<f64>,
    uncompact_blocks: Option<f64>,
    hint_count: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BlockCountPayload {
    metrics: Option<BlockCounts>,
}

fn set_opt(gauge: &LazyGauge, value: Option<f64>) {
    if let Some(value) = value {
        gauge.set(value);
    }
}

struct ChainStateMetrics {
    difficulty: LazyGauge,
    sub_slot_iters: LazyGauge,
    netspace: LazyGauge,
    mempool_size: LazyGauge,
    mempool_cost: LazyGauge,
    mempool_max_total_cost: LazyGauge,
    block_max_cost: LazyGauge,
    mempool_min_fee: GaugeVec,
    node_height: LazyGauge,
    node_synced: LazyGauge,
    node_sync_mode: LazyGauge,
    sync_progress_height: LazyGauge,
    sync_tip_height: LazyGauge,
}

impl ChainStateMetrics {
    fn new(ctx: &ServiceContext) -> Result<Self, RegistryError> {
        let r = &ctx.registry;
        Ok(Self {
            difficulty: r.new_gauge(SERVICE, "difficulty", "Current network difficulty")?,
            sub_slot_iters: r.new_gauge(SERVICE, "sub_slot_iters", "Current sub slot iterations")?,
            netspace: r.new_gauge(SERVICE, "netspace_bytes", "Estimated network space in bytes")?,
            mempool_size: r.new_gauge(SERVICE, "mempool_size", "Number of spend bundles in the mempool")?,
            mempool_cost: r.new_gauge(SERVICE, "mempool_cost", "Total cost of all items in the mempool")?,
            mempool_max_total_cost: r.new_gauge(
                SERVICE,
                "mempool_max_total_cost",
                "Maximum total cost the mempool will hold",
            )?,
            block_max_cost: r.new_gauge(SERVICE, "block_max_cost", "Maximum cost of a single block")?,
            mempool_min_fee: r.new_gauge_vec(
                SERVICE,
                "mempool_min_fee",
                "Minimum fee per cost to get into the mempool, by spend cost",
                &["cost"],
            )?,
            node_height: r.new_gauge(SERVICE, "node_height", "Height of the node's peak")?,
            node_synced: r.new_gauge(SERVICE, "node_synced", "1 if the node is synced, else 0")?,
            node_sync_mode: r.new_gauge(SERVICE, "node_sync_mode", "1 if the node is in sync mode, else 0")?,
            sync_progress_height: r.new_gauge(
                SERVICE,
                "sync_progress_height",
                "Height reached by the current sync",
            )?,
            sync_tip_height: r.new_gauge(SERVICE, "sync_tip_height", "Height the current sync is heading to")?,
        })
    }

    fn receive(&self, resp: &WebsocketResponse) {
        let Some(payload) = parse_payload::<BlockchainStatePayload>(resp) else {
            return;
        };
        let Some(state) = payload.blockchain_state else {
            debug!("get_blockchain_state without blockchain_state");
            return;
        };

        set_opt(&self.difficulty, state.difficulty);
        set_opt(&self.sub_slot_iters, state.sub_slot_iters);
        set_opt(&self.netspace, state.space);
        set_opt(&self.mempool_size, state.mempool_size);
        set_opt(&self.mempool_cost, state.mempool_cost);
        set_opt(&self.mempool_max_total_cost, state.mempool_max_total_cost);
        set_opt(&self.block_max_cost, state.block_max_cost);

        for (cost, fee) in state.mempool_min_fees.unwrap_or_default() {
            let cost = cost.strip_prefix("cost_").unwrap_or(&cost);
            self.mempool_min_fee.with_label_values(&[cost]).set(fee);
        }

        if let Some(peak) = state.peak {
            set_opt(&self.node_height, peak.height);
        }
        if let Some(sync) = state.sync {
            set_opt(&self.node_synced, sync.synced.map(bool_gauge));
            set_opt(&self.node_sync_mode, sync.sync_mode.map(bool_gauge));
            set_opt(&self.sync_progress_height, sync.sync_progress_height);
            set_opt(&self.sync_tip_height, sync.sync_tip_height);
        }
    }
}

struct BlockMetrics {
    block_cost: LazyGauge,
    block_fees: LazyGauge,
    generator_size: LazyGauge,
    generator_ref_count: LazyGauge,
    block_height: LazyGauge,
    blocks_by_ksize: CounterVec,
}

impl BlockMetrics {
    fn new(ctx: &ServiceContext) -> Result<Self, RegistryError> {
        let r = &ctx.registry;
        Ok(Self {
            block_cost: r.new_gauge(SERVICE, "block_cost", "Cost of the last transaction block")?,
            block_fees: r.new_gauge(SERVICE, "block_fees", "Fees of the last transaction block in mojos")?,
            generator_size: r.new_gauge(
                SERVICE,
                "block_generator_size_bytes",
                "Size of the last transaction block's generator in bytes",
            )?,
            generator_ref_count: r.new_gauge(
                SERVICE,
                "block_generator_ref_count",
                "Number of generator references in the last transaction block",
            )?,
            block_height: r.new_gauge(SERVICE, "block_height", "Height of the last transaction block")?,
            blocks_by_ksize: r.new_counter_vec(
                SERVICE,
                "blocks_by_ksize",
                "Blocks seen, by the k size of the winning plot",
                &["k_size"],
            )?,
        })
    }

    fn receive(&self, resp: &WebsocketResponse) {
        let Some(block) = parse_payload::<BlockPayload>(resp) else {
            return;
        };

        if let Some(k_size) = block.k_size {
            self.blocks_by_ksize
                .with_label_values(&[k_size.to_string().as_str()])
                .inc();
        }

        if block.transaction_block {
            set_opt(&self.block_height, block.height);
            set_opt(&self.block_cost, block.block_cost);
            set_opt(&self.block_fees, block.block_fees);
            set_opt(&self.generator_size, block.transaction_generator_size_bytes);
            if let Some(refs) = block.transaction_generator_ref_list {
                self.generator_ref_count.set(refs.len() as f64);
            }
        }
    }
}

/// Compact-block counts, which the node never pushes and must be polled.
#[derive(Clone)]
struct BlockCountMetrics {
    compact_blocks: LazyGauge,
    uncompact_blocks: LazyGauge,
    hint_count: LazyGauge,
}

impl BlockCountMetrics {
    fn new(ctx: &ServiceContext) -> Result<Self, RegistryError> {
        let r = &ctx.registry;
        Ok(Self {
            compact_blocks: r.new_gauge(SERVICE, "compact_blocks", "Number of fully compact blocks")?,
            uncompact_blocks: r.new_gauge(SERVICE, "uncompact_blocks", "Number of uncompact blocks")?,
            hint_count: r.new_gauge(SERVICE, "hint_count", "Number of hints in the database")?,
        })
    }

    fn receive(&self, origin: &str, body: &[u8]) {
        let Some(payload) = parse_body::<BlockCountPayload>(origin, "get_block_count_metrics", body) else {
            return;
        };
        let counts = payload.metrics.unwrap_or_default();
        set_opt(&self.compact_blocks, counts.compact_blocks);
        set_opt(&self.uncompact_blocks, counts.uncompact_blocks);
        set_opt(&self.hint_count, counts.hint_count);
    }
}

/// Metrics for the full node service.
pub struct FullNodeMetrics {
    ctx: Arc<ServiceContext>,
    common: CommonMetrics,
    chain: ChainStateMetrics,
    blocks: BlockMetrics,
    signage_points: LazyCounter,
    signage_point_index: LazyGauge,
    block_counts: BlockCountMetrics,
}

impl FullNodeMetrics {
    fn refresh_connections(&self) {
        self.ctx.request(SERVICE, "get_connections", serde_json::json!({}));
    }

    fn receive_signage_point(&self, resp: &WebsocketResponse) {
        let Some(payload) = parse_payload::<SignagePointPayload>(resp) else {
            return;
        };
        self.signage_points.inc();
        if let Some(index) = payload.broadcast_farmer.and_then(|b| b.signage_point_index) {
            self.signage_point_index.set(index);
        }
    }
}

impl ServiceMetrics for FullNodeMetrics {
    fn init_metrics(ctx: Arc<ServiceContext>) -> Result<Self, RegistryError> {
        Ok(Self {
            common: CommonMetrics::new(&ctx.registry, SERVICE)?,
            chain: ChainStateMetrics::new(&ctx)?,
            blocks: BlockMetrics::new(&ctx)?,
            signage_points: ctx.registry.new_counter(
                SERVICE,
                "signage_points_total",
                "Total signage points seen",
            )?,
            signage_point_index: ctx.registry.new_gauge(
                SERVICE,
                "signage_point_index",
                "Index of the last signage point",
            )?,
            block_counts: BlockCountMetrics::new(&ctx)?,
            ctx,
        })
    }

    fn initial_data(&self) {
        self.refresh_connections();
        self.ctx
            .request(SERVICE, "get_blockchain_state", serde_json::json!({}));
    }

    fn setup_polling_metrics(&self) {
        let block_counts = self.block_counts.clone();
        let origin = SERVICE.origin(self.ctx.registry.namespace());
        self.ctx.poll(
            SERVICE,
            "get_block_count_metrics",
            self.ctx.config.polling.block_count_interval,
            move |body: &Bytes| block_counts.receive(&origin, body),
        );
    }

    fn receive_response(&self, resp: &WebsocketResponse) {
        if self.common.receive(resp) {
            return;
        }
        match resp.command.as_str() {
            "get_blockchain_state" => self.chain.receive(resp),
            "block" => self.blocks.receive(resp),
            "signage_point" => self.receive_signage_point(resp),
            "get_block_count_metrics" => self.block_counts.receive(&resp.origin, &resp.data),
            "add_connection" | "close_connection" => self.refresh_connections(),
            _ => debug!(command = %resp.command, "ignoring unknown command"),
        }
    }

    fn disconnected(&self) {
        self.common.reset_connections();
        // Sync state is unknown until the node answers again.
        self.chain.node_synced.zero();
        self.chain.node_sync_mode.zero();
    }

    fn reconnected(&self) {
        self.initial_data();
    }
}
