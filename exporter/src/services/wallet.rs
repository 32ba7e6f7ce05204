//! Wallet metrics: sync status plus balances and coin counts per wallet.

use std::sync::Arc;

use prometheus::GaugeVec;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::RegistryError;
use crate::metrics::LazyGauge;
use crate::types::{Service, WebsocketResponse};

use super::{CommonMetrics, ServiceContext, ServiceMetrics, bool_gauge, parse_payload};

const SERVICE: Service = Service::Wallet;

/// Wallet queried when no wallet id is known yet.
const DEFAULT_WALLET_ID: u32 = 1;

#[derive(Debug, Deserialize)]
struct SyncStatus {
    synced: Option<bool>,
    syncing: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WalletBalance {
    wallet_id: u32,
    fingerprint: u64,
    confirmed_wallet_balance: Option<f64>,
    spendable_balance: Option<f64>,
    max_send_amount: Option<f64>,
    pending_coin_removal_count: Option<f64>,
    unspent_coin_count: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WalletBalancePayload {
    wallet_balance: Option<WalletBalance>,
}

#[derive(Debug, Deserialize)]
struct CoinChange {
    wallet_id: Option<u32>,
}

/// Metrics for the wallet service.
pub struct WalletMetrics {
    ctx: Arc<ServiceContext>,
    common: CommonMetrics,
    synced: LazyGauge,
    syncing: LazyGauge,
    confirmed_balance: GaugeVec,
    spendable_balance: GaugeVec,
    max_send_amount: GaugeVec,
    pending_coin_removal_count: GaugeVec,
    unspent_coin_count: GaugeVec,
}

impl WalletMetrics {
    fn request_balance(&self, wallet_id: u32) {
        self.ctx
            .request(SERVICE, "get_wallet_balance", json!({ "wallet_id": wallet_id }));
    }

    fn receive_sync_status(&self, resp: &WebsocketResponse) {
        let Some(status) = parse_payload::<SyncStatus>(resp) else {
            return;
        };
        if let Some(synced) = status.synced {
            self.synced.set(bool_gauge(synced));
        }
        if let Some(syncing) = status.syncing {
            self.syncing.set(bool_gauge(syncing));
        }
    }

    fn receive_balance(&self, resp: &WebsocketResponse) {
        let Some(payload) = parse_payload::<WalletBalancePayload>(resp) else {
            return;
        };
        let Some(balance) = payload.wallet_balance else {
            debug!("get_wallet_balance without wallet_balance");
            return;
        };

        let fingerprint = balance.fingerprint.to_string();
        let wallet_id = balance.wallet_id.to_string();
        let labels = [fingerprint.as_str(), wallet_id.as_str()];

        let updates = [
            (&self.confirmed_balance, balance.confirmed_wallet_balance),
            (&self.spendable_balance, balance.spendable_balance),
            (&self.max_send_amount, balance.max_send_amount),
            (&self.pending_coin_removal_count, balance.pending_coin_removal_count),
            (&self.unspent_coin_count, balance.unspent_coin_count),
        ];
        for (gauge, value) in updates {
            if let Some(value) = value {
                gauge.with_label_values(&labels).set(value);
            }
        }
    }

    fn receive_coin_change(&self, resp: &WebsocketResponse) {
        let Some(change) = parse_payload::<CoinChange>(resp) else {
            return;
        };
        self.request_balance(change.wallet_id.unwrap_or(DEFAULT_WALLET_ID));
    }
}

impl ServiceMetrics for WalletMetrics {
    fn init_metrics(ctx: Arc<ServiceContext>) -> Result<Self, RegistryError> {
        let r = &ctx.registry;
        let balance_labels = &["fingerprint", "wallet_id"];
        Ok(Self {
            common: CommonMetrics::new(r, SERVICE)?,
            synced: r.new_gauge(SERVICE, "wallet_synced", "1 if the wallet is synced, else 0")?,
            syncing: r.new_gauge(SERVICE, "wallet_syncing", "1 if the wallet is syncing, else 0")?,
            confirmed_balance: r.new_gauge_vec(
                SERVICE,
                "confirmed_balance_mojos",
                "Confirmed wallet balance in mojos",
                balance_labels,
            )?,
            spendable_balance: r.new_gauge_vec(
                SERVICE,
                "spendable_balance_mojos",
                "Spendable wallet balance in mojos",
                balance_labels,
            )?,
            max_send_amount: r.new_gauge_vec(
                SERVICE,
                "max_send_amount_mojos",
                "Largest amount the wallet can send in one transaction, in mojos",
                balance_labels,
            )?,
            pending_coin_removal_count: r.new_gauge_vec(
                SERVICE,
                "pending_coin_removal_count",
                "Coins pending removal",
                balance_labels,
            )?,
            unspent_coin_count: r.new_gauge_vec(
                SERVICE,
                "unspent_coin_count",
                "Unspent coins",
                balance_labels,
            )?,
            ctx,
        })
    }

    fn initial_data(&self) {
        self.ctx.request(SERVICE, "get_connections", json!({}));
        self.ctx.request(SERVICE, "get_sync_status", json!({}));
        self.request_balance(DEFAULT_WALLET_ID);
    }

    fn setup_polling_metrics(&self) {}

    fn receive_response(&self, resp: &WebsocketResponse) {
        if self.common.receive(resp) {
            return;
        }
        match resp.command.as_str() {
            "get_sync_status" => self.receive_sync_status(resp),
            "sync_changed" => self.ctx.request(SERVICE, "get_sync_status", json!({})),
            "get_wallet_balance" => self.receive_balance(resp),
            "coin_added" | "coin_removed" => self.receive_coin_change(resp),
            _ => debug!(command = %resp.command, "ignoring unknown command"),
        }
    }

    fn disconnected(&self) {
        self.common.reset_connections();
        self.synced.zero();
        self.syncing.zero();
    }

    fn reconnected(&self) {
        self.initial_data();
    }
}
