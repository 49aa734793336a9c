//! Explorer facade consumed by the HTTP layer.
//!
//! Wraps the node context, resolver, activity filter and orchestrator
//! behind the operations the wallet client's explorer API needs.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::{Amount, BlockHash, Txid};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::filter::ActivityFilter;
use crate::node::NodeContext;
use crate::resolver::Resolver;
use crate::rpc::{decode_transaction_hex, FeeMode};
use crate::status::Status;
use crate::sync::Orchestrator;
use crate::types::{AccountConfig, BlockRef, BlockWithTxs, Currency, Transaction};

/// Confirmation targets used when the client does not ask for specific ones.
pub const DEFAULT_FEE_TARGETS: [u16; 3] = [2, 3, 6];

/// Fee rate reported when the node cannot estimate one, e.g. on a regtest
/// chain with an empty mempool.
pub const FALLBACK_FEE_RATE: Amount = Amount::from_sat(1);

// ==============================================================================
// Block References
// ==============================================================================

/// How a client names a block: `current`, a hash, or a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReference {
    Current,
    Hash(BlockHash),
    Height(u64),
}

impl FromStr for BlockReference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "current" {
            return Ok(Self::Current);
        }
        if s.starts_with("0x") || s.len() == 64 {
            let hex = s.strip_prefix("0x").unwrap_or(s);
            return BlockHash::from_str(hex)
                .map(Self::Hash)
                .map_err(|_| CoreError::InvalidBlockRef(s.to_owned()));
        }
        s.parse::<u64>()
            .map(Self::Height)
            .map_err(|_| CoreError::InvalidBlockRef(s.to_owned()))
    }
}

/// Parse a transaction hash, with or without a `0x` prefix.
pub fn parse_txid(s: &str) -> Result<Txid, CoreError> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    Txid::from_str(hex).map_err(|e| CoreError::InvalidTxData(format!("invalid hash `{s}`: {e}")))
}

// ==============================================================================
// Payloads
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplorerStatus {
    pub txindex: bool,
    pub block_filter: bool,
    pub pruned: bool,
    pub chain: String,
    pub currency: Currency,
    pub status: Status,
    /// Percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_progress: Option<f64>,
    /// Percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_progress: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSummary {
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub relay_fee: Amount,
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub incremental_fee: Amount,
    pub version: u64,
    pub subversion: String,
}

/// Fee rates in satoshis per kvB, keyed by confirmation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeEstimates {
    #[serde(flatten)]
    pub rates: BTreeMap<String, u64>,
    pub last_updated: u64,
}

// ==============================================================================
// Explorer
// ==============================================================================

pub struct Explorer {
    ctx: Arc<NodeContext>,
    resolver: Arc<Resolver>,
    filter: ActivityFilter,
    orchestrator: Arc<Orchestrator>,
}

impl Explorer {
    pub fn new(
        ctx: Arc<NodeContext>,
        resolver: Arc<Resolver>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        let filter = ActivityFilter::new(Arc::clone(&ctx), Arc::clone(&resolver));
        Self {
            ctx,
            resolver,
            filter,
            orchestrator,
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn currency(&self) -> Currency {
        self.ctx.currency()
    }

    pub async fn block(&self, reference: BlockReference) -> Result<BlockWithTxs, CoreError> {
        let conn = self.ctx.acquire().await?;
        let hash = match reference {
            BlockReference::Current => conn.get_best_block_hash().await?,
            BlockReference::Hash(hash) => hash,
            BlockReference::Height(height) => conn.get_block_hash(height).await?,
        };
        let block = conn.get_block(&hash).await?;
        Ok(BlockWithTxs {
            block: BlockRef {
                hash: block.hash,
                height: block.height,
                time: block.time,
            },
            txs: block.tx,
        })
    }

    pub async fn transaction(&self, txid: &Txid) -> Result<Transaction, CoreError> {
        self.resolver.resolve(txid).await
    }

    pub async fn transaction_hex(&self, txid: &Txid) -> Result<String, CoreError> {
        self.resolver.transaction_hex(txid).await
    }

    /// Validate and relay a serialized transaction.
    pub async fn broadcast(&self, hex: &str) -> Result<Txid, CoreError> {
        let tx = decode_transaction_hex(hex.trim())?;
        let conn = self.ctx.acquire().await?;
        let txid = conn.send_raw_transaction(&tx).await?;
        info!(txid = %txid, "transaction broadcast");
        Ok(txid)
    }

    /// Smart fee estimates. Targets the node cannot estimate report
    /// [`FALLBACK_FEE_RATE`].
    pub async fn fees(&self, targets: &[u16], mode: FeeMode) -> Result<FeeEstimates, CoreError> {
        let conn = self.ctx.acquire().await?;
        let mut rates = BTreeMap::new();
        for &target in targets {
            let rate = match conn.estimate_smart_fee(target, mode).await {
                Ok(estimate) if estimate.errors.is_empty() => {
                    estimate.fee_rate.unwrap_or(FALLBACK_FEE_RATE)
                }
                Ok(estimate) => {
                    warn!(
                        conf_target = target,
                        mode = mode.as_str(),
                        errors = ?estimate.errors,
                        "fee estimation failed"
                    );
                    FALLBACK_FEE_RATE
                }
                Err(err) if err.is_connectivity() => return Err(err),
                Err(err) => {
                    warn!(
                        conf_target = target,
                        mode = mode.as_str(),
                        error = %err,
                        "fee estimation failed"
                    );
                    FALLBACK_FEE_RATE
                }
            };
            rates.insert(target.to_string(), rate.to_sat());
        }
        Ok(FeeEstimates {
            rates,
            last_updated: unix_now(),
        })
    }

    /// Node capabilities plus a live readiness probe.
    ///
    /// Never fails: an unreachable node is reported as `node_disconnected`.
    /// With a synced chain and an idle wallet, the startup sequence's own
    /// status is reported, so the bridge only reads `ready` after its
    /// import has finished.
    pub async fn status(&self) -> ExplorerStatus {
        let capabilities = self.ctx.capabilities();
        let mut status = ExplorerStatus {
            txindex: capabilities.tx_index,
            block_filter: capabilities.block_filter,
            pruned: capabilities.pruned,
            chain: capabilities.chain.clone(),
            currency: self.ctx.currency(),
            status: Status::Initializing,
            sync_progress: None,
            scan_progress: None,
        };
        if self.ctx.status().get() == Status::Initializing {
            return status;
        }

        let conn = match self.ctx.acquire().await {
            Ok(conn) => conn,
            Err(err) => return disconnected(status, &err),
        };
        let chain = match conn.get_blockchain_info().await {
            Ok(chain) => chain,
            Err(err) => return disconnected(status, &err),
        };
        if !chain.is_synced() {
            status.status = Status::Syncing;
            status.sync_progress = Some(chain.verification_progress * 100.0);
            return status;
        }
        let wallet = match conn.get_wallet_info().await {
            Ok(wallet) => wallet,
            Err(err) => return disconnected(status, &err),
        };
        match wallet.scan_progress() {
            Some(scan) => {
                status.status = Status::Scanning;
                status.scan_progress = Some(scan.progress * 100.0);
            }
            None => status.status = self.ctx.status().get(),
        }
        status
    }

    pub async fn network(&self) -> Result<NetworkSummary, CoreError> {
        let conn = self.ctx.acquire().await?;
        let info = conn.get_network_info().await?;
        Ok(NetworkSummary {
            relay_fee: info.relay_fee,
            incremental_fee: info.incremental_fee,
            version: info.version,
            subversion: info.subversion,
        })
    }

    pub async fn health(&self) -> Result<(), CoreError> {
        let conn = self.ctx.acquire().await?;
        conn.get_blockchain_info().await.map(|_| ())
    }

    pub async fn activity(
        &self,
        addresses: &[String],
        block_hash: Option<&BlockHash>,
    ) -> Result<Vec<Transaction>, CoreError> {
        self.filter.get_activity(addresses, block_hash).await
    }

    /// Start importing `accounts` in the background. The outcome is only
    /// logged.
    pub fn import_accounts(&self, accounts: Vec<AccountConfig>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            match orchestrator.import_accounts(&accounts).await {
                Ok(outcome) => info!(
                    imported = outcome.imported,
                    skipped_accounts = outcome.skipped_accounts,
                    rescanned = outcome.rescanned,
                    "requested import finished"
                ),
                Err(err) => warn!(error = %err, "requested import failed"),
            }
        })
    }

    pub async fn has_descriptor(&self, descriptor: &str) -> Result<bool, CoreError> {
        self.orchestrator.has_descriptor(descriptor).await
    }
}

fn disconnected(mut status: ExplorerStatus, err: &CoreError) -> ExplorerStatus {
    warn!(error = %err, "status probe failed");
    status.status = Status::NodeDisconnected;
    status
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
