//! RPC-specific types that do not belong to the shared domain model.
//!
//! These mirror the subset of Bitcoin Core responses the bridge reads.
//! Monetary fields reported in BTC are decoded into [`Amount`] through the
//! `bitcoin` crate's decimal-safe serde helpers.

use bitcoin::{Amount, BlockHash, Txid};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ==============================================================================
// Chain and Network
// ==============================================================================

/// Basic chain information from `getblockchaininfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    pub blocks: u64,
    pub headers: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
    pub pruned: bool,
    #[serde(rename = "verificationprogress", default)]
    pub verification_progress: f64,
}

impl ChainInfo {
    pub fn is_synced(&self) -> bool {
        self.blocks == self.headers
    }
}

/// Subset of `getnetworkinfo`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkInfo {
    pub version: u64,
    pub subversion: String,
    #[serde(rename = "relayfee", with = "bitcoin::amount::serde::as_btc")]
    pub relay_fee: Amount,
    #[serde(rename = "incrementalfee", with = "bitcoin::amount::serde::as_btc")]
    pub incremental_fee: Amount,
}

/// `getblock <hash> 1`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockInfo {
    pub hash: BlockHash,
    pub height: u32,
    pub time: u64,
    pub tx: Vec<Txid>,
}

/// `gettxoutsetinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutSetInfo {
    pub height: u64,
    pub total_amount: Amount,
}

// ==============================================================================
// Transactions
// ==============================================================================

/// A transaction fetched by hash, decoded locally from its serialized form.
///
/// `block_height` may be missing even for confirmed transactions when the
/// source response did not report it.
#[derive(Debug, Clone)]
pub struct RawTransaction {
    pub tx: bitcoin::Transaction,
    pub hex: String,
    pub confirmations: u64,
    pub block_hash: Option<BlockHash>,
    pub block_height: Option<u32>,
    pub block_time: Option<u64>,
}

/// Decode a consensus-serialized transaction.
pub fn decode_transaction_hex(hex: &str) -> Result<bitcoin::Transaction, CoreError> {
    bitcoin::consensus::encode::deserialize_hex(hex)
        .map_err(|e| CoreError::InvalidTxData(format!("undecodable transaction hex: {e}")))
}

/// Wallet view of a transaction from `gettransaction`.
///
/// Only carries the serialized hex plus wallet metadata; callers decode it.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletTransaction {
    pub hex: String,
    /// Negative for conflicted transactions.
    pub confirmations: i64,
    #[serde(rename = "blockhash", default)]
    pub block_hash: Option<BlockHash>,
    #[serde(rename = "blockheight", default)]
    pub block_height: Option<u32>,
    #[serde(rename = "blocktime", default)]
    pub block_time: Option<u64>,
    pub time: u64,
}

impl WalletTransaction {
    pub fn decode(&self) -> Result<bitcoin::Transaction, CoreError> {
        decode_transaction_hex(&self.hex)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxCategory {
    Send,
    Receive,
    Generate,
    Immature,
    Orphan,
    #[serde(other)]
    Other,
}

/// One entry of `listsinceblock`'s `transactions` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ListedTransaction {
    pub txid: Txid,
    #[serde(default)]
    pub address: Option<String>,
    pub category: TxCategory,
    #[serde(rename = "blockhash", default)]
    pub block_hash: Option<BlockHash>,
    #[serde(rename = "blockheight", default)]
    pub block_height: Option<u32>,
    #[serde(rename = "blocktime", default)]
    pub block_time: Option<u64>,
    #[serde(default)]
    pub time: u64,
}

// ==============================================================================
// Wallet
// ==============================================================================

/// Subset of `getaddressinfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    #[serde(rename = "iswatchonly", default)]
    pub is_watch_only: bool,
    #[serde(rename = "ismine", default)]
    pub is_mine: bool,
}

impl AddressInfo {
    /// Descriptor wallets with private keys disabled report imported
    /// addresses as `ismine`; legacy wallets report them as watch-only.
    pub fn is_watched(&self) -> bool {
        self.is_watch_only || self.is_mine
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ScanProgress {
    /// Elapsed seconds.
    pub duration: u64,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ScanningField {
    InProgress(ScanProgress),
    Idle(bool),
}

/// Subset of `getwalletinfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletInfo {
    #[serde(rename = "walletname")]
    pub wallet_name: String,
    #[serde(default)]
    scanning: Option<ScanningField>,
}

impl WalletInfo {
    pub fn idle(wallet_name: impl Into<String>) -> Self {
        Self {
            wallet_name: wallet_name.into(),
            scanning: None,
        }
    }

    pub fn scanning(wallet_name: impl Into<String>, progress: ScanProgress) -> Self {
        Self {
            wallet_name: wallet_name.into(),
            scanning: Some(ScanningField::InProgress(progress)),
        }
    }

    /// Current rescan progress, or `None` when the wallet is not scanning.
    pub fn scan_progress(&self) -> Option<ScanProgress> {
        match self.scanning {
            Some(ScanningField::InProgress(progress)) => Some(progress),
            Some(ScanningField::Idle(_)) | None => None,
        }
    }
}

/// `getdescriptorinfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorInfo {
    /// Canonical form including the checksum.
    pub descriptor: String,
    pub checksum: String,
    #[serde(rename = "isrange", default)]
    pub is_range: bool,
}

/// One request of an `importdescriptors` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub descriptor: String,
    /// Inclusive derivation range.
    pub range: (u32, u32),
    /// Rescan from this UNIX time; `None` imports without rescanning.
    pub timestamp: Option<u32>,
}

impl ImportRequest {
    /// Descriptors are imported inactive and non-internal so that every
    /// derived address, change included, shows up in wallet listings.
    pub(crate) fn to_json(&self) -> serde_json::Value {
        let timestamp = match self.timestamp {
            Some(ts) => serde_json::json!(ts),
            None => serde_json::json!("now"),
        };
        serde_json::json!({
            "desc": self.descriptor,
            "range": [self.range.0, self.range.1],
            "timestamp": timestamp,
            "internal": false,
            "active": false,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// `rescanblockchain`.
#[derive(Debug, Clone, Deserialize)]
pub struct RescanResult {
    pub start_height: u64,
    pub stop_height: u64,
}

// ==============================================================================
// Fees
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeeMode {
    Unset,
    Economical,
    #[default]
    Conservative,
}

impl FeeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "UNSET",
            Self::Economical => "ECONOMICAL",
            Self::Conservative => "CONSERVATIVE",
        }
    }
}

impl std::str::FromStr for FeeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNSET" => Ok(Self::Unset),
            "ECONOMICAL" => Ok(Self::Economical),
            "CONSERVATIVE" => Ok(Self::Conservative),
            other => Err(format!("unknown fee estimation mode `{other}`")),
        }
    }
}

/// `estimatesmartfee`. `fee_rate` is per kvB.
#[derive(Debug, Clone, Deserialize)]
pub struct FeeEstimate {
    #[serde(rename = "feerate", default, with = "bitcoin::amount::serde::as_btc::opt")]
    pub fee_rate: Option<Amount>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub blocks: u32,
}
