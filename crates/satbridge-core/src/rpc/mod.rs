//! Bitcoin Core RPC abstraction layer.
//!
//! Defines the [`NodeRpc`] trait and provides an HTTP JSON-RPC
//! implementation ([`HttpRpcClient`]) plus a test mock (`mock::MockNode`).

mod http_adapter;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use http_adapter::{HttpRpcClient, RpcEndpoint};
pub use types::{
    decode_transaction_hex, AddressInfo, BlockInfo, ChainInfo, DescriptorInfo, FeeEstimate,
    FeeMode, ImportRequest, ImportResult, ListedTransaction, NetworkInfo, RawTransaction,
    RescanResult, ScanProgress, TxCategory, TxOutSetInfo, WalletInfo, WalletTransaction,
};

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};

use crate::error::CoreError;

/// The Bitcoin Core RPC methods the bridge needs.
///
/// One implementation value is one session with the node. Wallet-scoped
/// methods address the bridge's watch-only wallet; implementations handle
/// authentication, transport and response decoding internally.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    // -- chain ----------------------------------------------------------------

    async fn get_blockchain_info(&self) -> Result<ChainInfo, CoreError>;

    async fn get_network_info(&self) -> Result<NetworkInfo, CoreError>;

    async fn get_best_block_hash(&self) -> Result<BlockHash, CoreError>;

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, CoreError>;

    async fn get_block(&self, hash: &BlockHash) -> Result<BlockInfo, CoreError>;

    /// Fetch the basic compact filter of a block, hex encoded.
    async fn get_block_filter(&self, hash: &BlockHash) -> Result<String, CoreError>;

    async fn get_tx_out_set_info(&self) -> Result<TxOutSetInfo, CoreError>;

    // -- raw transactions -----------------------------------------------------

    /// Fetch a transaction through the node's transaction index (or mempool).
    async fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, CoreError>;

    /// Fetch many transactions through the index. Implementations may batch
    /// these requests into a single round-trip. Items fail independently; the
    /// outer error is reserved for failures of the whole exchange.
    async fn get_raw_transactions(
        &self,
        txids: &[Txid],
    ) -> Result<Vec<Result<RawTransaction, CoreError>>, CoreError> {
        let mut results = Vec::with_capacity(txids.len());
        for txid in txids {
            results.push(self.get_raw_transaction(txid).await);
        }
        Ok(results)
    }

    async fn send_raw_transaction(&self, tx: &bitcoin::Transaction) -> Result<Txid, CoreError>;

    async fn estimate_smart_fee(&self, target: u16, mode: FeeMode)
        -> Result<FeeEstimate, CoreError>;

    // -- wallet ---------------------------------------------------------------

    /// Fetch a transaction through the wallet. Only works for transactions
    /// touching a watched address.
    async fn get_wallet_transaction(&self, txid: &Txid) -> Result<WalletTransaction, CoreError>;

    /// Batched form of [`NodeRpc::get_wallet_transaction`]. Each item is
    /// resolved independently so one unknown hash does not fail the batch.
    async fn get_wallet_transactions(
        &self,
        txids: &[Txid],
    ) -> Result<Vec<Result<WalletTransaction, CoreError>>, CoreError> {
        let mut results = Vec::with_capacity(txids.len());
        for txid in txids {
            results.push(self.get_wallet_transaction(txid).await);
        }
        Ok(results)
    }

    /// `listsinceblock`, including watch-only entries.
    async fn list_since_block(
        &self,
        block_hash: Option<&BlockHash>,
        target_confirmations: u32,
    ) -> Result<Vec<ListedTransaction>, CoreError>;

    async fn get_address_info(&self, address: &str) -> Result<AddressInfo, CoreError>;

    async fn get_wallet_info(&self) -> Result<WalletInfo, CoreError>;

    /// Derive addresses for the inclusive index `range`.
    async fn derive_addresses(
        &self,
        descriptor: &str,
        range: (u32, u32),
    ) -> Result<Vec<String>, CoreError>;

    async fn get_descriptor_info(&self, descriptor: &str) -> Result<DescriptorInfo, CoreError>;

    async fn import_descriptors(
        &self,
        requests: &[ImportRequest],
    ) -> Result<Vec<ImportResult>, CoreError>;

    async fn load_wallet(&self, name: &str) -> Result<(), CoreError>;

    /// Create a blank, descriptor-based wallet with private keys disabled.
    async fn create_watch_only_wallet(&self, name: &str) -> Result<(), CoreError>;

    async fn unload_wallet(&self, name: &str) -> Result<(), CoreError>;

    async fn rescan_blockchain(
        &self,
        start_height: Option<u64>,
        stop_height: Option<u64>,
    ) -> Result<RescanResult, CoreError>;

    /// Returns `true` when a rescan was running and has been stopped.
    async fn abort_rescan(&self) -> Result<bool, CoreError>;

    // -- session --------------------------------------------------------------

    /// Tear down the session. Further calls may fail.
    async fn close(&self) {}
}
