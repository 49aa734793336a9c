use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Amount, BlockHash, Txid};

use crate::error::{CoreError, RpcError};
use crate::test_util::block_hash_from_byte;
use crate::types::strip_checksum;

use super::types::{
    AddressInfo, BlockInfo, ChainInfo, DescriptorInfo, FeeEstimate, FeeMode, ImportRequest,
    ImportResult, ListedTransaction, NetworkInfo, RawTransaction, RescanResult, ScanProgress,
    TxOutSetInfo, WalletInfo, WalletTransaction,
};
use super::NodeRpc;

/// Checksum the mock appends when canonicalizing descriptors.
pub const MOCK_CHECKSUM: &str = "mockcsum";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletState {
    Missing,
    Unloaded,
    Loaded,
}

/// Failure injected into a single RPC method.
#[derive(Debug, Clone)]
pub enum Fault {
    /// The session is unusable, as if the node went away.
    Disconnected,
    Server { code: i64, message: String },
}

impl Fault {
    pub fn server(code: i64, message: &str) -> Self {
        Self::Server {
            code,
            message: message.to_owned(),
        }
    }

    fn to_error(&self) -> CoreError {
        match self {
            Self::Disconnected => CoreError::PoolClosed,
            Self::Server { code, message } => CoreError::Rpc(RpcError::ServerError {
                code: *code,
                message: message.clone(),
            }),
        }
    }
}

/// In-memory stand-in for a Bitcoin Core node with a watch-only wallet.
///
/// Every trait call is appended to a call log; batched calls are logged once
/// with a `[]` suffix. Importing a descriptor marks the addresses registered
/// for it with [`MockNodeBuilder::with_derivation`] as watched.
pub struct MockNode {
    chain_info: Mutex<VecDeque<ChainInfo>>,
    network_info: NetworkInfo,
    blocks: HashMap<BlockHash, BlockInfo>,
    heights: HashMap<u32, BlockHash>,
    tx_index: bool,
    block_filters: bool,
    index_txs: HashMap<Txid, RawTransaction>,
    wallet_txs: HashMap<Txid, WalletTransaction>,
    listed: Vec<ListedTransaction>,
    derivations: HashMap<(String, u32), String>,
    invalid_descriptors: HashSet<String>,
    fees: HashMap<u16, Amount>,
    tx_out_set: TxOutSetInfo,
    wallet_state: Mutex<WalletState>,
    wallet_disabled: bool,
    watched: Mutex<HashSet<String>>,
    scan_progress: Mutex<VecDeque<Option<ScanProgress>>>,
    import_delay: Option<Duration>,
    failed_imports: HashSet<String>,
    faults: Mutex<HashMap<&'static str, Fault>>,
    stalls: Mutex<HashMap<&'static str, Duration>>,
    calls: Mutex<Vec<String>>,
    closed: AtomicBool,
}

pub struct MockNodeBuilder {
    node: MockNode,
}

impl MockNode {
    pub fn builder() -> MockNodeBuilder {
        let tip = block_hash_from_byte(200);
        MockNodeBuilder {
            node: MockNode {
                chain_info: Mutex::new(VecDeque::from([ChainInfo {
                    chain: "regtest".into(),
                    blocks: 200,
                    headers: 200,
                    best_block_hash: tip,
                    pruned: false,
                    verification_progress: 1.0,
                }])),
                network_info: NetworkInfo {
                    version: 270_000,
                    subversion: "/Satoshi:27.0.0/".into(),
                    relay_fee: Amount::from_sat(1000),
                    incremental_fee: Amount::from_sat(1000),
                },
                blocks: HashMap::new(),
                heights: HashMap::new(),
                tx_index: true,
                block_filters: false,
                index_txs: HashMap::new(),
                wallet_txs: HashMap::new(),
                listed: Vec::new(),
                derivations: HashMap::new(),
                invalid_descriptors: HashSet::new(),
                fees: HashMap::new(),
                tx_out_set: TxOutSetInfo {
                    height: 200,
                    total_amount: Amount::ZERO,
                },
                wallet_state: Mutex::new(WalletState::Loaded),
                wallet_disabled: false,
                watched: Mutex::new(HashSet::new()),
                scan_progress: Mutex::new(VecDeque::new()),
                import_delay: None,
                failed_imports: HashSet::new(),
                faults: Mutex::new(HashMap::new()),
                stalls: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            },
        }
    }

    /// Method names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| *m == method).count()
    }

    pub fn is_watched(&self, address: &str) -> bool {
        self.watched.lock().unwrap().contains(address)
    }

    pub fn wallet_state(&self) -> WalletState {
        *self.wallet_state.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Inject (or with `None`, clear) a failure for `method`.
    pub fn set_fault(&self, method: &'static str, fault: Option<Fault>) {
        let mut faults = self.faults.lock().unwrap();
        match fault {
            Some(fault) => faults.insert(method, fault),
            None => faults.remove(method),
        };
    }

    /// Make `method` sleep for `delay` before answering.
    pub fn set_stall(&self, method: &'static str, delay: Duration) {
        self.stalls.lock().unwrap().insert(method, delay);
    }

    async fn enter(&self, method: &'static str) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(method.to_owned());
        let stall = self.stalls.lock().unwrap().get(method).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if let Some(fault) = self.faults.lock().unwrap().get(method) {
            return Err(fault.to_error());
        }
        Ok(())
    }

    fn current_chain_info(&self) -> ChainInfo {
        let mut infos = self.chain_info.lock().unwrap();
        if infos.len() > 1 {
            if let Some(info) = infos.pop_front() {
                return info;
            }
        }
        infos.front().cloned().unwrap()
    }

    fn wallet_guard(&self) -> Result<(), CoreError> {
        match *self.wallet_state.lock().unwrap() {
            WalletState::Loaded => Ok(()),
            _ => Err(Fault::server(-18, "Requested wallet does not exist or is not loaded").to_error()),
        }
    }
}

impl MockNodeBuilder {
    pub fn with_chain_info(self, info: ChainInfo) -> Self {
        self.with_chain_sequence(vec![info])
    }

    /// Successive `getblockchaininfo` answers; the last one repeats.
    pub fn with_chain_sequence(mut self, infos: Vec<ChainInfo>) -> Self {
        self.node.chain_info = Mutex::new(infos.into());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.node.network_info.version = version;
        self
    }

    pub fn with_block(mut self, block: BlockInfo) -> Self {
        self.node.heights.insert(block.height, block.hash);
        self.node.blocks.insert(block.hash, block);
        self
    }

    pub fn with_tx(mut self, tx: RawTransaction) -> Self {
        self.node.index_txs.insert(tx.tx.compute_txid(), tx);
        self
    }

    pub fn without_tx_index(mut self) -> Self {
        self.node.tx_index = false;
        self
    }

    pub fn with_block_filters(mut self) -> Self {
        self.node.block_filters = true;
        self
    }

    pub fn with_wallet_tx(mut self, txid: Txid, tx: WalletTransaction) -> Self {
        self.node.wallet_txs.insert(txid, tx);
        self
    }

    pub fn with_listed(mut self, entry: ListedTransaction) -> Self {
        self.node.listed.push(entry);
        self
    }

    /// Register the address derived from `descriptor` (checksum ignored) at
    /// `index`.
    pub fn with_derivation(mut self, descriptor: &str, index: u32, address: &str) -> Self {
        self.node
            .derivations
            .insert((strip_checksum(descriptor).to_owned(), index), address.to_owned());
        self
    }

    pub fn with_invalid_descriptor(mut self, descriptor: &str) -> Self {
        self.node
            .invalid_descriptors
            .insert(strip_checksum(descriptor).to_owned());
        self
    }

    pub fn with_watched(self, address: &str) -> Self {
        self.node.watched.lock().unwrap().insert(address.to_owned());
        self
    }

    pub fn with_fee(mut self, target: u16, rate: Amount) -> Self {
        self.node.fees.insert(target, rate);
        self
    }

    pub fn with_tx_out_set(mut self, info: TxOutSetInfo) -> Self {
        self.node.tx_out_set = info;
        self
    }

    pub fn with_wallet_state(self, state: WalletState) -> Self {
        *self.node.wallet_state.lock().unwrap() = state;
        self
    }

    pub fn with_wallet_disabled(mut self) -> Self {
        self.node.wallet_disabled = true;
        self
    }

    /// Successive `getwalletinfo` scan states; the last one repeats.
    pub fn with_scan_progress(self, states: Vec<Option<ScanProgress>>) -> Self {
        *self.node.scan_progress.lock().unwrap() = states.into();
        self
    }

    /// Make `importdescriptors` take this long.
    pub fn with_import_delay(mut self, delay: Duration) -> Self {
        self.node.import_delay = Some(delay);
        self
    }

    /// Reject imports of `descriptor` (checksum ignored).
    pub fn with_failed_import(mut self, descriptor: &str) -> Self {
        self.node
            .failed_imports
            .insert(strip_checksum(descriptor).to_owned());
        self
    }

    pub fn with_fault(self, method: &'static str, fault: Fault) -> Self {
        self.node.set_fault(method, Some(fault));
        self
    }

    pub fn build(self) -> MockNode {
        self.node
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn get_blockchain_info(&self) -> Result<ChainInfo, CoreError> {
        self.enter("getblockchaininfo").await?;
        Ok(self.current_chain_info())
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, CoreError> {
        self.enter("getnetworkinfo").await?;
        Ok(self.network_info.clone())
    }

    async fn get_best_block_hash(&self) -> Result<BlockHash, CoreError> {
        self.enter("getbestblockhash").await?;
        let infos = self.chain_info.lock().unwrap();
        Ok(infos.back().map(|info| info.best_block_hash).unwrap())
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, CoreError> {
        self.enter("getblockhash").await?;
        u32::try_from(height)
            .ok()
            .and_then(|h| self.heights.get(&h).copied())
            .ok_or_else(|| CoreError::BlockNotFound(height.to_string()))
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<BlockInfo, CoreError> {
        self.enter("getblock").await?;
        self.blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| CoreError::block_not_found(hash))
    }

    async fn get_block_filter(&self, _hash: &BlockHash) -> Result<String, CoreError> {
        self.enter("getblockfilter").await?;
        if self.block_filters {
            Ok("017f2c80".into())
        } else {
            Err(Fault::server(-1, "Index is not enabled for filtertype basic").to_error())
        }
    }

    async fn get_tx_out_set_info(&self) -> Result<TxOutSetInfo, CoreError> {
        self.enter("gettxoutsetinfo").await?;
        Ok(self.tx_out_set.clone())
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, CoreError> {
        self.enter("getrawtransaction").await?;
        let found = self.index_txs.get(txid);
        match found {
            Some(tx) if self.tx_index || tx.confirmations == 0 => Ok(tx.clone()),
            _ => Err(CoreError::TxNotFound(*txid)),
        }
    }

    async fn get_raw_transactions(
        &self,
        txids: &[Txid],
    ) -> Result<Vec<Result<RawTransaction, CoreError>>, CoreError> {
        self.enter("getrawtransaction[]").await?;
        Ok(txids
            .iter()
            .map(|txid| match self.index_txs.get(txid) {
                Some(tx) if self.tx_index || tx.confirmations == 0 => Ok(tx.clone()),
                _ => Err(CoreError::TxNotFound(*txid)),
            })
            .collect())
    }

    async fn send_raw_transaction(&self, tx: &bitcoin::Transaction) -> Result<Txid, CoreError> {
        self.enter("sendrawtransaction").await?;
        Ok(tx.compute_txid())
    }

    async fn estimate_smart_fee(
        &self,
        target: u16,
        _mode: FeeMode,
    ) -> Result<FeeEstimate, CoreError> {
        self.enter("estimatesmartfee").await?;
        Ok(match self.fees.get(&target) {
            Some(rate) => FeeEstimate {
                fee_rate: Some(*rate),
                errors: Vec::new(),
                blocks: u32::from(target),
            },
            None => FeeEstimate {
                fee_rate: None,
                errors: vec!["Insufficient data or no feerate found".into()],
                blocks: 0,
            },
        })
    }

    async fn get_wallet_transaction(&self, txid: &Txid) -> Result<WalletTransaction, CoreError> {
        self.enter("gettransaction").await?;
        self.wallet_guard()?;
        self.wallet_txs
            .get(txid)
            .cloned()
            .ok_or(CoreError::TxNotFound(*txid))
    }

    async fn get_wallet_transactions(
        &self,
        txids: &[Txid],
    ) -> Result<Vec<Result<WalletTransaction, CoreError>>, CoreError> {
        self.enter("gettransaction[]").await?;
        self.wallet_guard()?;
        Ok(txids
            .iter()
            .map(|txid| {
                self.wallet_txs
                    .get(txid)
                    .cloned()
                    .ok_or(CoreError::TxNotFound(*txid))
            })
            .collect())
    }

    async fn list_since_block(
        &self,
        _block_hash: Option<&BlockHash>,
        _target_confirmations: u32,
    ) -> Result<Vec<ListedTransaction>, CoreError> {
        self.enter("listsinceblock").await?;
        self.wallet_guard()?;
        Ok(self.listed.clone())
    }

    async fn get_address_info(&self, address: &str) -> Result<AddressInfo, CoreError> {
        self.enter("getaddressinfo").await?;
        self.wallet_guard()?;
        let watched = self.is_watched(address);
        Ok(AddressInfo {
            address: address.to_owned(),
            is_watch_only: false,
            is_mine: watched,
        })
    }

    async fn get_wallet_info(&self) -> Result<WalletInfo, CoreError> {
        self.enter("getwalletinfo").await?;
        self.wallet_guard()?;
        let mut states = self.scan_progress.lock().unwrap();
        let state = if states.len() > 1 {
            states.pop_front().flatten()
        } else {
            states.front().copied().flatten()
        };
        Ok(match state {
            Some(progress) => WalletInfo::scanning("satbridge", progress),
            None => WalletInfo::idle("satbridge"),
        })
    }

    async fn derive_addresses(
        &self,
        descriptor: &str,
        range: (u32, u32),
    ) -> Result<Vec<String>, CoreError> {
        self.enter("deriveaddresses").await?;
        let body = strip_checksum(descriptor);
        (range.0..=range.1)
            .map(|index| {
                self.derivations
                    .get(&(body.to_owned(), index))
                    .cloned()
                    .ok_or_else(|| {
                        Fault::server(-5, &format!("cannot derive index {index}")).to_error()
                    })
            })
            .collect()
    }

    async fn get_descriptor_info(&self, descriptor: &str) -> Result<DescriptorInfo, CoreError> {
        self.enter("getdescriptorinfo").await?;
        let body = strip_checksum(descriptor);
        if self.invalid_descriptors.contains(body) {
            return Err(Fault::server(-5, "Invalid descriptor").to_error());
        }
        Ok(DescriptorInfo {
            descriptor: format!("{body}#{MOCK_CHECKSUM}"),
            checksum: MOCK_CHECKSUM.to_owned(),
            is_range: body.contains('*'),
        })
    }

    async fn import_descriptors(
        &self,
        requests: &[ImportRequest],
    ) -> Result<Vec<ImportResult>, CoreError> {
        self.enter("importdescriptors").await?;
        self.wallet_guard()?;
        if let Some(delay) = self.import_delay {
            tokio::time::sleep(delay).await;
        }

        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let body = strip_checksum(&request.descriptor);
            if self.failed_imports.contains(body) {
                results.push(ImportResult {
                    success: false,
                    warnings: Vec::new(),
                    error: Some(serde_json::json!({ "code": -4, "message": "import rejected" })),
                });
                continue;
            }
            let mut watched = self.watched.lock().unwrap();
            for index in request.range.0..=request.range.1 {
                if let Some(address) = self.derivations.get(&(body.to_owned(), index)) {
                    watched.insert(address.clone());
                }
            }
            results.push(ImportResult {
                success: true,
                warnings: Vec::new(),
                error: None,
            });
        }
        Ok(results)
    }

    async fn load_wallet(&self, name: &str) -> Result<(), CoreError> {
        self.enter("loadwallet").await?;
        if self.wallet_disabled {
            return Err(Fault::server(-32601, "Method not found").to_error());
        }
        let mut state = self.wallet_state.lock().unwrap();
        match *state {
            WalletState::Loaded => Err(Fault::server(
                -35,
                &format!("Wallet \"{name}\" is already loaded."),
            )
            .to_error()),
            WalletState::Missing => Err(Fault::server(
                -18,
                &format!("Wallet file not found: {name}"),
            )
            .to_error()),
            WalletState::Unloaded => {
                *state = WalletState::Loaded;
                Ok(())
            }
        }
    }

    async fn create_watch_only_wallet(&self, name: &str) -> Result<(), CoreError> {
        self.enter("createwallet").await?;
        let mut state = self.wallet_state.lock().unwrap();
        if *state != WalletState::Missing {
            return Err(Fault::server(-4, &format!("Wallet file {name} already exists.")).to_error());
        }
        *state = WalletState::Loaded;
        Ok(())
    }

    async fn unload_wallet(&self, _name: &str) -> Result<(), CoreError> {
        self.enter("unloadwallet").await?;
        self.wallet_guard()?;
        *self.wallet_state.lock().unwrap() = WalletState::Unloaded;
        Ok(())
    }

    async fn rescan_blockchain(
        &self,
        start_height: Option<u64>,
        stop_height: Option<u64>,
    ) -> Result<RescanResult, CoreError> {
        self.enter("rescanblockchain").await?;
        self.wallet_guard()?;
        let tip = self.current_chain_info().blocks;
        Ok(RescanResult {
            start_height: start_height.unwrap_or(0),
            stop_height: stop_height.unwrap_or(tip),
        })
    }

    async fn abort_rescan(&self) -> Result<bool, CoreError> {
        self.enter("abortrescan").await?;
        self.wallet_guard()?;
        let scanning = self
            .scan_progress
            .lock()
            .unwrap()
            .front()
            .is_some_and(Option::is_some);
        Ok(scanning)
    }

    async fn close(&self) {
        self.calls.lock().unwrap().push("close".to_owned());
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ImportRequest;

    #[tokio::test]
    async fn chain_sequence_advances_then_repeats() {
        let base = MockNode::builder().build().current_chain_info();
        let behind = ChainInfo {
            blocks: 10,
            ..base.clone()
        };
        let rpc = MockNode::builder()
            .with_chain_sequence(vec![behind, base])
            .build();
        assert_eq!(rpc.get_blockchain_info().await.unwrap().blocks, 10);
        assert_eq!(rpc.get_blockchain_info().await.unwrap().blocks, 200);
        assert_eq!(rpc.get_blockchain_info().await.unwrap().blocks, 200);
        assert_eq!(rpc.call_count("getblockchaininfo"), 3);
    }

    #[tokio::test]
    async fn importing_marks_derived_addresses_watched() {
        let rpc = MockNode::builder()
            .with_derivation("wpkh(xpub/0/*)", 0, "bcrt1qzero")
            .with_derivation("wpkh(xpub/0/*)", 1, "bcrt1qone")
            .build();
        let results = rpc
            .import_descriptors(&[ImportRequest {
                descriptor: format!("wpkh(xpub/0/*)#{MOCK_CHECKSUM}"),
                range: (0, 1),
                timestamp: Some(0),
            }])
            .await
            .unwrap();
        assert!(results[0].success);
        assert!(rpc.is_watched("bcrt1qzero"));
        assert!(rpc.is_watched("bcrt1qone"));
    }

    #[tokio::test]
    async fn injected_fault_is_returned_and_logged() {
        let rpc = MockNode::builder()
            .with_fault("getnetworkinfo", Fault::Disconnected)
            .build();
        let err = rpc.get_network_info().await.unwrap_err();
        assert!(err.is_connectivity());
        rpc.set_fault("getnetworkinfo", None);
        assert!(rpc.get_network_info().await.is_ok());
        assert_eq!(rpc.calls(), vec!["getnetworkinfo", "getnetworkinfo"]);
    }
}
