use std::collections::HashMap;
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{BlockHash, Txid};
use futures::future::{join_all, try_join_all};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use lru::LruCache;
use reqwest::header;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::error::{CoreError, RpcError};

use super::super::types::{
    AddressInfo, BlockInfo, ChainInfo, DescriptorInfo, FeeEstimate, FeeMode, ImportRequest,
    ImportResult, ListedTransaction, NetworkInfo, RawTransaction, RescanResult, TxOutSetInfo,
    WalletInfo, WalletTransaction,
};
use super::super::NodeRpc;
use super::connection::{parse_connection, resolve_auth, wallet_url};
use super::parsing::{
    parse_integer_optional, parse_raw_transaction, parse_tx_out_set_info, parse_txid,
};
use super::protocol::{parse_batch_id, JsonRpcRequest, JsonRpcResponse};

/// Maximum number of block-hash → height entries cached in memory.
const BLOCK_HEIGHT_CACHE_CAP: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(cap) => cap,
    None => panic!("BLOCK_HEIGHT_CACHE_CAP must be non-zero"),
};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Calls that block until the node finishes a chain scan or UTXO set walk.
const LONG_CALL_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Everything needed to open a session with the node.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    /// `host:port` or a full `http(s)://` URL.
    pub url: String,
    /// Use plain HTTP for bare `host:port` values.
    pub no_tls: bool,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub cookie_file: Option<PathBuf>,
    /// Wallet addressed by wallet-scoped calls.
    pub wallet: String,
    /// Rate limit per outbound HTTP request; a batch counts once.
    pub requests_per_second: Option<u32>,
    pub batch_chunk_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Node,
    Wallet,
}

/// Bitcoin Core JSON-RPC client over HTTP(S).
///
/// One value is one session. Confirmed block heights are cached in an LRU
/// keyed by block hash; heights never change so entries are only evicted.
pub struct HttpRpcClient {
    client: reqwest::Client,
    node_url: String,
    wallet_url: String,
    auth: Option<(String, String)>,
    limiter: Option<DirectRateLimiter>,
    batch_chunk_size: usize,
    next_id: AtomicU64,
    closed: AtomicBool,
    block_height_cache: RwLock<LruCache<BlockHash, u32>>,
}

impl HttpRpcClient {
    /// Open a session.
    ///
    /// Authentication precedence:
    /// 1. explicit `user` + `pass`
    /// 2. cookie file (`username:password`)
    /// 3. no auth
    pub fn connect(endpoint: &RpcEndpoint) -> Result<Self, CoreError> {
        if endpoint.batch_chunk_size == 0 {
            return Err(CoreError::Config(
                "rpc batch chunk size must be at least 1".to_owned(),
            ));
        }
        let auth = resolve_auth(
            endpoint.user.as_deref(),
            endpoint.pass.as_deref(),
            endpoint.cookie_file.as_deref(),
        )?;
        let node_url = parse_connection(&endpoint.url, endpoint.no_tls)?;
        let wallet_url = wallet_url(&node_url, &endpoint.wallet);

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .build()
            .map_err(RpcError::Transport)?;

        let limiter = match endpoint.requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::Config("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            client,
            node_url,
            wallet_url,
            auth,
            limiter,
            batch_chunk_size: endpoint.batch_chunk_size,
            next_id: AtomicU64::new(initial_request_id()),
            closed: AtomicBool::new(false),
            block_height_cache: RwLock::new(LruCache::new(BLOCK_HEIGHT_CACHE_CAP)),
        })
    }

    /// Atomically reserve `count` consecutive request IDs for batch calls.
    fn reserve_request_ids(&self, count: u64) -> u64 {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::PoolClosed);
        }
        Ok(())
    }

    fn post<T: serde::Serialize + ?Sized>(
        &self,
        target: Target,
        timeout: Duration,
        body: &T,
    ) -> reqwest::RequestBuilder {
        let url = match target {
            Target::Node => &self.node_url,
            Target::Wallet => &self.wallet_url,
        };
        let mut builder = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(body);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }
        builder
    }

    async fn rpc_call(
        &self,
        target: Target,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.ensure_open()?;
        self.wait_for_rate_limit().await;
        let id = self.reserve_request_ids(1);
        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            rpc.wallet = target == Target::Wallet,
            "rpc call"
        );
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        };

        let response = self
            .post(target, call_timeout(method), &req)
            .send()
            .await
            .map_err(RpcError::Transport)?;
        let status = response.status();

        let body = response.text().await.map_err(RpcError::Transport)?;
        debug!(rpc.id = id, rpc.method = method, %status, body_len = body.len(), "rpc response");
        trace!(rpc.id = id, rpc.method = method, body = %body, "rpc response body");

        let decoded: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC response: {e}; body={body}"))
        })?;
        decoded.into_result()
    }

    /// Send one JSON-RPC batch. The outer error covers the exchange; each
    /// item carries its own outcome.
    async fn rpc_batch(
        &self,
        target: Target,
        calls: &[(&'static str, Vec<serde_json::Value>)],
    ) -> Result<Vec<Result<serde_json::Value, CoreError>>, CoreError> {
        self.ensure_open()?;
        self.wait_for_rate_limit().await;
        let start_id = self.reserve_request_ids(calls.len() as u64);
        debug!(
            rpc.batch_start_id = start_id,
            rpc.batch_size = calls.len(),
            "rpc batch call"
        );
        let requests: Vec<JsonRpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(offset, (method, params))| JsonRpcRequest {
                jsonrpc: "2.0",
                id: start_id + offset as u64,
                method: (*method).into(),
                params: params.clone(),
            })
            .collect();

        let response = self
            .post(target, CALL_TIMEOUT, &requests)
            .send()
            .await
            .map_err(RpcError::Transport)?;
        let status = response.status();

        let body = response.text().await.map_err(RpcError::Transport)?;
        debug!(
            rpc.batch_start_id = start_id,
            rpc.batch_size = calls.len(),
            %status,
            body_len = body.len(),
            "rpc batch response"
        );
        trace!(rpc.batch_start_id = start_id, body = %body, "rpc batch response body");

        let decoded: Vec<JsonRpcResponse> = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC batch response: {e}; body={body}"))
        })?;

        let mut by_id: HashMap<u64, JsonRpcResponse> = HashMap::with_capacity(decoded.len());
        for item in decoded {
            let id = parse_batch_id(&item.id)?;
            by_id.insert(id, item);
        }

        Ok((start_id..start_id + calls.len() as u64)
            .map(|id| match by_id.remove(&id) {
                Some(item) => item.into_result(),
                None => Err(RpcError::MissingBatchItem { id }.into()),
            })
            .collect())
    }

    async fn rpc_batch_chunked(
        &self,
        target: Target,
        calls: &[(&'static str, Vec<serde_json::Value>)],
    ) -> Result<Vec<Result<serde_json::Value, CoreError>>, CoreError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        // Chunks stay under node/proxy payload limits but are sent
        // concurrently.
        let chunk_futures: Vec<_> = calls
            .chunks(self.batch_chunk_size)
            .map(|chunk| self.rpc_batch(target, chunk))
            .collect();
        let chunked = try_join_all(chunk_futures).await?;
        Ok(chunked.into_iter().flatten().collect())
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        target: Target,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, CoreError> {
        let raw = self.rpc_call(target, method, params).await?;
        decode_result(method, raw)
    }

    async fn fill_block_height(&self, mut raw: RawTransaction) -> Result<RawTransaction, CoreError> {
        if raw.block_height.is_none() && raw.confirmations > 0 {
            if let Some(block_hash) = raw.block_hash {
                raw.block_height = self.get_block_height(block_hash).await?;
            }
        }
        Ok(raw)
    }

    async fn get_block_height(&self, block_hash: BlockHash) -> Result<Option<u32>, CoreError> {
        // `LruCache::get` updates recency, hence the write lock.
        if let Some(height) = self
            .block_height_cache
            .write()
            .await
            .get(&block_hash)
            .copied()
        {
            return Ok(Some(height));
        }

        let raw = self
            .rpc_call(
                Target::Node,
                "getblockheader",
                vec![
                    serde_json::json!(block_hash.to_string()),
                    serde_json::json!(true),
                ],
            )
            .await?;
        let height = parse_integer_optional::<u32, false>(raw.get("height"));
        if let Some(height) = height {
            self.block_height_cache
                .write()
                .await
                .put(block_hash, height);
        }
        Ok(height)
    }
}

#[async_trait]
impl NodeRpc for HttpRpcClient {
    async fn get_blockchain_info(&self) -> Result<ChainInfo, CoreError> {
        self.call_as(Target::Node, "getblockchaininfo", Vec::new())
            .await
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, CoreError> {
        self.call_as(Target::Node, "getnetworkinfo", Vec::new()).await
    }

    async fn get_best_block_hash(&self) -> Result<BlockHash, CoreError> {
        self.call_as(Target::Node, "getbestblockhash", Vec::new())
            .await
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, CoreError> {
        self.call_as(Target::Node, "getblockhash", vec![serde_json::json!(height)])
            .await
            .map_err(|err| normalize_block_error(height.to_string(), err))
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<BlockInfo, CoreError> {
        self.call_as(
            Target::Node,
            "getblock",
            vec![serde_json::json!(hash.to_string()), serde_json::json!(1)],
        )
        .await
        .map_err(|err| normalize_block_error(hash.to_string(), err))
    }

    async fn get_block_filter(&self, hash: &BlockHash) -> Result<String, CoreError> {
        #[derive(serde::Deserialize)]
        struct BlockFilter {
            filter: String,
        }

        let filter: BlockFilter = self
            .call_as(
                Target::Node,
                "getblockfilter",
                vec![serde_json::json!(hash.to_string()), serde_json::json!("basic")],
            )
            .await?;
        Ok(filter.filter)
    }

    async fn get_tx_out_set_info(&self) -> Result<TxOutSetInfo, CoreError> {
        let raw = self
            .rpc_call(Target::Node, "gettxoutsetinfo", Vec::new())
            .await?;
        parse_tx_out_set_info(&raw)
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, CoreError> {
        let raw = self
            .rpc_call(
                Target::Node,
                "getrawtransaction",
                vec![serde_json::json!(txid.to_string()), serde_json::json!(true)],
            )
            .await
            .map_err(|err| normalize_tx_error(txid, err))?;
        self.fill_block_height(parse_raw_transaction(&raw)?).await
    }

    async fn get_raw_transactions(
        &self,
        txids: &[Txid],
    ) -> Result<Vec<Result<RawTransaction, CoreError>>, CoreError> {
        let calls: Vec<_> = txids
            .iter()
            .map(|txid| {
                (
                    "getrawtransaction",
                    vec![serde_json::json!(txid.to_string()), serde_json::json!(true)],
                )
            })
            .collect();

        let raw_results = match self.rpc_batch_chunked(Target::Node, &calls).await {
            Ok(results) => results,
            Err(batch_error) if !batch_error.is_connectivity() => {
                warn!(
                    tx_count = txids.len(),
                    error = %batch_error,
                    "batch getrawtransaction failed; falling back to sequential requests"
                );
                let mut sequential = Vec::with_capacity(txids.len());
                for txid in txids {
                    sequential.push(self.get_raw_transaction(txid).await);
                }
                return Ok(sequential);
            }
            Err(batch_error) => return Err(batch_error),
        };

        let parse_futures = txids.iter().zip(raw_results).map(|(txid, item)| async move {
            let raw = item.map_err(|err| normalize_tx_error(txid, err))?;
            self.fill_block_height(parse_raw_transaction(&raw)?).await
        });
        Ok(join_all(parse_futures).await)
    }

    async fn send_raw_transaction(&self, tx: &bitcoin::Transaction) -> Result<Txid, CoreError> {
        let raw = self
            .rpc_call(
                Target::Node,
                "sendrawtransaction",
                vec![serde_json::json!(serialize_hex(tx))],
            )
            .await?;
        parse_txid(Some(&raw), "sendrawtransaction result")
    }

    async fn estimate_smart_fee(
        &self,
        target: u16,
        mode: FeeMode,
    ) -> Result<FeeEstimate, CoreError> {
        self.call_as(
            Target::Node,
            "estimatesmartfee",
            vec![serde_json::json!(target), serde_json::json!(mode.as_str())],
        )
        .await
    }

    async fn get_wallet_transaction(&self, txid: &Txid) -> Result<WalletTransaction, CoreError> {
        self.call_as(
            Target::Wallet,
            "gettransaction",
            vec![serde_json::json!(txid.to_string()), serde_json::json!(true)],
        )
        .await
        .map_err(|err| normalize_tx_error(txid, err))
    }

    async fn get_wallet_transactions(
        &self,
        txids: &[Txid],
    ) -> Result<Vec<Result<WalletTransaction, CoreError>>, CoreError> {
        let calls: Vec<_> = txids
            .iter()
            .map(|txid| {
                (
                    "gettransaction",
                    vec![serde_json::json!(txid.to_string()), serde_json::json!(true)],
                )
            })
            .collect();

        let raw_results = self.rpc_batch_chunked(Target::Wallet, &calls).await?;
        Ok(txids
            .iter()
            .zip(raw_results)
            .map(|(txid, item)| {
                item.and_then(|raw| decode_result("gettransaction", raw))
                    .map_err(|err| normalize_tx_error(txid, err))
            })
            .collect())
    }

    async fn list_since_block(
        &self,
        block_hash: Option<&BlockHash>,
        target_confirmations: u32,
    ) -> Result<Vec<ListedTransaction>, CoreError> {
        #[derive(serde::Deserialize)]
        struct SinceBlock {
            transactions: Vec<ListedTransaction>,
        }

        let from = block_hash.map(ToString::to_string).unwrap_or_default();
        let listed: SinceBlock = self
            .call_as(
                Target::Wallet,
                "listsinceblock",
                vec![
                    serde_json::json!(from),
                    serde_json::json!(target_confirmations),
                    serde_json::json!(true),
                ],
            )
            .await?;
        Ok(listed.transactions)
    }

    async fn get_address_info(&self, address: &str) -> Result<AddressInfo, CoreError> {
        self.call_as(
            Target::Wallet,
            "getaddressinfo",
            vec![serde_json::json!(address)],
        )
        .await
    }

    async fn get_wallet_info(&self) -> Result<WalletInfo, CoreError> {
        self.call_as(Target::Wallet, "getwalletinfo", Vec::new())
            .await
    }

    async fn derive_addresses(
        &self,
        descriptor: &str,
        range: (u32, u32),
    ) -> Result<Vec<String>, CoreError> {
        self.call_as(
            Target::Node,
            "deriveaddresses",
            vec![
                serde_json::json!(descriptor),
                serde_json::json!([range.0, range.1]),
            ],
        )
        .await
    }

    async fn get_descriptor_info(&self, descriptor: &str) -> Result<DescriptorInfo, CoreError> {
        self.call_as(
            Target::Node,
            "getdescriptorinfo",
            vec![serde_json::json!(descriptor)],
        )
        .await
    }

    async fn import_descriptors(
        &self,
        requests: &[ImportRequest],
    ) -> Result<Vec<ImportResult>, CoreError> {
        let payload: Vec<serde_json::Value> = requests.iter().map(ImportRequest::to_json).collect();
        self.call_as(
            Target::Wallet,
            "importdescriptors",
            vec![serde_json::Value::Array(payload)],
        )
        .await
    }

    async fn load_wallet(&self, name: &str) -> Result<(), CoreError> {
        self.rpc_call(Target::Node, "loadwallet", vec![serde_json::json!(name)])
            .await
            .map(drop)
    }

    async fn create_watch_only_wallet(&self, name: &str) -> Result<(), CoreError> {
        self.rpc_call(
            Target::Node,
            "createwallet",
            vec![
                serde_json::json!(name),
                serde_json::json!(true),  // disable_private_keys
                serde_json::json!(true),  // blank
                serde_json::json!(""),    // passphrase
                serde_json::json!(false), // avoid_reuse
                serde_json::json!(true),  // descriptors
                serde_json::json!(true),  // load_on_startup
            ],
        )
        .await
        .map(drop)
    }

    async fn unload_wallet(&self, name: &str) -> Result<(), CoreError> {
        self.rpc_call(Target::Node, "unloadwallet", vec![serde_json::json!(name)])
            .await
            .map(drop)
    }

    async fn rescan_blockchain(
        &self,
        start_height: Option<u64>,
        stop_height: Option<u64>,
    ) -> Result<RescanResult, CoreError> {
        self.call_as(
            Target::Wallet,
            "rescanblockchain",
            rescan_params(start_height, stop_height),
        )
        .await
    }

    async fn abort_rescan(&self) -> Result<bool, CoreError> {
        self.call_as(Target::Wallet, "abortrescan", Vec::new()).await
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(url = %self.node_url, "rpc session closed");
        }
    }
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

fn call_timeout(method: &str) -> Duration {
    match method {
        "importdescriptors" | "rescanblockchain" | "gettxoutsetinfo" | "loadwallet"
        | "createwallet" => LONG_CALL_TIMEOUT,
        _ => CALL_TIMEOUT,
    }
}

fn rescan_params(start_height: Option<u64>, stop_height: Option<u64>) -> Vec<serde_json::Value> {
    match (start_height, stop_height) {
        (None, None) => Vec::new(),
        (Some(start), None) => vec![serde_json::json!(start)],
        (start, Some(stop)) => vec![
            serde_json::json!(start.unwrap_or(0)),
            serde_json::json!(stop),
        ],
    }
}

fn decode_result<T: DeserializeOwned>(method: &str, raw: serde_json::Value) -> Result<T, CoreError> {
    serde_json::from_value(raw).map_err(|e| {
        RpcError::InvalidResponse(format!("invalid {method} result: {e}")).into()
    })
}

// ==============================================================================
// RPC Error Normalization
// ==============================================================================

/// Map "unknown transaction" answers from the index, mempool or wallet to
/// `TxNotFound`. Other failures pass through unchanged.
fn normalize_tx_error(txid: &Txid, err: CoreError) -> CoreError {
    match err {
        CoreError::Rpc(RpcError::ServerError { code: -5, ref message })
            if is_tx_not_found_message(message) =>
        {
            CoreError::TxNotFound(*txid)
        }
        other => other,
    }
}

fn is_tx_not_found_message(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("not found")
        || msg.contains("no such mempool or blockchain transaction")
        || msg.contains("non-wallet transaction")
}

/// `getblock` answers -5 for unknown hashes, `getblockhash` answers -8 for
/// heights beyond the tip.
fn normalize_block_error(reference: String, err: CoreError) -> CoreError {
    match err.rpc_code() {
        Some(-5) | Some(-8) => CoreError::BlockNotFound(reference),
        _ => err,
    }
}
