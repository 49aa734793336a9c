//! Node context: capability detection, version gate and wallet bootstrap.
//!
//! [`NodeContext`] is built once at startup and handed to every component.
//! It owns the shared [`ConnectionPool`], a reserved janitor session for
//! shutdown work, the detected [`NodeCapabilities`] and the process-wide
//! [`StatusCell`].

use std::sync::Arc;

use bitcoin::Network;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::rpc::{HttpRpcClient, NodeRpc, RpcEndpoint};
use crate::status::StatusCell;
use crate::types::{network_from_chain, Currency};

/// Name of the watch-only wallet the bridge drives.
pub const WALLET_NAME: &str = "satbridge";

/// Oldest supported node, as reported by `getnetworkinfo.version`.
pub const MIN_NODE_VERSION: u64 = 220_000;

/// Sessions in the shared pool: request path plus background work.
pub const POOL_SESSIONS: usize = 2;

const ALREADY_LOADED_MESSAGES: [&str; 4] = [
    "Duplicate -wallet filename specified.",
    "Wallet file verification failed. Refusing to load database. Data file",
    "Wallet file verification failed. SQLiteDatabase: Unable to obtain an exclusive lock on the database",
    "is already loaded",
];

const RPC_METHOD_NOT_FOUND: i64 = -32601;
const RPC_WALLET_ERROR: i64 = -4;
const RPC_WALLET_NOT_FOUND: i64 = -18;
const RPC_WALLET_ALREADY_LOADED: i64 = -35;

/// What the node supports. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeCapabilities {
    pub chain: String,
    pub pruned: bool,
    pub tx_index: bool,
    pub block_filter: bool,
    pub version: u64,
}

/// Every session opened against the node, grouped by role.
pub struct NodeSessions {
    pub pool: ConnectionPool,
    /// Reserved for shutdown so cleanup never waits on the pool.
    pub janitor: Arc<dyn NodeRpc>,
}

impl NodeSessions {
    pub fn connect(endpoint: &RpcEndpoint) -> Result<Self, CoreError> {
        let mut sessions: Vec<Arc<dyn NodeRpc>> = Vec::with_capacity(POOL_SESSIONS);
        for _ in 0..POOL_SESSIONS {
            sessions.push(Arc::new(HttpRpcClient::connect(endpoint)?));
        }
        Ok(Self {
            pool: ConnectionPool::new(sessions),
            janitor: Arc::new(HttpRpcClient::connect(endpoint)?),
        })
    }
}

pub struct NodeContext {
    pool: ConnectionPool,
    janitor: Arc<dyn NodeRpc>,
    capabilities: NodeCapabilities,
    network: Network,
    currency: Currency,
    wallet_name: String,
    status: StatusCell,
}

impl NodeContext {
    /// Probe the node and make sure the watch-only wallet is loaded.
    ///
    /// Every failure here is fatal: the bridge must not serve requests
    /// against a node it could not characterize.
    pub async fn initialize(sessions: NodeSessions, wallet_name: &str) -> Result<Self, CoreError> {
        let NodeSessions { pool, janitor } = sessions;
        let conn = pool.acquire().await?;

        let chain = conn.get_blockchain_info().await?;
        let currency = Currency::from_chain(&chain.chain)?;
        let network = network_from_chain(&chain.chain)?;

        let version = conn.get_network_info().await?.version;
        if version < MIN_NODE_VERSION {
            return Err(CoreError::UnsupportedNodeVersion {
                found: version,
                minimum: MIN_NODE_VERSION,
            });
        }

        let block_filter = detect_block_filter(&*conn)
            .await
            .map_err(|source| CoreError::CapabilityProbe {
                probe: "block_filter",
                source: Box::new(source),
            })?;
        let tx_index = detect_tx_index(&*conn)
            .await
            .map_err(|source| CoreError::CapabilityProbe {
                probe: "txindex",
                source: Box::new(source),
            })?;

        let created = ensure_wallet(&*conn, wallet_name).await?;
        info!(
            wallet = wallet_name,
            created,
            chain = %chain.chain,
            %currency,
            version,
            tx_index,
            block_filter,
            pruned = chain.pruned,
            "node initialized"
        );
        drop(conn);

        Ok(Self {
            pool,
            janitor,
            capabilities: NodeCapabilities {
                chain: chain.chain,
                pruned: chain.pruned,
                tx_index,
                block_filter,
                version,
            },
            network,
            currency,
            wallet_name: wallet_name.to_owned(),
            status: StatusCell::default(),
        })
    }

    pub async fn acquire(&self) -> Result<PooledConnection, CoreError> {
        self.pool.acquire().await
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn janitor(&self) -> &dyn NodeRpc {
        self.janitor.as_ref()
    }

    pub fn capabilities(&self) -> &NodeCapabilities {
        &self.capabilities
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn wallet_name(&self) -> &str {
        &self.wallet_name
    }

    pub fn status(&self) -> &StatusCell {
        &self.status
    }
}

/// Whether the node keeps a full transaction index.
///
/// Looks up the coinbase of block 1 through the index. The genesis coinbase
/// is never indexed, hence height 1. A chain without block 1 reports `false`.
pub async fn detect_tx_index(rpc: &dyn NodeRpc) -> Result<bool, CoreError> {
    let hash = match rpc.get_block_hash(1).await {
        Ok(hash) => hash,
        Err(CoreError::BlockNotFound(_)) => {
            warn!("chain has no block at height 1; assuming no transaction index");
            return Ok(false);
        }
        Err(err) => return Err(err),
    };
    let block = rpc.get_block(&hash).await?;
    let coinbase = block
        .tx
        .first()
        .ok_or_else(|| CoreError::InvalidTxData("block at height 1 has no transactions".into()))?;

    match rpc.get_raw_transaction(coinbase).await {
        Ok(_) => Ok(true),
        Err(err) if err.is_connectivity() => Err(err),
        Err(_) => Ok(false),
    }
}

/// Whether the node serves BIP157 compact block filters.
pub async fn detect_block_filter(rpc: &dyn NodeRpc) -> Result<bool, CoreError> {
    let best = rpc.get_best_block_hash().await?;
    match rpc.get_block_filter(&best).await {
        Ok(_) => Ok(true),
        Err(err) if err.is_connectivity() => Err(err),
        Err(_) => Ok(false),
    }
}

/// Load the watch-only wallet, creating it when the node has none.
///
/// Returns `true` when the wallet was created.
pub async fn ensure_wallet(rpc: &dyn NodeRpc, name: &str) -> Result<bool, CoreError> {
    let err = match rpc.load_wallet(name).await {
        Ok(()) => return Ok(false),
        Err(err) => err,
    };

    match wallet_load_outcome(&err) {
        LoadOutcome::AlreadyLoaded => Ok(false),
        LoadOutcome::Disabled => Err(CoreError::WalletDisabled),
        LoadOutcome::NotFound => {
            rpc.create_watch_only_wallet(name).await?;
            Ok(true)
        }
        LoadOutcome::Failed if err.is_connectivity() => Err(err),
        LoadOutcome::Failed => Err(CoreError::Wallet(format!("failed to load wallet {name}: {err}"))),
    }
}

/// Unload the wallet, typically through the janitor session.
pub async fn unload_wallet(rpc: &dyn NodeRpc, name: &str) -> Result<(), CoreError> {
    rpc.unload_wallet(name).await?;
    info!(wallet = name, "wallet unloaded");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum LoadOutcome {
    AlreadyLoaded,
    NotFound,
    Disabled,
    Failed,
}

fn wallet_load_outcome(err: &CoreError) -> LoadOutcome {
    let message = match err {
        CoreError::Rpc(crate::error::RpcError::ServerError { message, .. }) => message.as_str(),
        _ => return LoadOutcome::Failed,
    };
    match err.rpc_code() {
        Some(RPC_METHOD_NOT_FOUND) => LoadOutcome::Disabled,
        Some(RPC_WALLET_NOT_FOUND) => LoadOutcome::NotFound,
        Some(RPC_WALLET_ERROR | RPC_WALLET_ALREADY_LOADED)
            if ALREADY_LOADED_MESSAGES.iter().any(|m| message.contains(m)) =>
        {
            LoadOutcome::AlreadyLoaded
        }
        _ => LoadOutcome::Failed,
    }
}
