use bitcoin::{BlockHash, Txid};

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("node returned error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error("batch response is missing item with id {id}")]
    MissingBatchItem { id: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("RPC communication failure: {0}")]
    Rpc(#[from] RpcError),

    #[error("transaction not found: {0}")]
    TxNotFound(Txid),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("invalid block reference `{0}`")]
    InvalidBlockRef(String),

    #[error("invalid transaction data: {0}")]
    InvalidTxData(String),

    #[error("invalid descriptor `{descriptor}`: {source}")]
    InvalidDescriptor {
        descriptor: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("failed to derive address ({descriptor} - #{index}): {source}")]
    DeriveAddress {
        descriptor: String,
        index: u32,
        #[source]
        source: Box<CoreError>,
    },

    #[error("failed to get address info ({address}): {source}")]
    AddressInfo {
        address: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("descriptor import failed for {failed} of {total} descriptors")]
    ImportFailed { failed: usize, total: usize },

    #[error("unsupported node version {found} (minimum {minimum})")]
    UnsupportedNodeVersion { found: u64, minimum: u64 },

    #[error("wallet features are disabled on the node")]
    WalletDisabled,

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("unrecognized chain `{0}`")]
    UnrecognizedChain(String),

    #[error("capability probe failed ({probe}): {source}")]
    CapabilityProbe {
        probe: &'static str,
        #[source]
        source: Box<CoreError>,
    },

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(std::time::Duration),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// `true` when the failure means the node could not be reached at all,
    /// as opposed to the node answering with an error.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Rpc(RpcError::Transport(_)) | Self::PoolClosed => true,
            Self::CapabilityProbe { source, .. }
            | Self::AddressInfo { source, .. }
            | Self::DeriveAddress { source, .. }
            | Self::InvalidDescriptor { source, .. } => source.is_connectivity(),
            _ => false,
        }
    }

    /// `true` when the failure means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TxNotFound(_) | Self::BlockNotFound(_))
    }

    pub(crate) fn block_not_found(hash: &BlockHash) -> Self {
        Self::BlockNotFound(hash.to_string())
    }

    /// JSON-RPC error code, if the node answered with a structured error.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc(RpcError::ServerError { code, .. }) => Some(*code),
            _ => None,
        }
    }
}
