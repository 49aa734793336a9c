use std::path::PathBuf;

use clap::Parser;

/// satbridge: serve a wallet client from your own Bitcoin Core node.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to satbridge.json. Searched for in the current, config and
    /// home directories when omitted.
    #[arg(long, env = "SATBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind the web server to.
    #[arg(long, default_value = "127.0.0.1", env = "SATBRIDGE_BIND")]
    pub bind: String,

    /// Port to listen on.
    #[arg(long, default_value = "20000", env = "SATBRIDGE_PORT")]
    pub port: u16,

    /// Unload the bridge wallet from the node and exit.
    #[arg(long)]
    pub unload_wallet: bool,

    /// Compare the node's UTXO set total against the issuance schedule
    /// before importing accounts. Slow on mainnet.
    #[arg(long, env = "SATBRIDGE_CIRCULATION_CHECK")]
    pub circulation_check: bool,

    /// Import descriptors and rescan even if the wallet already watches them.
    #[arg(long, env = "SATBRIDGE_FORCE_IMPORT")]
    pub force_import: bool,

    /// Maximum RPC requests per second sent to the node (unlimited if unset).
    #[arg(long, env = "SATBRIDGE_RPC_REQUESTS_PER_SECOND")]
    pub rpc_requests_per_second: Option<u32>,

    /// Maximum number of calls per JSON-RPC batch request.
    #[arg(long, default_value = "100", env = "SATBRIDGE_RPC_BATCH_CHUNK_SIZE")]
    pub rpc_batch_chunk_size: usize,

    /// Seconds between node sync and scan progress polls.
    #[arg(long, default_value = "7", env = "SATBRIDGE_POLL_INTERVAL_SECS")]
    pub poll_interval_secs: u64,
}
