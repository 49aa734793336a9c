//! Shared test helpers for `satbridge-core` unit tests.
//!
//! Deterministic hashes, scripts and transactions so tests across modules
//! build their fixtures the same way.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::hashes::Hash;
use bitcoin::{
    absolute, transaction, Address, Amount, BlockHash, Network, OutPoint, ScriptBuf, Sequence,
    TxIn, TxOut, Txid, WPubkeyHash, Witness,
};

use crate::node::{NodeContext, NodeSessions, POOL_SESSIONS, WALLET_NAME};
use crate::pool::ConnectionPool;
use crate::rpc::mock::{MockNode, MockNodeBuilder};
use crate::rpc::{BlockInfo, NodeRpc, RawTransaction, WalletTransaction};

// ==============================================================================
// Hash Helpers
// ==============================================================================

/// Create a deterministic `Txid` from a single distinguishing byte.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

pub fn block_hash_from_byte(b: u8) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[31] = b;
    BlockHash::from_byte_array(bytes)
}

// ==============================================================================
// Scripts and Addresses
// ==============================================================================

/// P2WPKH script whose key hash is `tag` repeated.
pub fn p2wpkh_script(tag: u8) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([tag; 20]))
}

/// Regtest address of [`p2wpkh_script`].
pub fn regtest_address(tag: u8) -> String {
    Address::from_script(&p2wpkh_script(tag), Network::Regtest)
        .unwrap()
        .to_string()
}

// ==============================================================================
// Transaction Builders
// ==============================================================================

/// A coinbase paying `value` to `p2wpkh_script(0xcb)`. The script sig embeds
/// the value so different amounts give different txids.
pub fn coinbase_tx(value: Amount) -> bitcoin::Transaction {
    let mut script_sig = vec![0x08];
    script_sig.extend_from_slice(&value.to_sat().to_le_bytes());
    bitcoin::Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(script_sig),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value,
            script_pubkey: p2wpkh_script(0xcb),
        }],
    }
}

/// A transaction spending `prevouts` into `outputs` of `(sats, script)`.
pub fn spending_tx(prevouts: &[(Txid, u32)], outputs: Vec<(u64, ScriptBuf)>) -> bitcoin::Transaction {
    bitcoin::Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: prevouts
            .iter()
            .map(|(txid, vout)| TxIn {
                previous_output: OutPoint::new(*txid, *vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .into_iter()
            .map(|(sats, script_pubkey)| TxOut {
                value: Amount::from_sat(sats),
                script_pubkey,
            })
            .collect(),
    }
}

// ==============================================================================
// RPC Fixtures
// ==============================================================================

pub fn raw_unconfirmed(tx: bitcoin::Transaction) -> RawTransaction {
    RawTransaction {
        hex: bitcoin::consensus::encode::serialize_hex(&tx),
        tx,
        confirmations: 0,
        block_hash: None,
        block_height: None,
        block_time: None,
    }
}

pub fn raw_confirmed(
    tx: bitcoin::Transaction,
    block: &BlockInfo,
    confirmations: u64,
) -> RawTransaction {
    RawTransaction {
        confirmations,
        block_hash: Some(block.hash),
        block_height: Some(block.height),
        block_time: Some(block.time),
        ..raw_unconfirmed(tx)
    }
}

/// Wallet view of a transaction, mirroring the block fields of `raw`.
pub fn wallet_view(raw: &RawTransaction, time: u64) -> WalletTransaction {
    WalletTransaction {
        hex: raw.hex.clone(),
        confirmations: raw.confirmations as i64,
        block_hash: raw.block_hash,
        block_height: raw.block_height,
        block_time: raw.block_time,
        time,
    }
}

/// A block at `height` whose hash is derived from the height.
pub fn block_at(height: u32, time: u64, tx: Vec<Txid>) -> BlockInfo {
    BlockInfo {
        hash: block_hash_from_byte((height % 251) as u8),
        height,
        time,
        tx,
    }
}

// ==============================================================================
// Node Context
// ==============================================================================

/// Height of the tip block registered by [`seed_chain`], matching the mock's
/// default `getblockchaininfo`.
pub const TIP_HEIGHT: u32 = 200;

/// Register block 1 (with a coinbase, so the transaction index probe has
/// something to look up) and the tip block.
pub fn seed_chain(builder: MockNodeBuilder) -> MockNodeBuilder {
    let coinbase = coinbase_tx(Amount::from_sat(1));
    let first = block_at(1, 1_296_688_602, vec![coinbase.compute_txid()]);
    let tip = block_at(TIP_HEIGHT, 1_700_000_000, Vec::new());
    builder
        .with_tx(raw_confirmed(coinbase, &first, u64::from(TIP_HEIGHT)))
        .with_block(first)
        .with_block(tip)
}

/// Pool and janitor all backed by the same mock, so one call log sees
/// everything.
pub fn mock_sessions(node: &Arc<MockNode>) -> NodeSessions {
    let sessions: Vec<Arc<dyn NodeRpc>> = (0..POOL_SESSIONS)
        .map(|_| Arc::clone(node) as Arc<dyn NodeRpc>)
        .collect();
    NodeSessions {
        pool: ConnectionPool::new(sessions),
        janitor: Arc::clone(node) as Arc<dyn NodeRpc>,
    }
}

pub async fn mock_context(node: &Arc<MockNode>) -> Arc<NodeContext> {
    Arc::new(
        NodeContext::initialize(mock_sessions(node), WALLET_NAME)
            .await
            .unwrap(),
    )
}

// ==============================================================================
// Filesystem
// ==============================================================================

static NEXT_SCRATCH: AtomicU32 = AtomicU32::new(0);

/// A fresh, empty directory under the system temp dir.
pub fn scratch_dir(label: &str) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let seq = NEXT_SCRATCH.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("satbridge-{label}-{unique}-{seq}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
