//! Domain types for the explorer-shaped view of the node.
//!
//! Contains the annotated transaction model (`Transaction`, `Input`,
//! `Output`), sparse block references, UTXO lookup keys, account and
//! descriptor configuration, and the currency/network mapping.

use bitcoin::{Amount, BlockHash, Network, Txid};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ==============================================================================
// Currency
// ==============================================================================

/// Currency identifier understood by the wallet client. Every non-mainnet
/// chain is reported as the testnet currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "btc")]
    Mainnet,
    #[serde(rename = "btc_testnet")]
    Testnet,
}

impl Currency {
    pub fn from_chain(chain: &str) -> Result<Self, CoreError> {
        match chain {
            "main" => Ok(Self::Mainnet),
            "test" | "regtest" | "signet" => Ok(Self::Testnet),
            other => Err(CoreError::UnrecognizedChain(other.to_owned())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "btc",
            Self::Testnet => "btc_testnet",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map the `chain` field of `getblockchaininfo` to address-encoding params.
pub fn network_from_chain(chain: &str) -> Result<Network, CoreError> {
    match chain {
        "main" => Ok(Network::Bitcoin),
        "test" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        other => Err(CoreError::UnrecognizedChain(other.to_owned())),
    }
}

// ==============================================================================
// Blocks
// ==============================================================================

/// Minimal reference to the block containing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: BlockHash,
    pub height: u32,
    /// Block time, UNIX seconds.
    pub time: u64,
}

/// A block together with the hashes of the transactions it contains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockWithTxs {
    #[serde(flatten)]
    pub block: BlockRef,
    pub txs: Vec<Txid>,
}

// ==============================================================================
// Transactions
// ==============================================================================

/// Key of a spent output: `(transaction hash, output index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputIdentifier {
    pub hash: Txid,
    pub index: u32,
}

impl From<bitcoin::OutPoint> for OutputIdentifier {
    fn from(outpoint: bitcoin::OutPoint) -> Self {
        Self {
            hash: outpoint.txid,
            index: outpoint.vout,
        }
    }
}

/// Value and address of a resolved spent output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoData {
    pub value: Amount,
    pub address: Option<String>,
}

/// A fully annotated transaction as served to the wallet client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Txid,
    pub hash: Txid,
    pub lock_time: u32,
    /// Block time for confirmed transactions, resolution time otherwise.
    pub received_at: u64,
    pub confirmations: u64,
    pub fees: Amount,
    /// Sum of all output values.
    pub amount: Amount,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub block: Option<BlockRef>,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.iter().any(|input| matches!(input, Input::Coinbase(_)))
    }

    /// Addresses of the outputs spent by this transaction's inputs.
    pub fn input_addresses(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().filter_map(|input| match input {
            Input::Spending(spending) => spending.address.as_deref(),
            Input::Coinbase(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Input {
    Coinbase(CoinbaseInput),
    Spending(SpendingInput),
}

impl Input {
    pub fn input_index(&self) -> u32 {
        match self {
            Self::Coinbase(c) => c.input_index,
            Self::Spending(s) => s.input_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseInput {
    /// Hex-encoded coinbase script.
    pub coinbase_script: String,
    pub sequence: u32,
    pub input_index: u32,
    pub witness: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingInput {
    pub output_hash: Txid,
    pub output_index: u32,
    /// Value of the spent output; zero when it could not be resolved.
    pub value: Amount,
    pub address: Option<String>,
    /// Hex-encoded signature script.
    pub script_sig: String,
    /// Hex-encoded witness stack items.
    pub witness: Vec<String>,
    pub sequence: u32,
    pub input_index: u32,
}

impl SpendingInput {
    pub fn outpoint(&self) -> OutputIdentifier {
        OutputIdentifier {
            hash: self.output_hash,
            index: self.output_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub output_index: u32,
    pub value: Amount,
    pub script_hex: String,
    pub address: Option<String>,
}

// ==============================================================================
// Accounts and Descriptors
// ==============================================================================

/// Number of addresses derived and imported per descriptor by default.
pub const DEFAULT_ACCOUNT_DEPTH: u32 = 1000;

/// 2013-09-10T00:00:00Z, the earliest date a BIP39 seed for a hardware
/// wallet could have been generated. Used as the default descriptor age.
pub const DEFAULT_BIRTHDAY: u32 = 1_378_771_200;

/// Account configuration: an external/internal descriptor pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub external: String,
    pub internal: String,
    #[serde(default)]
    pub depth: Option<u32>,
    /// Earliest relevant UNIX time for the account.
    #[serde(default)]
    pub birthday: Option<u32>,
}

/// A canonical output descriptor scheduled for import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub value: String,
    pub depth: u32,
    pub age: u32,
}

/// Drop a trailing `#checksum` fragment from a descriptor string.
pub fn strip_checksum(descriptor: &str) -> &str {
    match descriptor.split_once('#') {
        Some((body, _)) => body,
        None => descriptor,
    }
}
