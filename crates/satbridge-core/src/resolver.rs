//! Transaction and UTXO resolution.
//!
//! Turns a transaction hash into an annotated [`Transaction`]: block
//! reference, confirmations against the current tip, spent-output values
//! and addresses for every input, fee and total amount.
//!
//! How transactions are fetched is decided once, from the node's
//! capabilities, as a [`LookupStrategy`]. Funding transactions of all
//! inputs are fetched in one batch per resolution call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::hex::DisplayHex;
use bitcoin::script::Instruction;
use bitcoin::{Address, Amount, Network, PublicKey, Script, Txid};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::node::{NodeCapabilities, NodeContext};
use crate::rpc::{NodeRpc, RawTransaction, WalletTransaction};
use crate::types::{
    BlockRef, CoinbaseInput, Input, Output, OutputIdentifier, SpendingInput, Transaction, UtxoData,
};

// ==============================================================================
// Strategy and Options
// ==============================================================================

/// Where transactions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// `getrawtransaction` against the node's transaction index.
    Indexed,
    /// `gettransaction` against the watch-only wallet. Only transactions
    /// touching a watched address are visible.
    WalletScoped,
}

impl LookupStrategy {
    pub fn for_capabilities(capabilities: &NodeCapabilities) -> Self {
        if capabilities.tx_index {
            Self::Indexed
        } else {
            Self::WalletScoped
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Report one confirmation less than the chain does, floored at zero.
    /// Some legacy explorer consumers count the including block as zero.
    pub legacy_confirmations: bool,
}

// ==============================================================================
// Resolution Cache
// ==============================================================================

/// Memo of fetched and resolved transactions for one outer call.
#[derive(Default)]
struct ResolutionCache {
    raw: RwLock<HashMap<Txid, RawTransaction>>,
    resolved: RwLock<HashMap<Txid, Transaction>>,
}

/// A resolver view that memoizes lookups until it is dropped.
///
/// Create one per outer call with [`Resolver::cached`]; the cache is
/// discarded on every exit path when the scope goes away.
pub struct CachedResolution<'a> {
    resolver: &'a Resolver,
    cache: ResolutionCache,
}

impl CachedResolution<'_> {
    pub async fn resolve(&self, txid: &Txid) -> Result<Transaction, CoreError> {
        self.resolver.resolve_one(txid, Some(&self.cache)).await
    }

    pub async fn resolve_batch(
        &self,
        txids: &[Txid],
    ) -> Result<HashMap<Txid, Result<Transaction, CoreError>>, CoreError> {
        self.resolver.resolve_many(txids, Some(&self.cache)).await
    }

    /// Drop any memoized state for `txid`.
    pub async fn evict(&self, txid: &Txid) {
        self.cache.raw.write().await.remove(txid);
        self.cache.resolved.write().await.remove(txid);
    }
}

impl Drop for CachedResolution<'_> {
    fn drop(&mut self) {
        let raw = self.cache.raw.get_mut();
        let resolved = self.cache.resolved.get_mut();
        debug!(
            raw = raw.len(),
            resolved = resolved.len(),
            "flushing resolution cache"
        );
        raw.clear();
        resolved.clear();
    }
}

// ==============================================================================
// Resolver
// ==============================================================================

pub struct Resolver {
    ctx: Arc<NodeContext>,
    strategy: LookupStrategy,
    options: ResolverOptions,
}

impl Resolver {
    pub fn new(ctx: Arc<NodeContext>, options: ResolverOptions) -> Self {
        let strategy = LookupStrategy::for_capabilities(ctx.capabilities());
        Self::with_strategy(ctx, strategy, options)
    }

    pub fn with_strategy(
        ctx: Arc<NodeContext>,
        strategy: LookupStrategy,
        options: ResolverOptions,
    ) -> Self {
        Self {
            ctx,
            strategy,
            options,
        }
    }

    pub fn strategy(&self) -> LookupStrategy {
        self.strategy
    }

    /// Start a memoizing scope.
    pub fn cached(&self) -> CachedResolution<'_> {
        CachedResolution {
            resolver: self,
            cache: ResolutionCache::default(),
        }
    }

    /// Resolve one transaction without memoization.
    ///
    /// Fails with [`CoreError::TxNotFound`] when the transaction itself is
    /// unknown. Inputs whose funding transaction cannot be fetched are
    /// reported with zero value and no address.
    pub async fn resolve(&self, txid: &Txid) -> Result<Transaction, CoreError> {
        self.resolve_one(txid, None).await
    }

    /// Resolve many transactions, fetching all of them, then all of their
    /// funding transactions, in one batch each.
    ///
    /// Each hash gets its own outcome. The outer error covers failures of
    /// the whole exchange, such as losing the node.
    pub async fn resolve_batch(
        &self,
        txids: &[Txid],
    ) -> Result<HashMap<Txid, Result<Transaction, CoreError>>, CoreError> {
        self.resolve_many(txids, None).await
    }

    /// Serialized transaction, hex encoded.
    pub async fn transaction_hex(&self, txid: &Txid) -> Result<String, CoreError> {
        let conn = self.ctx.acquire().await?;
        let mut fetched = self.fetch_raw(&*conn, &[*txid], None).await?;
        match fetched.remove(txid) {
            Some(result) => result.map(|raw| raw.hex),
            None => Err(CoreError::TxNotFound(*txid)),
        }
    }

    async fn resolve_one(
        &self,
        txid: &Txid,
        cache: Option<&ResolutionCache>,
    ) -> Result<Transaction, CoreError> {
        let mut resolved = self.resolve_many(std::slice::from_ref(txid), cache).await?;
        resolved
            .remove(txid)
            .unwrap_or(Err(CoreError::TxNotFound(*txid)))
    }

    async fn resolve_many(
        &self,
        txids: &[Txid],
        cache: Option<&ResolutionCache>,
    ) -> Result<HashMap<Txid, Result<Transaction, CoreError>>, CoreError> {
        let mut results = HashMap::with_capacity(txids.len());
        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        for txid in txids {
            if !seen.insert(*txid) {
                continue;
            }
            let hit = match cache {
                Some(cache) => cache.resolved.read().await.get(txid).cloned(),
                None => None,
            };
            match hit {
                Some(tx) => {
                    results.insert(*txid, Ok(tx));
                }
                None => pending.push(*txid),
            }
        }
        if pending.is_empty() {
            return Ok(results);
        }

        let conn = self.ctx.acquire().await?;
        let tip = conn.get_blockchain_info().await?.blocks;
        let mut fetched = self.fetch_raw(&*conn, &pending, cache).await?;

        let funding_ids = funding_txids(fetched.values().filter_map(|r| r.as_ref().ok()));
        let funding: HashMap<Txid, RawTransaction> = self
            .fetch_raw(&*conn, &funding_ids, cache)
            .await?
            .into_iter()
            .filter_map(|(txid, result)| match result {
                Ok(raw) => Some((txid, raw)),
                Err(err) => {
                    debug!(txid = %txid, error = %err, "funding transaction unavailable");
                    None
                }
            })
            .collect();

        for txid in pending {
            let outcome = match fetched.remove(&txid) {
                Some(Ok(raw)) => match self.block_ref(&*conn, &raw).await {
                    Ok(block) => {
                        let tx = self.assemble(&raw, block, &funding, tip);
                        if let Some(cache) = cache {
                            cache.resolved.write().await.insert(txid, tx.clone());
                        }
                        Ok(tx)
                    }
                    Err(err) if err.is_connectivity() => return Err(err),
                    Err(err) => Err(err),
                },
                Some(Err(err)) => Err(err),
                None => Err(CoreError::TxNotFound(txid)),
            };
            results.insert(txid, outcome);
        }
        Ok(results)
    }

    /// Fetch serialized transactions through the configured strategy,
    /// serving and filling `cache` when present.
    async fn fetch_raw(
        &self,
        rpc: &dyn NodeRpc,
        txids: &[Txid],
        cache: Option<&ResolutionCache>,
    ) -> Result<HashMap<Txid, Result<RawTransaction, CoreError>>, CoreError> {
        let mut results = HashMap::with_capacity(txids.len());
        let mut misses = Vec::new();
        for txid in txids {
            let hit = match cache {
                Some(cache) => cache.raw.read().await.get(txid).cloned(),
                None => None,
            };
            match hit {
                Some(raw) => {
                    results.insert(*txid, Ok(raw));
                }
                None => misses.push(*txid),
            }
        }
        if misses.is_empty() {
            return Ok(results);
        }

        let fetched: Vec<Result<RawTransaction, CoreError>> = match self.strategy {
            LookupStrategy::Indexed => rpc.get_raw_transactions(&misses).await?,
            LookupStrategy::WalletScoped => rpc
                .get_wallet_transactions(&misses)
                .await?
                .into_iter()
                .map(|result| result.and_then(raw_from_wallet_view))
                .collect(),
        };

        for (txid, result) in misses.into_iter().zip(fetched) {
            if let (Some(cache), Ok(raw)) = (cache, &result) {
                cache.raw.write().await.insert(txid, raw.clone());
            }
            results.insert(txid, result);
        }
        Ok(results)
    }

    /// Block reference of a confirmed transaction. Missing height or time
    /// is looked up from the block itself.
    async fn block_ref(
        &self,
        rpc: &dyn NodeRpc,
        raw: &RawTransaction,
    ) -> Result<Option<BlockRef>, CoreError> {
        let Some(hash) = raw.block_hash.filter(|_| raw.confirmations > 0) else {
            return Ok(None);
        };
        let (height, time) = match (raw.block_height, raw.block_time) {
            (Some(height), Some(time)) => (height, time),
            _ => {
                let block = rpc.get_block(&hash).await?;
                (block.height, block.time)
            }
        };
        Ok(Some(BlockRef { hash, height, time }))
    }

    fn assemble(
        &self,
        raw: &RawTransaction,
        block: Option<BlockRef>,
        funding: &HashMap<Txid, RawTransaction>,
        tip: u64,
    ) -> Transaction {
        let network = self.ctx.network();
        let txid = raw.tx.compute_txid();

        let inputs: Vec<Input> = raw
            .tx
            .input
            .iter()
            .enumerate()
            .map(|(index, txin)| {
                let input_index = index as u32;
                let witness = txin
                    .witness
                    .iter()
                    .map(|item| item.to_lower_hex_string())
                    .collect();
                if txin.previous_output.is_null() {
                    return Input::Coinbase(CoinbaseInput {
                        coinbase_script: txin.script_sig.to_hex_string(),
                        sequence: txin.sequence.to_consensus_u32(),
                        input_index,
                        witness,
                    });
                }
                let spent = OutputIdentifier::from(txin.previous_output);
                let utxo = spent_output(funding, &spent, network);
                Input::Spending(SpendingInput {
                    output_hash: spent.hash,
                    output_index: spent.index,
                    value: utxo.value,
                    address: utxo.address,
                    script_sig: txin.script_sig.to_hex_string(),
                    witness,
                    sequence: txin.sequence.to_consensus_u32(),
                    input_index,
                })
            })
            .collect();

        let outputs: Vec<Output> = raw
            .tx
            .output
            .iter()
            .enumerate()
            .map(|(index, txout)| Output {
                output_index: index as u32,
                value: txout.value,
                script_hex: txout.script_pubkey.to_hex_string(),
                address: script_address(&txout.script_pubkey, network),
            })
            .collect();

        let amount: Amount = outputs.iter().map(|o| o.value).sum();
        let is_coinbase = inputs.iter().any(|i| matches!(i, Input::Coinbase(_)));
        let fees = if is_coinbase {
            Amount::ZERO
        } else {
            let spent: Amount = inputs
                .iter()
                .filter_map(|i| match i {
                    Input::Spending(s) => Some(s.value),
                    Input::Coinbase(_) => None,
                })
                .sum();
            // Unresolvable inputs undercount; never report a negative fee.
            spent.checked_sub(amount).unwrap_or(Amount::ZERO)
        };

        let (confirmations, received_at) = match &block {
            Some(block) => (self.confirmations(tip, block.height), block.time),
            None => (0, unix_now()),
        };

        Transaction {
            id: txid,
            hash: txid,
            lock_time: raw.tx.lock_time.to_consensus_u32(),
            received_at,
            confirmations,
            fees,
            amount,
            inputs,
            outputs,
            block,
        }
    }

    fn confirmations(&self, tip: u64, height: u32) -> u64 {
        let confirmations = tip.saturating_sub(u64::from(height)) + 1;
        if self.options.legacy_confirmations {
            confirmations - 1
        } else {
            confirmations
        }
    }
}

// ==============================================================================
// Helpers
// ==============================================================================

/// Render the address paid by `script`.
///
/// Standard templates use their own encoding. Pay-to-pubkey renders as the
/// P2PKH address of the key. Bare multisig renders as the P2PKH address of
/// its first key.
pub fn script_address(script: &Script, network: Network) -> Option<String> {
    if let Ok(address) = Address::from_script(script, network) {
        return Some(address.to_string());
    }
    if let Some(key) = script.p2pk_public_key() {
        return Some(Address::p2pkh(key.pubkey_hash(), network).to_string());
    }
    if script.is_multisig() {
        let keys: Vec<PublicKey> = script
            .instructions()
            .filter_map(|ins| match ins {
                Ok(Instruction::PushBytes(bytes)) => PublicKey::from_slice(bytes.as_bytes()).ok(),
                _ => None,
            })
            .collect();
        if keys.len() > 1 {
            warn!(
                script = %script.to_hex_string(),
                keys = keys.len(),
                "multisig output has several addresses; reporting the first"
            );
        }
        return keys
            .first()
            .map(|key| Address::p2pkh(key.pubkey_hash(), network).to_string());
    }
    None
}

fn spent_output(
    funding: &HashMap<Txid, RawTransaction>,
    spent: &OutputIdentifier,
    network: Network,
) -> UtxoData {
    let txout = funding
        .get(&spent.hash)
        .and_then(|raw| raw.tx.output.get(spent.index as usize));
    match txout {
        Some(txout) => UtxoData {
            value: txout.value,
            address: script_address(&txout.script_pubkey, network),
        },
        None => {
            debug!(
                txid = %spent.hash,
                vout = spent.index,
                "spent output unresolved; reporting zero value"
            );
            UtxoData::default()
        }
    }
}

fn funding_txids<'a>(raws: impl Iterator<Item = &'a RawTransaction>) -> Vec<Txid> {
    let mut seen = HashSet::new();
    raws.flat_map(|raw| raw.tx.input.iter())
        .filter(|txin| !txin.previous_output.is_null())
        .map(|txin| txin.previous_output.txid)
        .filter(|txid| seen.insert(*txid))
        .collect()
}

/// Wallet view in the shape of an index lookup. Conflicted transactions
/// (negative confirmations) count as unconfirmed.
fn raw_from_wallet_view(view: WalletTransaction) -> Result<RawTransaction, CoreError> {
    let tx = view.decode()?;
    let confirmations = u64::try_from(view.confirmations).unwrap_or(0);
    Ok(RawTransaction {
        tx,
        hex: view.hex,
        confirmations,
        block_hash: view.block_hash,
        block_height: view.block_height,
        block_time: view.block_time,
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_CHECKSIG, OP_PUSHNUM_1, OP_PUSHNUM_2};
    use bitcoin::script::Builder;

    use super::*;
    use crate::rpc::mock::{MockNode, MockNodeBuilder};
    use crate::test_util::*;

    const TIP: u32 = TIP_HEIGHT;

    const KEY_G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const KEY_2G: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

    /// funding (block 150) pays 50_000 and 20_000 sats to tags 1 and 2;
    /// spend (block 190) spends both into 60_000 sats.
    fn spend_fixture() -> (MockNodeBuilder, bitcoin::Transaction, bitcoin::Transaction) {
        let funding = spending_tx(
            &[(txid_from_byte(9), 0)],
            vec![(50_000, p2wpkh_script(1)), (20_000, p2wpkh_script(2))],
        );
        let funding_block = block_at(150, 1_600_000_000, vec![funding.compute_txid()]);
        let spend = spending_tx(
            &[(funding.compute_txid(), 0), (funding.compute_txid(), 1)],
            vec![(60_000, p2wpkh_script(3))],
        );
        let spend_block = block_at(190, 1_650_000_000, vec![spend.compute_txid()]);

        let builder = MockNode::builder()
            .with_tx(raw_confirmed(funding.clone(), &funding_block, 51))
            .with_tx(raw_confirmed(spend.clone(), &spend_block, 11))
            .with_block(funding_block)
            .with_block(spend_block);
        (seed_chain(builder), funding, spend)
    }

    async fn resolver_for(node: &Arc<MockNode>, options: ResolverOptions) -> Resolver {
        let ctx = mock_context(node).await;
        Resolver::new(ctx, options)
    }

    #[tokio::test]
    async fn spend_reports_input_values_and_fee() {
        let (builder, _funding, spend) = spend_fixture();
        let node = Arc::new(builder.build());
        let resolver = resolver_for(&node, ResolverOptions::default()).await;
        assert_eq!(resolver.strategy(), LookupStrategy::Indexed);

        let tx = resolver.resolve(&spend.compute_txid()).await.unwrap();
        assert_eq!(tx.fees, Amount::from_sat(10_000));
        assert_eq!(tx.amount, Amount::from_sat(60_000));
        let addresses: Vec<&str> = tx.input_addresses().collect();
        assert_eq!(addresses, vec![regtest_address(1), regtest_address(2)]);
        assert_eq!(tx.outputs[0].address.as_deref(), Some(regtest_address(3).as_str()));
    }

    #[tokio::test]
    async fn confirmations_count_from_tip() {
        let (builder, _funding, spend) = spend_fixture();
        let node = Arc::new(builder.build());
        let resolver = resolver_for(&node, ResolverOptions::default()).await;

        let tx = resolver.resolve(&spend.compute_txid()).await.unwrap();
        let block = tx.block.clone().unwrap();
        assert_eq!(block.height, 190);
        assert_eq!(tx.confirmations, u64::from(TIP - 190 + 1));
        assert_eq!(tx.received_at, block.time);
    }

    #[tokio::test]
    async fn legacy_confirmations_subtract_one() {
        let (builder, _funding, spend) = spend_fixture();
        let node = Arc::new(builder.build());
        let resolver = resolver_for(
            &node,
            ResolverOptions {
                legacy_confirmations: true,
            },
        )
        .await;

        let tx = resolver.resolve(&spend.compute_txid()).await.unwrap();
        assert_eq!(tx.confirmations, u64::from(TIP - 190));
    }

    #[tokio::test]
    async fn unconfirmed_uses_wall_clock() {
        let mempool = spending_tx(&[(txid_from_byte(7), 0)], vec![(1_000, p2wpkh_script(4))]);
        let node = Arc::new(
            seed_chain(MockNode::builder())
                .with_tx(raw_unconfirmed(mempool.clone()))
                .build(),
        );
        let resolver = resolver_for(&node, ResolverOptions::default()).await;

        let before = unix_now();
        let tx = resolver.resolve(&mempool.compute_txid()).await.unwrap();
        assert_eq!(tx.confirmations, 0);
        assert!(tx.block.is_none());
        assert!(tx.received_at >= before);
    }

    #[tokio::test]
    async fn coinbase_has_no_fee() {
        let coinbase = coinbase_tx(Amount::from_sat(5_000_000_000));
        let block = block_at(120, 1_500_000_000, vec![coinbase.compute_txid()]);
        let node = Arc::new(
            seed_chain(MockNode::builder())
                .with_tx(raw_confirmed(coinbase.clone(), &block, 81))
                .with_block(block)
                .build(),
        );
        let resolver = resolver_for(&node, ResolverOptions::default()).await;

        let tx = resolver.resolve(&coinbase.compute_txid()).await.unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.fees, Amount::ZERO);
        assert!(matches!(&tx.inputs[0], Input::Coinbase(c) if !c.coinbase_script.is_empty()));
    }

    #[tokio::test]
    async fn unresolvable_input_degrades_to_zero() {
        let orphan = spending_tx(&[(txid_from_byte(42), 3)], vec![(5_000, p2wpkh_script(5))]);
        let block = block_at(180, 1_690_000_000, vec![orphan.compute_txid()]);
        let node = Arc::new(
            seed_chain(MockNode::builder())
                .with_tx(raw_confirmed(orphan.clone(), &block, 21))
                .with_block(block)
                .build(),
        );
        let resolver = resolver_for(&node, ResolverOptions::default()).await;

        let tx = resolver.resolve(&orphan.compute_txid()).await.unwrap();
        match &tx.inputs[0] {
            Input::Spending(input) => {
                assert_eq!(input.value, Amount::ZERO);
                assert!(input.address.is_none());
                assert_eq!(input.output_index, 3);
            }
            Input::Coinbase(_) => panic!("expected spending input"),
        }
        assert_eq!(tx.fees, Amount::ZERO);
    }

    #[tokio::test]
    async fn unknown_transaction_is_not_found() {
        let node = Arc::new(seed_chain(MockNode::builder()).build());
        let resolver = resolver_for(&node, ResolverOptions::default()).await;
        let txid = txid_from_byte(77);
        assert!(matches!(
            resolver.resolve(&txid).await,
            Err(CoreError::TxNotFound(found)) if found == txid
        ));
    }

    #[tokio::test]
    async fn batch_uses_one_round_trip_per_level() {
        let (builder, funding, spend) = spend_fixture();
        let node = Arc::new(builder.build());
        let resolver = resolver_for(&node, ResolverOptions::default()).await;
        let before = node.call_count("getrawtransaction[]");

        let missing = txid_from_byte(66);
        let results = resolver
            .resolve_batch(&[spend.compute_txid(), funding.compute_txid(), missing])
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[&spend.compute_txid()].is_ok());
        assert!(results[&funding.compute_txid()].is_ok());
        assert!(matches!(results[&missing], Err(CoreError::TxNotFound(_))));
        assert_eq!(node.call_count("getrawtransaction[]") - before, 2);
    }

    #[tokio::test]
    async fn cached_scope_memoizes_until_dropped() {
        let (builder, _funding, spend) = spend_fixture();
        let node = Arc::new(builder.build());
        let resolver = resolver_for(&node, ResolverOptions::default()).await;
        let txid = spend.compute_txid();

        let scope = resolver.cached();
        scope.resolve(&txid).await.unwrap();
        let after_first = node.call_count("getrawtransaction[]");
        scope.resolve(&txid).await.unwrap();
        assert_eq!(node.call_count("getrawtransaction[]"), after_first);

        scope.evict(&txid).await;
        scope.resolve(&txid).await.unwrap();
        assert_eq!(node.call_count("getrawtransaction[]"), after_first + 1);
        drop(scope);

        let fresh = resolver.cached();
        fresh.resolve(&txid).await.unwrap();
        assert_eq!(node.call_count("getrawtransaction[]"), after_first + 3);
    }

    #[tokio::test]
    async fn wallet_scoped_lookup_splices_block_metadata() {
        let (builder, funding, spend) = spend_fixture();
        let node_for_views = builder.build();
        let spend_raw = node_for_views.get_raw_transaction(&spend.compute_txid()).await.unwrap();
        let funding_raw = node_for_views.get_raw_transaction(&funding.compute_txid()).await.unwrap();

        let mut spend_view = wallet_view(&spend_raw, 1_650_000_100);
        spend_view.block_height = None;
        let spend_block = block_at(190, 1_650_000_000, vec![spend.compute_txid()]);
        let node = Arc::new(
            seed_chain(MockNode::builder())
                .without_tx_index()
                .with_block(spend_block)
                .with_wallet_tx(spend.compute_txid(), spend_view)
                .with_wallet_tx(funding.compute_txid(), wallet_view(&funding_raw, 1_600_000_100))
                .build(),
        );
        let resolver = resolver_for(&node, ResolverOptions::default()).await;
        assert_eq!(resolver.strategy(), LookupStrategy::WalletScoped);

        let tx = resolver.resolve(&spend.compute_txid()).await.unwrap();
        assert_eq!(tx.block.as_ref().map(|b| b.height), Some(190));
        assert_eq!(tx.confirmations, u64::from(TIP - 190 + 1));
        assert_eq!(tx.fees, Amount::from_sat(10_000));
        assert_eq!(node.call_count("getrawtransaction[]"), 0);
        assert_eq!(node.call_count("gettransaction[]"), 2);
    }

    #[tokio::test]
    async fn transaction_hex_comes_from_lookup() {
        let (builder, _funding, spend) = spend_fixture();
        let node = Arc::new(builder.build());
        let resolver = resolver_for(&node, ResolverOptions::default()).await;
        let hex = resolver.transaction_hex(&spend.compute_txid()).await.unwrap();
        assert_eq!(hex, bitcoin::consensus::encode::serialize_hex(&spend));
    }

    #[test]
    fn multisig_reports_first_key_as_p2pkh() {
        let first: PublicKey = KEY_G.parse().unwrap();
        let second: PublicKey = KEY_2G.parse().unwrap();
        let script = Builder::new()
            .push_opcode(OP_PUSHNUM_1)
            .push_key(&first)
            .push_key(&second)
            .push_opcode(OP_PUSHNUM_2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();

        let expected = Address::p2pkh(first.pubkey_hash(), Network::Regtest).to_string();
        assert_eq!(script_address(&script, Network::Regtest), Some(expected));
    }

    #[test]
    fn p2pk_reports_p2pkh_of_key() {
        let key: PublicKey = KEY_G.parse().unwrap();
        let script = Builder::new()
            .push_key(&key)
            .push_opcode(OP_CHECKSIG)
            .into_script();
        let expected = Address::p2pkh(key.pubkey_hash(), Network::Bitcoin).to_string();
        assert_eq!(script_address(&script, Network::Bitcoin), Some(expected));
    }

    #[test]
    fn non_standard_script_has_no_address() {
        let script = Builder::new().push_opcode(OP_CHECKSIG).into_script();
        assert_eq!(script_address(&script, Network::Regtest), None);
    }
}
