//! Address activity filter.
//!
//! Narrows the wallet's transaction listing down to the transactions that
//! touch a given set of addresses, either by paying to one of them or by
//! spending an output one of them received.

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::BlockHash;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::node::NodeContext;
use crate::resolver::Resolver;
use crate::rpc::TxCategory;
use crate::types::Transaction;

/// Minimum confirmations passed to `listsinceblock`. With a threshold of 1
/// the node still lists unconfirmed wallet transactions; the threshold
/// only decides which block is reported as `lastblock`.
pub const LISTING_TARGET_CONFIRMATIONS: u32 = 1;

pub struct ActivityFilter {
    ctx: Arc<NodeContext>,
    resolver: Arc<Resolver>,
}

impl ActivityFilter {
    pub fn new(ctx: Arc<NodeContext>, resolver: Arc<Resolver>) -> Self {
        Self { ctx, resolver }
    }

    /// Wallet transactions since `block_hash` (or since genesis) that pay to,
    /// or spend from, any of `addresses`. Ordered by `received_at`, oldest
    /// first.
    pub async fn get_activity(
        &self,
        addresses: &[String],
        block_hash: Option<&BlockHash>,
    ) -> Result<Vec<Transaction>, CoreError> {
        let watched: HashSet<&str> = addresses.iter().map(String::as_str).collect();
        let scope = self.resolver.cached();

        let listed = {
            let conn = self.ctx.acquire().await?;
            conn.list_since_block(block_hash, LISTING_TARGET_CONFIRMATIONS)
                .await?
        };
        debug!(
            entries = listed.len(),
            addresses = watched.len(),
            "filtering wallet listing"
        );

        let mut relevant = Vec::new();
        let mut seen = HashSet::new();
        let mut sends = Vec::new();
        for entry in &listed {
            if entry.category == TxCategory::Send {
                sends.push(entry.txid);
            }
            let pays_watched = entry
                .address
                .as_deref()
                .is_some_and(|address| watched.contains(address));
            if pays_watched && seen.insert(entry.txid) {
                relevant.push(entry.txid);
            }
        }

        // Outgoing entries only name the destination; spends of watched
        // funds show up in the resolved inputs.
        let mut queued = HashSet::new();
        sends.retain(|txid| !seen.contains(txid) && queued.insert(*txid));
        if !sends.is_empty() {
            let resolved = scope.resolve_batch(&sends).await?;
            for txid in sends {
                match resolved.get(&txid) {
                    Some(Ok(tx)) => {
                        let spends_watched =
                            tx.input_addresses().any(|address| watched.contains(address));
                        if spends_watched && seen.insert(txid) {
                            relevant.push(txid);
                        }
                    }
                    Some(Err(err)) => {
                        debug!(txid = %txid, error = %err, "cannot resolve outgoing transaction")
                    }
                    None => {}
                }
            }
        }

        let mut resolved = scope.resolve_batch(&relevant).await?;
        let mut activity = Vec::with_capacity(relevant.len());
        for txid in relevant {
            match resolved.remove(&txid) {
                Some(Ok(tx)) => activity.push(tx),
                Some(Err(err)) => {
                    warn!(txid = %txid, error = %err, "skipping unresolvable transaction");
                    scope.evict(&txid).await;
                }
                None => scope.evict(&txid).await,
            }
        }

        activity.sort_by_key(|tx| tx.received_at);
        Ok(activity)
    }
}

/// Parse a comma-separated address list, dropping empty items.
pub fn split_addresses(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
