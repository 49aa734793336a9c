//! Wallet synchronization and descriptor import.
//!
//! The [`Orchestrator`] drives the watch-only wallet from a freshly started
//! node to a state where the explorer surface can serve account history:
//! wait for the chain to catch up, optionally audit the coin supply, import
//! the configured account descriptors with a rescan, then record a
//! checkpoint so the next start can skip the full rescan.
//!
//! Phases run strictly in sequence on a background task. Progress is
//! published through the context's [`StatusCell`](crate::status::StatusCell).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::Amount;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, RescanCheckpoint};
use crate::error::{CoreError, RpcError};
use crate::node::NodeContext;
use crate::rpc::{ChainInfo, ImportRequest, NodeRpc};
use crate::status::Status;
use crate::types::{
    strip_checksum, AccountConfig, Descriptor, DEFAULT_ACCOUNT_DEPTH, DEFAULT_BIRTHDAY,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(7);

/// Blocks between subsidy halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Block subsidy of the first era, in satoshis.
pub const INITIAL_SUBSIDY: u64 = 50 * 100_000_000;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Interval between chain-sync and scan-progress polls.
    pub poll_interval: Duration,
    /// Log expected vs. reported coin supply once the chain is synced.
    pub circulation_check: bool,
    /// Import descriptors even when the node already watches them.
    pub force_import: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            circulation_check: false,
            force_import: false,
        }
    }
}

/// What an import pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Descriptors sent to `importdescriptors`.
    pub imported: usize,
    /// Accounts left out because their descriptors were unusable.
    pub skipped_accounts: usize,
    /// A checkpoint rescan ran instead of an import.
    pub rescanned: bool,
}

impl ImportOutcome {
    pub fn scanned(&self) -> bool {
        self.imported > 0 || self.rescanned
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupplyAudit {
    pub height: u64,
    pub expected: Amount,
    pub reported: Amount,
}

pub struct Orchestrator {
    ctx: Arc<NodeContext>,
    checkpoints: Option<CheckpointStore>,
    options: SyncOptions,
    // One import pass at a time, whether from startup or the control API.
    import_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        ctx: Arc<NodeContext>,
        checkpoints: Option<CheckpointStore>,
        options: SyncOptions,
    ) -> Self {
        Self {
            ctx,
            checkpoints,
            options,
            import_lock: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    /// Startup sequence: chain sync, supply audit, import, checkpoint.
    ///
    /// Ends in [`Status::Ready`] on success. An unreachable node during the
    /// import phase keeps the status at `NodeDisconnected` and the phase is
    /// retried every poll interval until the pool closes. Other import
    /// failures leave the bridge serving with whatever the wallet already
    /// watches.
    pub async fn run(&self, accounts: &[AccountConfig]) -> Result<ImportOutcome, CoreError> {
        self.wait_for_chain_sync().await?;

        if self.options.circulation_check {
            if let Err(err) = self.audit_supply().await {
                warn!(error = %err, "supply audit failed");
            }
        }

        let outcome = loop {
            match self.import_accounts(accounts).await {
                Ok(outcome) => break outcome,
                Err(err) if err.is_connectivity() && !self.ctx.pool().is_closed() => {
                    warn!(error = %err, "node unreachable during descriptor import; retrying");
                    self.ctx.status().set(Status::NodeDisconnected);
                }
                Err(err) => return Err(err),
            }
            tokio::time::sleep(self.options.poll_interval).await;
        };
        if outcome.scanned() {
            if let Err(err) = self.persist_checkpoint().await {
                warn!(error = %err, "failed to save rescan checkpoint");
            }
        }
        self.ctx.status().set(Status::Ready);
        Ok(outcome)
    }

    // ==========================================================================
    // Chain Sync
    // ==========================================================================

    /// Poll until the node has validated every header it knows of.
    ///
    /// Unreachable-node errors flip the status to `NodeDisconnected` and
    /// keep polling; other errors end the wait.
    pub async fn wait_for_chain_sync(&self) -> Result<ChainInfo, CoreError> {
        loop {
            let polled = {
                let conn = self.ctx.acquire().await?;
                conn.get_blockchain_info().await
            };
            match polled {
                Ok(info) if info.is_synced() => {
                    info!(
                        height = info.blocks,
                        best_block = %info.best_block_hash,
                        "chain sync complete"
                    );
                    return Ok(info);
                }
                Ok(info) => {
                    self.ctx.status().set(Status::Syncing);
                    info!(
                        count = %format!("{}/{}", info.blocks, info.headers),
                        progress = %format!("{:.2}%", info.verification_progress * 100.0),
                        "waiting for chain sync"
                    );
                }
                Err(err) if err.is_connectivity() && !self.ctx.pool().is_closed() => {
                    warn!(error = %err, "node unreachable while waiting for chain sync");
                    self.ctx.status().set(Status::NodeDisconnected);
                }
                Err(err) => return Err(err),
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    // ==========================================================================
    // Supply Audit
    // ==========================================================================

    /// Log the supply implied by the halving schedule beside the node's
    /// UTXO set total. The two are not compared.
    pub async fn audit_supply(&self) -> Result<SupplyAudit, CoreError> {
        info!("computing circulating supply");
        let set = {
            let conn = self.ctx.acquire().await?;
            conn.get_tx_out_set_info().await?
        };
        let audit = SupplyAudit {
            height: set.height,
            expected: expected_supply(set.height),
            reported: set.total_amount,
        };
        info!(
            height = audit.height,
            expected = %audit.expected,
            reported = %audit.reported,
            "supply audit complete"
        );
        Ok(audit)
    }

    // ==========================================================================
    // Descriptor Import
    // ==========================================================================

    /// Canonical descriptors for one account, with depth and age filled in.
    pub async fn compute_account_descriptors(
        &self,
        account: &AccountConfig,
    ) -> Result<Vec<Descriptor>, CoreError> {
        let checkpoint = self.checkpoint();
        let conn = self.ctx.acquire().await?;
        self.account_descriptors(&*conn, account, checkpoint.as_ref())
            .await
    }

    /// Import every account descriptor the wallet does not watch yet.
    ///
    /// Unusable accounts are logged and skipped. The import itself is not
    /// atomic: when some descriptors fail, the others stay imported and the
    /// call reports [`CoreError::ImportFailed`].
    pub async fn import_accounts(
        &self,
        accounts: &[AccountConfig],
    ) -> Result<ImportOutcome, CoreError> {
        let _guard = self.import_lock.lock().await;
        let mut outcome = ImportOutcome::default();
        if accounts.is_empty() {
            info!("no accounts configured; skipping descriptor import");
            return Ok(outcome);
        }

        let checkpoint = if self.options.force_import {
            self.checkpoint()
        } else {
            None
        };

        let mut batch = Vec::new();
        {
            let conn = self.ctx.acquire().await?;
            for (index, account) in accounts.iter().enumerate() {
                match self
                    .pending_descriptors(&*conn, account, checkpoint.as_ref())
                    .await
                {
                    Ok(pending) => batch.extend(pending),
                    Err(err) if err.is_connectivity() => {
                        self.ctx.status().set(Status::NodeDisconnected);
                        return Err(err);
                    }
                    Err(err) => {
                        warn!(account = index, error = %err, "skipping account");
                        outcome.skipped_accounts += 1;
                    }
                }
            }
        }

        if batch.is_empty() {
            match checkpoint {
                Some(checkpoint) => {
                    self.rescan_from(&checkpoint).await?;
                    outcome.rescanned = true;
                }
                None => info!("no (new) descriptors to import"),
            }
            return Ok(outcome);
        }

        outcome.imported = batch.len();
        self.import_descriptors(&batch).await?;
        Ok(outcome)
    }

    async fn account_descriptors(
        &self,
        rpc: &dyn NodeRpc,
        account: &AccountConfig,
        checkpoint: Option<&RescanCheckpoint>,
    ) -> Result<Vec<Descriptor>, CoreError> {
        let depth = account.depth.unwrap_or(DEFAULT_ACCOUNT_DEPTH);
        let age = match checkpoint {
            Some(checkpoint) if self.options.force_import => checkpoint.age(),
            _ => account.birthday.unwrap_or(DEFAULT_BIRTHDAY),
        };

        let mut descriptors = Vec::with_capacity(2);
        for raw in [&account.external, &account.internal] {
            let body = strip_checksum(raw);
            let info = rpc.get_descriptor_info(body).await.map_err(|source| {
                CoreError::InvalidDescriptor {
                    descriptor: body.to_owned(),
                    source: Box::new(source),
                }
            })?;
            descriptors.push(Descriptor {
                value: info.descriptor,
                depth,
                age,
            });
        }
        Ok(descriptors)
    }

    /// Descriptors of `account` that still need importing. Only the address
    /// at index `depth` is derived; if the wallet watches it, the whole
    /// range is assumed imported.
    async fn pending_descriptors(
        &self,
        rpc: &dyn NodeRpc,
        account: &AccountConfig,
        checkpoint: Option<&RescanCheckpoint>,
    ) -> Result<Vec<Descriptor>, CoreError> {
        let mut pending = Vec::new();
        for descriptor in self.account_descriptors(rpc, account, checkpoint).await? {
            let address = derive_one(rpc, &descriptor.value, descriptor.depth).await?;
            let info =
                rpc.get_address_info(&address)
                    .await
                    .map_err(|source| CoreError::AddressInfo {
                        address: address.clone(),
                        source: Box::new(source),
                    })?;
            if info.is_watched() && !self.options.force_import {
                debug!(descriptor = %descriptor.value, "descriptor already watched");
                continue;
            }
            pending.push(descriptor);
        }
        Ok(pending)
    }

    async fn import_descriptors(&self, batch: &[Descriptor]) -> Result<(), CoreError> {
        let requests: Vec<ImportRequest> = batch
            .iter()
            .map(|descriptor| ImportRequest {
                descriptor: descriptor.value.clone(),
                range: (0, descriptor.depth),
                timestamp: Some(descriptor.age),
            })
            .collect();
        info!(descriptors = requests.len(), "importing descriptors");

        self.ctx.status().set(Status::Scanning);
        let import = async {
            let conn = self.ctx.acquire().await?;
            conn.import_descriptors(&requests).await
        };
        let result = tokio::select! {
            result = import => result,
            never = self.monitor_scan() => match never {},
        };

        let results = match result {
            Ok(results) => results,
            Err(err) => return Err(self.scan_failed(err)),
        };
        self.ctx.status().set(Status::Ready);

        let mut succeeded = 0;
        for (request, result) in requests.iter().zip(&results) {
            for warning in &result.warnings {
                warn!(descriptor = %request.descriptor, warning = %warning, "import warning");
            }
            if result.success {
                succeeded += 1;
            } else {
                warn!(
                    descriptor = %request.descriptor,
                    error = ?result.error,
                    "descriptor import failed"
                );
            }
        }
        let failed = requests.len() - succeeded;
        if failed > 0 {
            return Err(CoreError::ImportFailed {
                failed,
                total: requests.len(),
            });
        }
        info!(descriptors = requests.len(), "descriptor import complete");
        Ok(())
    }

    async fn rescan_from(&self, checkpoint: &RescanCheckpoint) -> Result<(), CoreError> {
        info!(
            from_height = checkpoint.last_block_height,
            last_sync = %checkpoint.last_sync_time,
            "rescanning from checkpoint"
        );
        self.ctx.status().set(Status::Scanning);
        let rescan = async {
            let conn = self.ctx.acquire().await?;
            conn.rescan_blockchain(Some(checkpoint.last_block_height), None)
                .await
        };
        let result = tokio::select! {
            result = rescan => result,
            never = self.monitor_scan() => match never {},
        };
        match result {
            Ok(range) => {
                self.ctx.status().set(Status::Ready);
                info!(
                    start = range.start_height,
                    stop = range.stop_height,
                    "rescan complete"
                );
                Ok(())
            }
            Err(err) => Err(self.scan_failed(err)),
        }
    }

    fn scan_failed(&self, err: CoreError) -> CoreError {
        let status = if err.is_connectivity() {
            Status::NodeDisconnected
        } else {
            Status::Ready
        };
        self.ctx.status().set(status);
        err
    }

    /// Log wallet rescan progress until dropped. Each poll borrows its own
    /// pooled connection so the import keeps the other one.
    async fn monitor_scan(&self) -> Infallible {
        loop {
            tokio::time::sleep(self.options.poll_interval).await;
            let polled = match self.ctx.acquire().await {
                Ok(conn) => conn.get_wallet_info().await,
                Err(err) => Err(err),
            };
            match polled {
                Ok(info) => match info.scan_progress() {
                    Some(scan) => info!(
                        progress = %format!("{:.2}%", scan.progress * 100.0),
                        duration_secs = scan.duration,
                        "importing descriptors"
                    ),
                    None => debug!("wallet reports no scan in progress"),
                },
                Err(err) => warn!(error = %err, "failed to query wallet scan state"),
            }
        }
    }

    // ==========================================================================
    // Checkpoint and Scan Control
    // ==========================================================================

    /// The stored checkpoint, if any. Unreadable records are logged and
    /// treated as absent.
    pub fn checkpoint(&self) -> Option<RescanCheckpoint> {
        let store = self.checkpoints.as_ref()?;
        match store.load() {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                warn!(path = %store.path().display(), error = %err, "ignoring rescan checkpoint");
                None
            }
        }
    }

    /// Record the current tip height and time. `Ok(None)` when no
    /// checkpoint store is configured.
    pub async fn persist_checkpoint(&self) -> Result<Option<RescanCheckpoint>, CoreError> {
        let height = {
            let conn = self.ctx.acquire().await?;
            conn.get_blockchain_info().await?.blocks
        };
        self.write_checkpoint(height)
    }

    /// [`Orchestrator::persist_checkpoint`] over the cleanup session, for
    /// use while the pool is draining.
    pub(crate) async fn persist_checkpoint_via_janitor(
        &self,
    ) -> Result<Option<RescanCheckpoint>, CoreError> {
        let height = self.ctx.janitor().get_blockchain_info().await?.blocks;
        self.write_checkpoint(height)
    }

    fn write_checkpoint(&self, height: u64) -> Result<Option<RescanCheckpoint>, CoreError> {
        let Some(store) = &self.checkpoints else {
            return Ok(None);
        };
        let checkpoint = RescanCheckpoint::new(height, OffsetDateTime::now_utc())?;
        store.save(&checkpoint)?;
        Ok(Some(checkpoint))
    }

    /// Ask the node to stop a running rescan. Goes through the cleanup
    /// session since the pooled ones may be blocked on the import.
    pub async fn abort_scan(&self) -> Result<bool, CoreError> {
        let aborted = self.ctx.janitor().abort_rescan().await?;
        info!(aborted, "rescan abort requested");
        Ok(aborted)
    }

    /// Whether the wallet watches the first address of `descriptor`.
    pub async fn has_descriptor(&self, descriptor: &str) -> Result<bool, CoreError> {
        let conn = self.ctx.acquire().await?;
        let body = strip_checksum(descriptor);
        let canonical = conn
            .get_descriptor_info(body)
            .await
            .map_err(|source| CoreError::InvalidDescriptor {
                descriptor: body.to_owned(),
                source: Box::new(source),
            })?
            .descriptor;
        let address = derive_one(&*conn, &canonical, 0).await?;
        let info = conn
            .get_address_info(&address)
            .await
            .map_err(|source| CoreError::AddressInfo {
                address: address.clone(),
                source: Box::new(source),
            })?;
        Ok(info.is_watched())
    }
}

/// Derive the single address at `index`.
async fn derive_one(rpc: &dyn NodeRpc, descriptor: &str, index: u32) -> Result<String, CoreError> {
    let derive_error = |source: CoreError| CoreError::DeriveAddress {
        descriptor: descriptor.to_owned(),
        index,
        source: Box::new(source),
    };
    rpc.derive_addresses(descriptor, (index, index))
        .await
        .map_err(derive_error)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            derive_error(RpcError::InvalidResponse("empty derivation result".to_owned()).into())
        })
}

/// Subsidy of the first `height` blocks (`0..height`, genesis included)
/// under the halving schedule.
pub fn expected_supply(height: u64) -> Amount {
    let eras = height / HALVING_INTERVAL;
    let mut subsidy = INITIAL_SUBSIDY;
    let mut supply: u64 = 0;
    for _ in 0..eras.min(64) {
        supply = supply.saturating_add(HALVING_INTERVAL * subsidy);
        subsidy /= 2;
    }
    if eras >= 64 {
        subsidy = 0;
    }
    let remainder = height - HALVING_INTERVAL * eras;
    Amount::from_sat(supply.saturating_add(subsidy * remainder))
}
