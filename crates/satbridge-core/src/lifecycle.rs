//! Staged shutdown.
//!
//! Order matters: a wallet unloaded in the middle of a rescan can be left
//! corrupted on disk, so a running rescan is aborted before anything else
//! is torn down. Cleanup calls go through the context's janitor session,
//! which stays usable while the pool drains.

use std::time::Duration;

use tracing::{error, info};

use crate::error::CoreError;
use crate::node::unload_wallet;
use crate::status::Status;
use crate::sync::Orchestrator;

/// Budget for the whole node stage of shutdown.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Stop the bridge's use of the node.
///
/// 1. Abort a running rescan, or record a checkpoint when the bridge is
///    ready.
/// 2. Drain and close the pool.
/// 3. Unload the wallet and close the janitor session.
///
/// All three stages share `deadline`. Missing it returns
/// [`CoreError::ShutdownTimeout`] and the caller is expected to exit
/// immediately; per-stage node errors are only logged.
///
/// The checkpoint is written only from `Ready`. Before that (initializing,
/// syncing or retrying after a disconnect) the wallet has not scanned up to
/// the tip, and recording the tip height would let the next start skip
/// blocks it never scanned.
pub async fn shutdown(orchestrator: &Orchestrator, deadline: Duration) -> Result<(), CoreError> {
    info!(
        status = %orchestrator.context().status().get(),
        deadline_ms = deadline.as_millis() as u64,
        "shutting down node connections"
    );
    match tokio::time::timeout(deadline, release_node(orchestrator, deadline)).await {
        Ok(result) => result,
        Err(_) => {
            error!(deadline_ms = deadline.as_millis() as u64, "node shutdown missed its deadline");
            Err(CoreError::ShutdownTimeout(deadline))
        }
    }
}

async fn release_node(orchestrator: &Orchestrator, deadline: Duration) -> Result<(), CoreError> {
    let ctx = orchestrator.context();
    match ctx.status().get() {
        Status::Scanning => {
            if let Err(err) = orchestrator.abort_scan().await {
                error!(error = %err, "failed to abort rescan");
            }
        }
        Status::Ready => {
            if let Err(err) = orchestrator.persist_checkpoint_via_janitor().await {
                error!(error = %err, "failed to save rescan checkpoint");
            }
        }
        _ => {}
    }

    ctx.pool().shutdown(deadline).await?;

    let janitor = ctx.janitor();
    if let Err(err) = unload_wallet(janitor, ctx.wallet_name()).await {
        error!(wallet = ctx.wallet_name(), error = %err, "unable to unload wallet");
    }
    janitor.close().await;
    info!("node connections closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::checkpoint::{CheckpointStore, CHECKPOINT_FILE_NAME};
    use crate::rpc::mock::{MockNode, WalletState};
    use crate::rpc::ScanProgress;
    use crate::sync::SyncOptions;
    use crate::test_util::*;

    fn position(calls: &[String], method: &str) -> usize {
        calls
            .iter()
            .position(|m| m == method)
            .unwrap_or_else(|| panic!("{method} was never called"))
    }

    #[tokio::test]
    async fn scanning_aborts_before_unload() {
        let node = Arc::new(
            seed_chain(MockNode::builder())
                .with_scan_progress(vec![Some(ScanProgress {
                    duration: 30,
                    progress: 0.4,
                })])
                .build(),
        );
        let orchestrator =
            Orchestrator::new(mock_context(&node).await, None, SyncOptions::default());
        orchestrator.context().status().set(Status::Scanning);

        shutdown(&orchestrator, SHUTDOWN_DEADLINE).await.unwrap();

        let calls = node.calls();
        assert!(position(&calls, "abortrescan") < position(&calls, "unloadwallet"));
        assert_eq!(node.wallet_state(), WalletState::Unloaded);
        assert!(node.is_closed());
        assert!(orchestrator.context().pool().is_closed());
    }

    #[tokio::test]
    async fn ready_bridge_records_checkpoint() {
        let dir = scratch_dir("lifecycle");
        let store = CheckpointStore::new(dir.join(CHECKPOINT_FILE_NAME));
        let node = Arc::new(seed_chain(MockNode::builder()).build());
        let orchestrator = Orchestrator::new(
            mock_context(&node).await,
            Some(store.clone()),
            SyncOptions::default(),
        );
        orchestrator.context().status().set(Status::Ready);

        shutdown(&orchestrator, SHUTDOWN_DEADLINE).await.unwrap();

        assert_eq!(node.call_count("abortrescan"), 0);
        assert_eq!(store.load().unwrap().unwrap().last_block_height, 200);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn held_connection_misses_deadline() {
        let node = Arc::new(seed_chain(MockNode::builder()).build());
        let orchestrator =
            Orchestrator::new(mock_context(&node).await, None, SyncOptions::default());
        let _held = orchestrator.context().acquire().await.unwrap();

        let err = shutdown(&orchestrator, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ShutdownTimeout(_)));
        assert_eq!(node.call_count("unloadwallet"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_abort_misses_deadline() {
        let node = Arc::new(seed_chain(MockNode::builder()).build());
        let orchestrator =
            Orchestrator::new(mock_context(&node).await, None, SyncOptions::default());
        orchestrator.context().status().set(Status::Scanning);
        node.set_stall("abortrescan", Duration::from_secs(60));

        let started = tokio::time::Instant::now();
        let err = shutdown(&orchestrator, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ShutdownTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(node.call_count("unloadwallet"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_unload_misses_deadline() {
        let node = Arc::new(seed_chain(MockNode::builder()).build());
        let orchestrator =
            Orchestrator::new(mock_context(&node).await, None, SyncOptions::default());
        node.set_stall("unloadwallet", Duration::from_secs(60));

        let started = tokio::time::Instant::now();
        let err = shutdown(&orchestrator, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ShutdownTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(orchestrator.context().pool().is_closed());
        assert_eq!(node.call_count("unloadwallet"), 1);
    }
}
