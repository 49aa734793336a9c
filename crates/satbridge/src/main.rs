mod cli;
mod config;
mod server;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, WrapErr};
use tokio::sync::watch;

use satbridge_core::checkpoint::CheckpointStore;
use satbridge_core::lifecycle::{self, SHUTDOWN_DEADLINE};
use satbridge_core::node::{self, NodeContext, NodeSessions, WALLET_NAME};
use satbridge_core::resolver::{Resolver, ResolverOptions};
use satbridge_core::sync::{Orchestrator, SyncOptions};
use satbridge_core::Explorer;

/// Time given to in-flight HTTP requests after a shutdown signal.
const SERVER_DRAIN: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let config_path = config::resolve_path(args.config.as_deref())?;
    let config = config::Config::load(&config_path)?;
    tracing::info!(
        path = %config_path.display(),
        accounts = config.accounts.len(),
        "loaded configuration"
    );

    let endpoint = config.endpoint(args.rpc_requests_per_second, args.rpc_batch_chunk_size);
    let sessions = NodeSessions::connect(&endpoint).map_err(|err| {
        eyre!(format_rpc_connect_error(&config.rpc_url, &err.to_string()))
            .wrap_err("while configuring Bitcoin Core RPC sessions")
    })?;

    if args.unload_wallet {
        node::unload_wallet(sessions.janitor.as_ref(), WALLET_NAME)
            .await
            .wrap_err("unload wallet")?;
        sessions.janitor.close().await;
        return Ok(());
    }

    let ctx = Arc::new(
        NodeContext::initialize(sessions, WALLET_NAME)
            .await
            .map_err(|err| {
                eyre!(format_rpc_connect_error(&config.rpc_url, &err.to_string()))
                    .wrap_err("while initializing the Bitcoin Core node")
            })?,
    );
    let capabilities = ctx.capabilities();
    if capabilities.pruned {
        tracing::warn!("node is pruned; transactions in pruned blocks cannot be served");
    }
    if !capabilities.tx_index {
        tracing::warn!(
            "node has no transaction index; only wallet transactions can be resolved \
             (run bitcoind with -txindex=1 to serve arbitrary transactions)"
        );
    }

    let checkpoints = CheckpointStore::locate(&config_path);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&ctx),
        Some(checkpoints),
        SyncOptions {
            poll_interval: Duration::from_secs(args.poll_interval_secs.max(1)),
            circulation_check: args.circulation_check,
            force_import: args.force_import,
        },
    ));
    let resolver = Arc::new(Resolver::new(Arc::clone(&ctx), ResolverOptions::default()));
    let explorer = Arc::new(Explorer::new(
        Arc::clone(&ctx),
        resolver,
        Arc::clone(&orchestrator),
    ));

    let startup = {
        let orchestrator = Arc::clone(&orchestrator);
        let accounts = config.accounts.clone();
        tokio::spawn(async move {
            match orchestrator.run(&accounts).await {
                Ok(outcome) => tracing::info!(
                    imported = outcome.imported,
                    skipped_accounts = outcome.skipped_accounts,
                    rescanned = outcome.rescanned,
                    "bridge is ready"
                ),
                Err(err) => tracing::error!(error = %err, "startup sequence failed"),
            }
        })
    };

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let origin = format!("http://{}:{}", args.bind, args.port)
        .parse()
        .wrap_err("bind address is not a valid origin")?;
    let router = server::build_router(server::AppState { explorer }, origin);

    if args.bind == "0.0.0.0" {
        tracing::warn!("server is bound to 0.0.0.0; it is accessible from the network");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .wrap_err("bind TCP listener")?;
    tracing::info!("listening on {bind_addr}");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(forward_shutdown_signal(shutdown_tx));

    let mut drain_rx = shutdown_rx.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = drain_rx.wait_for(|stop| *stop).await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            startup.abort();
            release_node(&orchestrator).await;
            result.wrap_err("run HTTP server")?;
        }
        _ = shutdown_rx.wait_for(|stop| *stop) => {
            tracing::info!("shutdown requested");
            startup.abort();
            release_node(&orchestrator).await;

            tracing::info!("draining HTTP server");
            match tokio::time::timeout(SERVER_DRAIN, &mut server).await {
                Ok(result) => result.wrap_err("drain HTTP server")?,
                Err(_) => tracing::warn!(
                    drain_secs = SERVER_DRAIN.as_secs(),
                    "HTTP server did not drain in time"
                ),
            }
        }
    }
    Ok(())
}

/// Abort or checkpoint, then close every node session. A node that does not
/// let go within [`SHUTDOWN_DEADLINE`] ends the process.
async fn release_node(orchestrator: &Orchestrator) {
    if let Err(err) = lifecycle::shutdown(orchestrator, SHUTDOWN_DEADLINE).await {
        tracing::error!(error = %err, "node connections did not close cleanly; exiting");
        std::process::exit(1);
    }
}

/// Flip `tx` on Ctrl-C or, on Unix, SIGTERM.
async fn forward_shutdown_signal(tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("signal received");
    let _ = tx.send(true);
}

fn format_rpc_connect_error(rpc_url: &str, source_error: &str) -> String {
    let mut lines = vec![
        format!("could not use RPC endpoint `{rpc_url}`"),
        format!("error: {source_error}"),
    ];

    if source_error.contains("Could not resolve host") || source_error.contains("dns error") {
        lines.push(
            "hint: hostname resolution failed; verify rpcurl and your DNS/network".into(),
        );
    } else if source_error.contains("tls")
        || source_error.contains("certificate")
        || source_error.contains("SSL")
    {
        lines.push(
            "hint: TLS handshake failed; set \"notls\": true for a plain HTTP node".into(),
        );
    } else if source_error.contains("401") || source_error.contains("403") {
        lines.push("hint: authentication failed; verify rpcuser/rpcpass or rpccookiefile".into());
    } else if source_error.contains("unsupported node version") {
        lines.push("hint: upgrade Bitcoin Core to 22.0 or newer".into());
    } else if source_error.contains("wallet features are disabled") {
        lines.push("hint: start bitcoind without -disablewallet".into());
    } else if source_error.contains("error sending request for url") {
        lines.push(
            "hint: request could not be sent; verify rpcurl and that bitcoind is running".into(),
        );
    }

    lines.join("\n")
}
