//! Smoke test: the server runs a few ticks and stops on the shutdown signal.

use std::time::Duration;

use realm_server::server::{bind_ephemeral, shutdown_channel};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_runs_and_shuts_down_cleanly() -> anyhow::Result<()> {
    let (server, _cfg) = bind_ephemeral(100).await?;
    let registry = server.registry();
    let (shutdown, rx) = shutdown_channel();
    let handle = tokio::spawn(server.run(rx));

    // Let a handful of ticks pass with an empty registry.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(registry.is_empty());

    shutdown.send(true)?;
    handle.await??;
    Ok(())
}
