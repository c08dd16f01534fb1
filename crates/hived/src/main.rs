//! hived — the Hive daemon.
//!
//! Loads `hive.toml`, clears droplets left over from a previous run,
//! and proxies every inbound request to a drone picked by request path.
//! Drones are created on demand and deleted after the pool sits idle.
//!
//! # Usage
//!
//! ```text
//! API_TOKEN=... hived --config hive.toml
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hive_cloud::DigitalOcean;
use hive_core::HiveConfig;
use hive_drone::HttpProbe;
use hive_pool::{Hive, HiveResult};
use hive_proxy::ProxyServer;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Upper bound for one readiness probe; a stalled connect counts as "not yet".
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "hived", about = "Hive autoscaling reverse proxy")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, short, default_value = "hive.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hived=debug,hive=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = HiveConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    run(config).await
}

async fn run(config: HiveConfig) -> anyhow::Result<()> {
    info!(pool_size = config.pool_size, region = %config.cloud.region, "hive daemon starting");

    let cloud = DigitalOcean::from_config(&config.cloud).context("failed to create cloud client")?;
    let probe = HttpProbe::new().with_timeout(PROBE_TIMEOUT);
    let hive = Hive::new(config.clone(), cloud, probe)?;
    hive.init().await.context("hive init failed")?;

    let listen = config.listen_addr();
    let addr = tokio::net::lookup_host(&listen)
        .await
        .with_context(|| format!("failed to resolve {listen}"))?
        .next()
        .with_context(|| format!("no address for {listen}"))?;

    let proxy = ProxyServer::bind(addr, Arc::new(hive.clone()), config.worker.auth.as_deref()).await?;
    info!(addr = %proxy.local_addr()?, "listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(proxy.serve(shutdown_rx));

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    };
    supervise(server, shutdown_tx, ctrl_c, hive.destroy()).await?;

    info!("hive daemon stopped");
    Ok(())
}

/// Wait for `stop` or for the server to exit on its own, then delete the
/// pool's droplets before stopping the server. The droplets are deleted
/// on every path.
async fn supervise<S, D>(
    mut server: JoinHandle<anyhow::Result<()>>,
    shutdown_tx: watch::Sender<bool>,
    stop: S,
    destroy: D,
) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
    D: Future<Output = HiveResult<()>>,
{
    let served = tokio::select! {
        _ = stop => {
            info!("shutting down...");
            None
        }
        served = &mut server => {
            warn!("proxy stopped, shutting down");
            Some(served)
        }
    };

    let destroyed = destroy.await;
    if let Err(e) = &destroyed {
        error!(error = %e, "failed to delete droplets");
    }

    let _ = shutdown_tx.send(true);
    let served = match served {
        Some(served) => served,
        None => server.await,
    };

    served.context("proxy task failed")??;
    destroyed?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use hive_pool::HiveError;

    use super::*;

    fn tracked_destroy(flag: Arc<AtomicBool>, result: HiveResult<()>) -> impl Future<Output = HiveResult<()>> {
        async move {
            flag.store(true, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test]
    async fn failed_server_still_deletes_droplets() {
        let destroyed = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(async { Err::<(), _>(anyhow::anyhow!("accept failed")) });

        let result = supervise(
            server,
            shutdown_tx,
            std::future::pending(),
            tracked_destroy(destroyed.clone(), Ok(())),
        )
        .await;

        assert!(destroyed.load(Ordering::SeqCst));
        assert!(format!("{:#}", result.unwrap_err()).contains("accept failed"));
    }

    #[tokio::test]
    async fn stop_deletes_droplets_before_server_stops() {
        let destroyed = Arc::new(AtomicBool::new(false));
        let seen = destroyed.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(async move {
            shutdown_rx.changed().await?;
            anyhow::ensure!(seen.load(Ordering::SeqCst), "server stopped before droplets were deleted");
            Ok::<(), anyhow::Error>(())
        });

        let result = supervise(server, shutdown_tx, async {}, tracked_destroy(destroyed.clone(), Ok(()))).await;

        assert!(result.is_ok(), "{result:?}");
        assert!(destroyed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn delete_failure_is_returned_after_server_stops() {
        let destroyed = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(async move {
            shutdown_rx.changed().await?;
            Ok::<(), anyhow::Error>(())
        });

        let result = supervise(
            server,
            shutdown_tx,
            async {},
            tracked_destroy(destroyed, Err(HiveError::NotInitialized)),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.downcast_ref::<HiveError>(), Some(&HiveError::NotInitialized));
    }
}
