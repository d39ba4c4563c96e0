use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use staydesk::config::Config;
use staydesk::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use staydesk::tenant::{TenantManager, TenantSettings};
use staydesk::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    staydesk::observability::init(config.metrics_port)?;
    let tls_acceptor = config.tls_acceptor()?;
    std::fs::create_dir_all(&config.data_dir)?;

    let tenant_manager = Arc::new(TenantManager::new(TenantSettings::from_config(&config)));
    let semaphore = Arc::new(Semaphore::new(config.max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        data_dir = %config.data_dir.display(),
        max_connections = config.max_connections,
        pending_ttl_secs = config.pending_ttl.as_secs(),
        reaper_interval_secs = config.reaper_interval.as_secs(),
        currency = %config.currency,
        tls = tls_acceptor.is_some(),
        "staydesk listening on {addr}"
    );

    let shutdown = shutdown_signal()?;
    tokio::pin!(shutdown);

    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept error: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("shutdown signal received, no longer accepting");
                break;
            }
        };

        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            warn!("connection limit reached, rejecting {peer}");
            metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };

        info!("connection from {peer}");
        metrics::counter!(CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        let tm = tenant_manager.clone();
        let password = config.password.clone();
        let tls = tls_acceptor.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = wire::process_connection(socket, tm, password, tls).await {
                error!("connection error from {peer}: {e}");
            }
            metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        });
    }

    drain(&semaphore, config.max_connections).await;
    info!("staydesk stopped ({} tenants loaded)", tenant_manager.tenant_count());
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    Ok(async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
    })
}

/// Wait until every permit is back or the drain timeout expires.
async fn drain(semaphore: &Semaphore, max_connections: usize) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while semaphore.available_permits() < max_connections {
        if tokio::time::Instant::now() >= deadline {
            let open = max_connections - semaphore.available_permits();
            warn!("drain timeout, {open} connections still open");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("all connections drained");
}
