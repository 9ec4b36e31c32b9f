use mirror::Mirror;
use mirror_server::{Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mirror=debug")),
        )
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(
        "mirroring {} (history in {})",
        config.mirror.root.display(),
        config.mirror.ledger_dir.display(),
    );

    let mut mirror = match Mirror::start(config.mirror) {
        Ok(mirror) => mirror,
        Err(error) => {
            tracing::error!("failed to start mirror: {error}");
            std::process::exit(1);
        }
    };

    let mut server = match Server::new(&mirror, &config.addr).await {
        Ok(server) => server,
        Err(error) => {
            tracing::error!("failed to start server: {error}");
            std::process::exit(1);
        }
    };

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to wait for shutdown signal: {error}");
    }

    tracing::info!("shutting down");
    let _ = server.shutdown();
    if let Err(error) = mirror.shutdown().await {
        tracing::error!("shutdown incomplete: {error}");
    }
}
