use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};

use mirror::hub::SubscriberHub;
use mirror::ledger::HistoryLedger;
use mirror::{Mirror, TreeStore};

pub mod error;
pub mod events;
pub mod history;
pub mod tree;

pub struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Server {
    /// Binds `addr` and serves the API for an already running mirror.
    /// The server borrows the mirror's components; shutting it down
    /// does not stop the mirror itself.
    pub async fn new(mirror: &Mirror, addr: &str) -> Result<Self, String> {
        let state = Arc::new(ServerState {
            tree: mirror.tree().clone(),
            ledger: mirror.ledger().clone(),
            monitor_hub: mirror.monitor_hub().clone(),
            filesystem_hub: mirror.filesystem_hub().clone(),
        });
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        let app = Router::new()
            .route("/health", get(health))
            .route("/api/tree", get(tree::tree))
            .route("/api/node", get(tree::node))
            .route("/api/search", get(tree::search))
            .route("/api/stats", get(tree::stats))
            .route("/api/history", get(history::history))
            .route("/api/history/state", get(history::current_state))
            .route("/monitor/ws", get(events::monitor_ws))
            .route("/filesystem/ws", get(events::filesystem_ws))
            .with_state(state)
            .layer(cors);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|error| error.to_string())?;
        let addr = listener
            .local_addr()
            .map_err(|error| error.to_string())?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        tracing::info!("listening on {addr}");
        Ok(Server {
            addr,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&mut self) -> Result<(), String> {
        if let Some(sender) = self.shutdown.take() {
            sender
                .send(())
                .map_err(|_| "failed to send server shutdown signal".to_string())
        } else {
            Ok(())
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

async fn health() -> &'static str {
    "ok"
}

pub(crate) struct ServerState {
    pub(crate) tree: Arc<TreeStore>,
    pub(crate) ledger: Arc<HistoryLedger>,
    pub(crate) monitor_hub: Arc<SubscriberHub>,
    pub(crate) filesystem_hub: Arc<SubscriberHub>,
}
