//! Server execution logic.

use std::{future::Future, sync::Arc};

use axum::{Router, routing::get};
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;

use crate::node::SyncNode;

use super::{
    handler::{get_session_detail, health_check, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// WebSocket / HTTP server of one node
///
/// # Example
///
/// ```ignore
/// let node = Arc::new(SyncNode::new(node_id, config, parts));
/// Server::new(node).run("127.0.0.1".to_string(), 8080).await?;
/// ```
pub struct Server {
    node: Arc<SyncNode>,
}

impl Server {
    pub fn new(node: Arc<SyncNode>) -> Self {
        Self { node }
    }

    /// Routes of the node
    pub fn router(&self) -> Router {
        let app_state = Arc::new(AppState::from_node(&self.node));
        Router::new()
            // WebSocket エンドポイント
            .route("/ws", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route("/api/sessions/{session_id}", get(get_session_detail))
            .layer(TraceLayer::new_for_http())
            .with_state(app_state)
    }

    /// Bind to `host:port` and serve until Ctrl+C / SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr).await?;
        tracing::info!("Connect to: ws://{}/ws", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");
        self.serve(listener, shutdown_signal()).await?;
        Ok(())
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// Background tasks of the node run for as long as the server does.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = self.node.spawn_background_tasks(stop_rx);

        tracing::info!(
            node_id = %self.node.node_id,
            "Kumitate node listening on {}",
            listener.local_addr()?
        );
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        // 送信側が残っている間は受信側のエラーにならない
        let _ = stop_tx.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("background task ended abnormally: {}", e);
            }
        }
        self.node.shutdown().await;
        served?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}
