use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::handler::{self, AppState};

pub(crate) fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/stream", handler::stream::stream_router())
        .merge(handler::system::system_router());

    Router::new()
        .nest("/api", api)
        .route("/socket", get(handler::socket::upgrade))
        .with_state(state)
}

/// Binds `addr` and serves until `cancel` fires. Returns the bound address
/// and the server task.
pub(crate) async fn start_api_server(
    addr: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    log::info!("API server listening on {}", local_addr);

    let app = app_router(state);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API server error: {}", e);
        }
    });
    Ok((local_addr, server))
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;
