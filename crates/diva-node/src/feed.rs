//! WebSocket block feed.
//!
//! Every committed block is pushed to connected subscribers as its
//! canonical JSON, on the dedicated feed port.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use diva_chain::{canonical, Block};
use std::net::SocketAddr;
use tokio::sync::broadcast;

/// Builds the feed router over a block broadcast channel.
pub fn router(blocks: broadcast::Sender<Block>) -> Router {
    Router::new()
        .route("/", get(subscribe))
        .with_state(blocks)
}

/// Serves the feed until the listener closes.
pub async fn serve(
    addr: SocketAddr,
    blocks: broadcast::Sender<Block>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "block feed listening");
    axum::serve(listener, router(blocks)).await
}

async fn subscribe(
    ws: WebSocketUpgrade,
    State(blocks): State<broadcast::Sender<Block>>,
) -> impl IntoResponse {
    let rx = blocks.subscribe();
    ws.on_upgrade(move |socket| push_blocks(socket, rx))
}

async fn push_blocks(mut socket: WebSocket, mut rx: broadcast::Receiver<Block>) {
    loop {
        match rx.recv().await {
            Ok(block) => {
                let json = canonical::block(&block);
                if socket.send(Message::Text(json.into())).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "feed subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
