//! # Reply Server
//!
//! The receiving half of the request/reply channel. Each node runs one.
//!
//! ```text
//!   GET /health  → "OK"
//!   GET /sync    → WebSocket upgrade
//!
//!   client ──text──► handler.handle(request) ──text──► client
//!   client ──text──► handler.handle(request) ──text──► client
//!   ...            (strictly alternating, one reply per request)
//! ```
//!
//! The server never times out a client; a client that gives up simply drops
//! the socket and opens a new one. Replies still in flight on the abandoned
//! socket are lost, which is harmless because every handler is idempotent.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// Maximum request size (1MB).
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Turns one request body into one reply body.
///
/// Implementations must be idempotent: the client resends the identical
/// request after every timeout, so the same body may arrive many times.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: &str) -> String;
}

#[async_trait]
impl<H: RequestHandler + ?Sized> RequestHandler for Arc<H> {
    async fn handle(&self, request: &str) -> String {
        (**self).handle(request).await
    }
}

/// axum server exposing a [`RequestHandler`] over WebSocket.
pub struct ReplyServer<H> {
    handler: Arc<H>,
}

impl<H: RequestHandler> ReplyServer<H> {
    pub fn new(handler: Arc<H>) -> Self {
        ReplyServer { handler }
    }

    /// Binds `addr` and serves until `shutdown` resolves.
    pub async fn bind_and_serve<F>(self, addr: &str, shutdown: F) -> SyncResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            SyncError::ConnectionFailed(format!("Failed to bind to {}: {}", addr, e))
        })?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> SyncResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::ConnectionFailed(e.to_string()))?;
        let app = Router::new()
            .route("/sync", get(ws_handler::<H>))
            .route("/health", get(health_handler))
            .with_state(self.handler);

        info!(addr = %local_addr, "Reply server listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| SyncError::Internal(format!("Reply server failed: {}", e)))?;

        info!("Reply server stopped");
        Ok(())
    }
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn ws_handler<H: RequestHandler>(
    ws: WebSocketUpgrade,
    State(handler): State<Arc<H>>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    debug!(addr = %addr, "New WebSocket connection");
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, handler, addr))
}

/// Answers every text frame with exactly one text frame.
async fn handle_socket<H: RequestHandler>(socket: WebSocket, handler: Arc<H>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(frame) = receiver.next().await {
        let request = match frame {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Message::Ping(data)) => {
                if sender.send(Message::Pong(data)).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(addr = %addr, error = %e, "WebSocket receive failed");
                break;
            }
        };

        let reply = handler.handle(&request).await;
        if let Err(e) = sender.send(Message::Text(reply.into())).await {
            debug!(addr = %addr, error = %e, "Client went away before the reply");
            break;
        }
    }

    debug!(addr = %addr, "WebSocket connection closed");
}
