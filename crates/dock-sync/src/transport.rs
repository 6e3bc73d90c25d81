//! # Lazy Pirate Transport
//!
//! Request/reply client with timeout, reconnect and resend.
//!
//! ## Send Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     send_and_await(payload, ack)                        │
//! │                                                                         │
//! │   encode payload ONCE ──► bytes                                        │
//! │            │                                                            │
//! │            ▼                                                            │
//! │   ┌─────────────────┐   connect if no live connection                  │
//! │   │  send(bytes)    │                                                   │
//! │   └────────┬────────┘                                                   │
//! │            ▼                                                            │
//! │   ┌─────────────────┐  reply == ack ──► "Server replied OK" ──► done    │
//! │   │ recv, timeout   │                                                   │
//! │   └────────┬────────┘  reply != ack ──► "Malformed reply"  ─┐          │
//! │            │                                                 │          │
//! │            └── timeout ──────────► "No response from server" ┤          │
//! │                                                              ▼          │
//! │                                   drop connection, wait per policy,    │
//! │                                   "Reconnecting", resend same bytes    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A reply that arrives on an abandoned connection is never read. The peer
//! may therefore process the same request more than once, which is why
//! every [`RequestHandler`] is idempotent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::protocol;
use crate::server::RequestHandler;

// =============================================================================
// Retry Policy
// =============================================================================

/// Delay before each resend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffSchedule {
    /// Resend immediately.
    None,
    /// Same delay every time.
    Fixed(Duration),
    /// Doubling delay with jitter, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

/// How long the lazy pirate loop keeps trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: BackoffSchedule,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: None,
            backoff: BackoffSchedule::None,
        }
    }
}

/// Per-message backoff state.
enum BackoffState {
    None,
    Fixed(Duration),
    Exponential(ExponentialBackoff),
}

impl BackoffState {
    fn start(schedule: BackoffSchedule) -> Self {
        match schedule {
            BackoffSchedule::None => BackoffState::None,
            BackoffSchedule::Fixed(delay) => BackoffState::Fixed(delay),
            BackoffSchedule::Exponential { initial, max } => {
                BackoffState::Exponential(ExponentialBackoff {
                    initial_interval: initial,
                    current_interval: initial,
                    max_interval: max,
                    multiplier: 2.0,
                    max_elapsed_time: None,
                    ..Default::default()
                })
            }
        }
    }

    fn next_delay(&mut self) -> Option<Duration> {
        match self {
            BackoffState::None => None,
            BackoffState::Fixed(delay) => Some(*delay),
            BackoffState::Exponential(backoff) => backoff.next_backoff(),
        }
    }
}

// =============================================================================
// Connections
// =============================================================================

/// One open request/reply channel.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, payload: &str) -> SyncResult<()>;

    /// Waits for the next reply. Never times out on its own.
    async fn recv(&mut self) -> SyncResult<String>;

    async fn close(&mut self);
}

/// Opens fresh connections to a fixed peer.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> SyncResult<Box<dyn Connection>>;

    /// Peer description for logs.
    fn peer(&self) -> String;
}

/// Connects to a [`ReplyServer`](crate::server::ReplyServer) over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        WsConnector {
            url: url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> SyncResult<Box<dyn Connection>> {
        match timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, response))) => {
                debug!(url = %self.url, status = ?response.status(), "WebSocket handshake complete");
                Ok(Box::new(WsConnection { stream }))
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::ConnectionFailed(format!(
                "connect to {} timed out after {}s",
                self.url,
                self.connect_timeout.as_secs()
            ))),
        }
    }

    fn peer(&self) -> String {
        self.url.clone()
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, payload: &str) -> SyncResult<()> {
        self.stream.send(WsMessage::text(payload.to_owned())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> SyncResult<String> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                WsMessage::Text(text) => return Ok(text.as_str().to_owned()),
                WsMessage::Binary(data) => return Ok(String::from_utf8_lossy(&data).into_owned()),
                WsMessage::Ping(data) => self.stream.send(WsMessage::Pong(data)).await?,
                WsMessage::Pong(_) | WsMessage::Frame(_) => {}
                WsMessage::Close(frame) => {
                    debug!(?frame, "Peer closed the connection");
                    return Err(SyncError::Disconnected);
                }
            }
        }
        Err(SyncError::Disconnected)
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// In-process connector that calls a handler directly.
///
/// Used to wire both nodes together in one process without sockets.
pub struct LocalConnector<H: ?Sized> {
    handler: Arc<H>,
}

impl<H: RequestHandler + ?Sized> LocalConnector<H> {
    pub fn new(handler: Arc<H>) -> Self {
        LocalConnector { handler }
    }
}

#[async_trait]
impl<H: RequestHandler + ?Sized> Connector for LocalConnector<H> {
    async fn connect(&self) -> SyncResult<Box<dyn Connection>> {
        Ok(Box::new(LocalConnection {
            handler: self.handler.clone(),
            pending: None,
        }))
    }

    fn peer(&self) -> String {
        "local".to_string()
    }
}

struct LocalConnection<H: ?Sized> {
    handler: Arc<H>,
    pending: Option<String>,
}

#[async_trait]
impl<H: RequestHandler + ?Sized> Connection for LocalConnection<H> {
    async fn send(&mut self, payload: &str) -> SyncResult<()> {
        self.pending = Some(payload.to_owned());
        Ok(())
    }

    async fn recv(&mut self) -> SyncResult<String> {
        let request = self.pending.take().ok_or(SyncError::Disconnected)?;
        Ok(self.handler.handle(&request).await)
    }

    async fn close(&mut self) {
        self.pending = None;
    }
}

// =============================================================================
// Lazy Pirate Client
// =============================================================================

/// Request/reply client that survives a silent or misbehaving peer.
///
/// ## Usage
/// ```rust,ignore
/// let connector = Arc::new(WsConnector::new("ws://cloud:5555/sync", Duration::from_secs(10)));
/// let mut client = LazyPirateClient::new(connector, Duration::from_millis(2500), RetryPolicy::default());
///
/// client.send_and_await(&report, REPORT_ACK).await?;
/// ```
pub struct LazyPirateClient {
    connector: Arc<dyn Connector>,
    request_timeout: Duration,
    policy: RetryPolicy,
    connection: Option<Box<dyn Connection>>,
}

impl LazyPirateClient {
    pub fn new(connector: Arc<dyn Connector>, request_timeout: Duration, policy: RetryPolicy) -> Self {
        LazyPirateClient {
            connector,
            request_timeout,
            policy,
            connection: None,
        }
    }

    /// True while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Encodes `payload` once and sends it until the peer replies `expected_ack`.
    pub async fn send_and_await<T: Serialize + ?Sized>(
        &mut self,
        payload: &T,
        expected_ack: &str,
    ) -> SyncResult<()> {
        let encoded = protocol::to_json(payload)
            .map_err(|e| SyncError::SerializationFailed(e.to_string()))?;
        self.send_encoded(&encoded, expected_ack).await
    }

    /// Sends already encoded bytes with the lazy pirate loop.
    pub async fn send_encoded(&mut self, encoded: &str, expected_ack: &str) -> SyncResult<()> {
        let mut backoff = BackoffState::start(self.policy.backoff);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let err = match self.exchange(encoded, expected_ack).await {
                Ok(()) => {
                    info!(attempt, "Server replied OK");
                    return Ok(());
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            match &err {
                SyncError::Timeout(_) => warn!("No response from server"),
                SyncError::MalformedReply { expected, actual } => {
                    error!(%expected, %actual, "Malformed reply from server")
                }
                other => warn!(error = %other, "Exchange with server failed"),
            }
            self.drop_connection().await;

            if let Some(max) = self.policy.max_attempts {
                if attempt >= max {
                    return Err(SyncError::RetriesExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
            }

            match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                // A refused connect fails instantly; pace it like a lost reply.
                None if matches!(err, SyncError::ConnectionFailed(_)) => {
                    tokio::time::sleep(self.request_timeout).await
                }
                None => {}
            }

            info!(peer = %self.connector.peer(), attempt = attempt + 1, "Reconnecting to server…");
        }
    }

    /// One send plus one bounded wait for the reply.
    async fn exchange(&mut self, encoded: &str, expected_ack: &str) -> SyncResult<()> {
        let request_timeout = self.request_timeout;
        let connection = match &mut self.connection {
            Some(connection) => connection,
            slot => slot.insert(self.connector.connect().await?),
        };

        connection.send(encoded).await?;

        let reply = timeout(request_timeout, connection.recv())
            .await
            .map_err(|_| SyncError::Timeout(request_timeout.as_millis() as u64))??;

        if reply == expected_ack {
            Ok(())
        } else {
            Err(SyncError::MalformedReply {
                expected: expected_ack.to_string(),
                actual: reply,
            })
        }
    }

    async fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// What the scripted peer does with one request.
    #[derive(Clone)]
    enum Step {
        Silent,
        Reply(&'static str),
    }

    #[derive(Default)]
    struct Script {
        steps: Mutex<VecDeque<Step>>,
        received: Mutex<Vec<String>>,
        connects: Mutex<u32>,
    }

    struct ScriptedConnector(Arc<Script>);

    struct ScriptedConnection {
        script: Arc<Script>,
        next: Option<Step>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> SyncResult<Box<dyn Connection>> {
            *self.0.connects.lock().unwrap() += 1;
            Ok(Box::new(ScriptedConnection {
                script: self.0.clone(),
                next: None,
            }))
        }

        fn peer(&self) -> String {
            "scripted".into()
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn send(&mut self, payload: &str) -> SyncResult<()> {
            self.script.received.lock().unwrap().push(payload.to_owned());
            self.next = self.script.steps.lock().unwrap().pop_front();
            Ok(())
        }

        async fn recv(&mut self) -> SyncResult<String> {
            match self.next.take() {
                Some(Step::Reply(reply)) => Ok(reply.to_string()),
                Some(Step::Silent) | None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    fn client(script: &Arc<Script>, policy: RetryPolicy) -> LazyPirateClient {
        LazyPirateClient::new(
            Arc::new(ScriptedConnector(script.clone())),
            Duration::from_millis(2500),
            policy,
        )
    }

    fn script(steps: Vec<Step>) -> Arc<Script> {
        let script = Script::default();
        *script.steps.lock().unwrap() = steps.into();
        Arc::new(script)
    }

    #[derive(Serialize)]
    struct Payload {
        current_market_price: f64,
    }

    #[tokio::test(start_paused = true)]
    async fn test_resends_identical_bytes_after_timeouts() {
        let script = script(vec![Step::Silent, Step::Silent, Step::Reply("ok")]);
        let mut client = client(&script, RetryPolicy::default());

        client
            .send_and_await(&Payload { current_market_price: 0.41 }, "ok")
            .await
            .unwrap();

        let received = script.received.lock().unwrap();
        assert_eq!(received.len(), 3);
        assert!(received.iter().all(|p| p == &received[0]));
        assert_eq!(*script.connects.lock().unwrap(), 3);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_reply_is_retried() {
        let script = script(vec![Step::Reply("3"), Step::Reply("4")]);
        let mut client = client(&script, RetryPolicy::default());

        client.send_encoded("{}", "4").await.unwrap();

        assert_eq!(script.received.lock().unwrap().len(), 2);
        assert_eq!(*script.connects.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_policy_gives_up() {
        let script = script(vec![]);
        let policy = RetryPolicy {
            max_attempts: Some(3),
            backoff: BackoffSchedule::Fixed(Duration::from_millis(100)),
        };
        let mut client = client(&script, policy);

        let err = client.send_encoded("{}", "ok").await.unwrap_err();

        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(script.received.lock().unwrap().len(), 3);
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_is_reused_after_success() {
        let script = script(vec![Step::Reply("ok"), Step::Reply("ok")]);
        let mut client = client(&script, RetryPolicy::default());

        client.send_encoded("{\"a\":1}", "ok").await.unwrap();
        client.send_encoded("{\"a\":2}", "ok").await.unwrap();

        assert_eq!(*script.connects.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_unsized_payload() {
        let script = script(vec![Step::Reply("4")]);
        let mut client = client(&script, RetryPolicy::default());

        let decided: &[i64] = &[4, 7];
        client.send_and_await(decided, "4").await.unwrap();

        assert_eq!(script.received.lock().unwrap().as_slice(), ["[4,7]"]);
    }

    #[test]
    fn test_backoff_schedules() {
        let mut none = BackoffState::start(BackoffSchedule::None);
        assert_eq!(none.next_delay(), None);

        let mut fixed = BackoffState::start(BackoffSchedule::Fixed(Duration::from_millis(250)));
        assert_eq!(fixed.next_delay(), Some(Duration::from_millis(250)));
        assert_eq!(fixed.next_delay(), Some(Duration::from_millis(250)));

        let mut exp = BackoffState::start(BackoffSchedule::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        });
        for _ in 0..10 {
            let delay = exp.next_delay().unwrap();
            assert!(delay <= Duration::from_millis(1500));
        }
    }
}
