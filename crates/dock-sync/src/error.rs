//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  DeserializationFailed  │ │
//! │  │  InvalidUrl     │  │  Disconnected   │  │  SerializationFailed    │ │
//! │  │  ConfigLoad     │  │  Timeout        │  │                         │ │
//! │  │                 │  │  MalformedReply │  │                         │ │
//! │  │                 │  │  RetriesExhaust │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │    Database     │  │     Domain                                  │  │
//! │  │  DatabaseError  │  │  Core (invariant broken by a caller)        │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Timeouts and malformed replies never reach the orchestrator: the lazy
//! pirate client absorbs them by reconnecting and resending. They only
//! surface as `RetriesExhausted` when a bounded [`RetryPolicy`] runs out.
//!
//! [`RetryPolicy`]: crate::transport::RetryPolicy

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid peer URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer closed the connection.
    #[error("Disconnected from peer")]
    Disconnected,

    /// No reply within the request timeout.
    #[error("No reply within {0} ms")]
    Timeout(u64),

    /// Reply arrived but was not the expected acknowledgment.
    #[error("Malformed reply: expected {expected:?}, got {actual:?}")]
    MalformedReply { expected: String, actual: String },

    /// A bounded retry policy gave up.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Failed to serialize message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize message.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Database / Domain Errors
    // =========================================================================
    /// Database operation failed; the cycle's transaction was rolled back.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A domain invariant was violated.
    #[error("Domain error: {0}")]
    Core(#[from] dock_core::CoreError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal agent error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<dock_db::DbError> for SyncError {
    fn from(err: dock_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            SyncError::DeserializationFailed(err.to_string())
        } else {
            SyncError::SerializationFailed(err.to_string())
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the lazy pirate loop should reconnect and resend.
    ///
    /// ## Retryable Errors
    /// - Connection failures and disconnects
    /// - Timeouts
    /// - Malformed replies (treated as "no response")
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Serialization of our own payload
    /// - Database failures (the cycle is aborted instead)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::MalformedReply { .. }
                | SyncError::WebSocketError(_)
                | SyncError::TlsError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(SyncError::Timeout(2500).is_retryable());
        assert!(SyncError::MalformedReply {
            expected: "ok".into(),
            actual: "nope".into()
        }
        .is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::DatabaseError("locked".into()).is_retryable());
        assert!(!SyncError::RetriesExhausted {
            attempts: 3,
            last_error: "timeout".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_json_error_is_deserialization() {
        let err: SyncError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, SyncError::DeserializationFailed(_)));
    }
}
