//! Transport layer for point-to-point clipboard synchronization
//!
//! This module provides the stream abstraction both peers talk over, the
//! length-prefixed framing used on top of it, and the connection manager
//! that owns a session's lifecycle.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

pub mod manager;
pub mod memory;
pub mod protocol;
pub mod stream;
pub mod tcp;

#[cfg(test)]
mod unit_tests;

pub use manager::{ConnectionManager, ConnectionStatus, Role, SendOutcome, SessionEvent};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use protocol::{decode_payload, encode_payload, WirePayload};
pub use stream::{Direction, FrameReader, FrameWriter, ProgressUpdate, DEFAULT_CHUNK_SIZE};
pub use tcp::TcpTransport;

/// 128-bit service identifier shared by both peers
pub type ServiceId = Uuid;

/// Service identifier both roles advertise and look up by default
pub const DEFAULT_SERVICE_ID: ServiceId = Uuid::from_u128(0xa7e2_7f52_290d_468f_9558_49f9_f130_b6e9);

/// Transport layer errors with user-friendly messages
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation invoked in the wrong role or state
    #[error("BS001: Configuration error: {message}")]
    Configuration { message: String },

    /// Dial, accept or pairing failure
    #[error("BS002: Connection failed: {message}. Check that the other device is in range and listening.")]
    Connection { message: String },

    /// No session is active
    #[error("BS003: Not connected to any device. Connect or wait for a peer before sending.")]
    NotConnected,

    /// Peer closed the stream
    #[error("BS004: Connection closed by the remote device.")]
    ConnectionClosed,

    /// IO error
    #[error("BS005: Link error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be decoded into clipboard content
    #[error("BS006: Data format error: {message}. The message was discarded.")]
    Protocol { message: String },

    /// Frame exceeds the configured maximum
    #[error("BS007: Frame of {size} bytes exceeds the limit of {max} bytes.")]
    FrameTooLarge { size: u64, max: usize },

    /// Content is empty and must not be transmitted
    #[error("BS008: Refusing to send empty {kind} content.")]
    InvalidContent { kind: String },

    /// Operation interrupted by a disconnect
    #[error("BS009: Operation cancelled by disconnect.")]
    Cancelled,

    /// Timeout error
    #[error("BS010: Operation timed out. Check that the other device is in range.")]
    Timeout,
}

impl TransportError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        TransportError::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn connection(message: impl Into<String>) -> Self {
        TransportError::Connection {
            message: message.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        TransportError::Configuration {
            message: message.into(),
        }
    }

    /// Whether the error invalidates the session it happened on.
    ///
    /// Decode errors only cost the offending frame; everything else means
    /// the byte stream can no longer be trusted.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, TransportError::Protocol { .. })
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::protocol(e.to_string())
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Ordered, reliable byte stream to a peer
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed peer stream as handed out by transports
pub type BoxedStream = Box<dyn PeerStream>;

/// A freshly established link
pub struct Connected {
    /// Byte stream to the peer
    pub stream: BoxedStream,
    /// Display name of the peer
    pub peer_name: String,
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("peer_name", &self.peer_name)
            .finish_non_exhaustive()
    }
}

/// Link factory: the platform stack behind both roles
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind and advertise under `service_id`
    async fn listen(&self, service_id: ServiceId) -> Result<Box<dyn Listener>>;

    /// Connect to the device at `address` offering `service_id`
    async fn dial(&self, address: &str, service_id: ServiceId) -> Result<Connected>;
}

/// Listener for accepting incoming links
#[async_trait]
pub trait Listener: Send {
    /// Accept the next incoming link
    async fn accept(&mut self) -> Result<Connected>;

    /// Address the listener is reachable at
    fn local_address(&self) -> String;
}

/// Connection state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing started yet
    Idle,

    /// Waiting for a peer to connect
    Listening,

    /// Dialing a peer
    Connecting,

    /// A session is active
    Connected,

    /// Torn down by `disconnect()` or by the link failing
    Disconnected,
}

impl ConnectionState {
    /// Whether a new listen/connect may start from this state
    pub fn can_start(self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Disconnected)
    }
}

/// Configuration for the transport layer
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Service identifier both peers use
    pub service_id: ServiceId,

    /// Chunk size for payload reads and writes (default: 64KB)
    pub chunk_size: usize,

    /// Largest frame accepted or sent
    pub max_frame_size: usize,

    /// Dial timeout
    pub connect_timeout: std::time::Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            service_id: DEFAULT_SERVICE_ID,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_frame_size: crate::MAX_FRAME_SIZE,
            connect_timeout: std::time::Duration::from_secs(30),
        }
    }
}
