//! # BlueSync
//!
//! Point-to-point clipboard synchronization between two devices.
//!
//! One device listens, the other connects; from then on text and images
//! copied on either side appear on the other. Content travels as
//! length-prefixed frames over a reliable byte stream, and each side keeps
//! the identity hash of what it last saw so a change is never echoed back.

pub mod cli;
pub mod clipboard;
pub mod config;
pub mod discovery;
pub mod progress;
pub mod settings;
pub mod sync;
pub mod transport;

pub use clipboard::{ClipboardContent, ClipboardProvider, ContentKind};
pub use config::Config;
pub use sync::{ContentSink, SyncLoop};
pub use transport::{ConnectionManager, ConnectionStatus, Role, SessionEvent};

/// Result type alias for BlueSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for BlueSync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    /// Discovery or pairing error
    #[error("Discovery error: {0}")]
    Discovery(#[from] discovery::DiscoveryError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest frame payload accepted by default (50MB)
pub const MAX_FRAME_SIZE: usize = 50 * 1024 * 1024;
