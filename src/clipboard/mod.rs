//! Clipboard abstraction layer
//!
//! The synchronization loop only talks to the local clipboard through the
//! [`ClipboardProvider`] trait. Two providers ship with the crate: the system
//! clipboard (backed by `arboard`) and an in-memory clipboard used for
//! simulations and tests.

use async_trait::async_trait;
use thiserror::Error;

pub mod content;
pub mod memory;
pub mod system;

pub use content::{ClipboardContent, ContentKind};
pub use memory::MemoryClipboard;
pub use system::SystemClipboard;

/// Local clipboard access
#[async_trait]
pub trait ClipboardProvider: Send + Sync {
    /// Read the current clipboard content, `None` when it holds nothing we
    /// can represent
    async fn read_current(&self) -> Result<Option<ClipboardContent>, ClipboardError>;

    /// Replace the clipboard content
    async fn write(&self, content: &ClipboardContent) -> Result<(), ClipboardError>;

    /// Get provider name
    fn name(&self) -> &str;
}

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform-specific error
    #[error("Platform error: {0}")]
    Platform(String),

    /// Unsupported content type
    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    /// Image could not be converted between PNG and raw pixels
    #[error("Image conversion failed: {0}")]
    Image(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
