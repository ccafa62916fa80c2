//! In-memory clipboard
//!
//! Stands in for the operating system clipboard in simulations and tests.
//! Writes are counted so callers can assert how often remote content was
//! applied.

use super::{ClipboardContent, ClipboardError, ClipboardProvider};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Process-local clipboard
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    content: Mutex<Option<ClipboardContent>>,
    writes: AtomicUsize,
    deny_access: AtomicBool,
}

impl MemoryClipboard {
    /// Create an empty clipboard
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clipboard already holding `content`
    pub fn with_content(content: ClipboardContent) -> Self {
        Self {
            content: Mutex::new(Some(content)),
            ..Self::default()
        }
    }

    /// Simulate a local user copy. Not counted as a write.
    pub fn set(&self, content: ClipboardContent) {
        *self.lock() = Some(content);
    }

    /// Current content
    pub fn get(&self) -> Option<ClipboardContent> {
        self.lock().clone()
    }

    /// Number of writes performed through [`ClipboardProvider::write`]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every read and write fail, as an environment denying access would
    pub fn deny_access(&self, deny: bool) {
        self.deny_access.store(deny, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ClipboardContent>> {
        // A poisoned lock only means a panicking test thread held it.
        self.content
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_access(&self) -> Result<(), ClipboardError> {
        if self.deny_access.load(Ordering::SeqCst) {
            return Err(ClipboardError::Platform("clipboard access denied".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClipboardProvider for MemoryClipboard {
    async fn read_current(&self) -> Result<Option<ClipboardContent>, ClipboardError> {
        self.check_access()?;
        Ok(self.get())
    }

    async fn write(&self, content: &ClipboardContent) -> Result<(), ClipboardError> {
        self.check_access()?;
        self.set(content.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
