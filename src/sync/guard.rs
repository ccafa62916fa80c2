//! Echo suppression
//!
//! While remote content is being written to the local clipboard, the
//! change detector must not pick that write up as a local change. The
//! suppression is scoped: it ends when the [`ApplyGuard`] is dropped,
//! whichever way the apply finishes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared suppression flag
#[derive(Debug, Clone, Default)]
pub struct EchoSuppressor {
    active: Arc<AtomicUsize>,
}

impl EchoSuppressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress change detection until the returned guard is dropped
    pub fn engage(&self) -> ApplyGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ApplyGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }
}

/// Keeps suppression engaged while alive
#[must_use = "suppression ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ApplyGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ApplyGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_scopes_suppression() {
        let suppressor = EchoSuppressor::new();
        assert!(!suppressor.is_active());

        {
            let _guard = suppressor.engage();
            assert!(suppressor.is_active());
        }
        assert!(!suppressor.is_active());
    }

    #[test]
    fn test_nested_guards() {
        let suppressor = EchoSuppressor::new();
        let outer = suppressor.engage();
        let inner = suppressor.clone().engage();

        drop(outer);
        assert!(suppressor.is_active());
        drop(inner);
        assert!(!suppressor.is_active());
    }

    #[test]
    fn test_released_on_unwind() {
        let suppressor = EchoSuppressor::new();
        let cloned = suppressor.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.engage();
            panic!("apply failed");
        });

        assert!(result.is_err());
        assert!(!suppressor.is_active());
    }
}
