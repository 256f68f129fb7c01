//! Invalidation of outstanding statements when a connection closes.
//!
//! A driver connection owns a [`StatementRegistry`]; every statement it
//! prepares holds the [`StatementHandle`] returned by
//! [`StatementRegistry::register`]. The registry keeps only weak references,
//! so statements never keep their connection (or each other) alive. Before
//! the native handle is destroyed the connection calls
//! [`StatementRegistry::notify_closing`], after which every handle reports
//! closed and statement operations fail with [`Error::StatementClosed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug)]
struct HandleState {
    open: AtomicBool,
}

/// Validity flag shared between a statement and its connection's registry.
#[derive(Debug, Clone)]
pub struct StatementHandle {
    state: Arc<HandleState>,
}

impl StatementHandle {
    /// Whether the statement may still be used.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }

    /// Mark the statement closed (explicit `close()` by its owner).
    pub fn close(&self) {
        self.state.open.store(false, Ordering::Release);
    }

    /// Fail with [`Error::StatementClosed`] unless the handle is open.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::StatementClosed)
        }
    }
}

/// Per-connection set of outstanding statements.
#[derive(Debug, Default)]
pub struct StatementRegistry {
    handles: Mutex<Vec<Weak<HandleState>>>,
}

impl StatementRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new statement and return its handle.
    pub fn register(&self) -> StatementHandle {
        let state = Arc::new(HandleState {
            open: AtomicBool::new(true),
        });
        let mut handles = self.handles.lock();
        handles.retain(|h| h.strong_count() > 0);
        handles.push(Arc::downgrade(&state));
        StatementHandle { state }
    }

    /// Invalidate every live statement. Returns how many were still open.
    pub fn notify_closing(&self) -> usize {
        let handles = std::mem::take(&mut *self.handles.lock());
        let mut invalidated = 0;
        for state in handles.iter().filter_map(Weak::upgrade) {
            if state.open.swap(false, Ordering::AcqRel) {
                invalidated += 1;
            }
        }
        if invalidated > 0 {
            tracing::debug!(invalidated, "invalidated statements of closing connection");
        }
        invalidated
    }

    /// Number of statements that are still open.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|s| s.open.load(Ordering::Acquire))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_invalidates_live_handles() {
        let registry = StatementRegistry::new();
        let a = registry.register();
        let b = registry.register();
        b.close();

        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.notify_closing(), 1);
        assert!(!a.is_open());
        assert!(matches!(a.ensure_open(), Err(Error::StatementClosed)));
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_dropped_statements_are_pruned() {
        let registry = StatementRegistry::new();
        drop(registry.register());
        drop(registry.register());
        let kept = registry.register();

        assert_eq!(registry.handles.lock().len(), 1);
        assert_eq!(registry.notify_closing(), 1);
        assert!(!kept.is_open());
    }
}
