//! Per-connection handshake and open-operation bookkeeping.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::errors::{ProtoError, Result};

/// Tracks whether the handshake completed and which ids are open.
///
/// Writes for an id run while the set is locked, so a `done` can never
/// overtake a result frame that already passed its open check.
#[derive(Debug, Default)]
pub(crate) struct Operations {
    initialized: AtomicBool,
    open: Mutex<HashSet<String>>,
}

impl Operations {
    pub(crate) fn ensure_uninitialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Err(ProtoError::AlreadyInitialized);
        }
        Ok(())
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(ProtoError::NotInitialized);
        }
        Ok(())
    }

    /// Mark `id` open. Returns `false` if it already was.
    pub(crate) fn open(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        self.open.lock().insert(id.to_owned())
    }

    /// Close `id` without writing anything. Returns `false` if it was not open.
    pub(crate) fn release(&self, id: &str) -> bool {
        self.open.lock().remove(id)
    }

    pub(crate) fn is_open(&self, id: &str) -> bool {
        self.open.lock().contains(id)
    }

    /// Run `write` if `id` is open.
    pub(crate) fn with_open<T>(&self, id: &str, write: impl FnOnce() -> Result<T>) -> Result<T> {
        let open = self.open.lock();
        if !open.contains(id) {
            return Err(ProtoError::UnknownOperation(id.to_owned()));
        }
        let result = write();
        drop(open);
        result
    }

    /// Close `id` and run `write`. The id is closed even if the write fails.
    pub(crate) fn finish<T>(&self, id: &str, write: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut open = self.open.lock();
        if !open.remove(id) {
            return Err(ProtoError::UnknownOperation(id.to_owned()));
        }
        let result = write();
        drop(open);
        result
    }

    pub(crate) fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.open.lock().iter().cloned().collect();
        ids.sort_unstable();
        ids
    }
}
