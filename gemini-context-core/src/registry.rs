//! Ledger of remote handles that exist and have not been passed to `delete`.
//!
//! A handle is registered the moment `store` succeeds and leaves the registry
//! exactly once: either when a worker deletes it inline (rejected or failed
//! file) or when the final cleanup drains everything that is left. Because the
//! registry lives outside the worker futures, dropping those futures midway
//! (an interrupt, an error further up) still leaves every live handle here for
//! cleanup to find.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::contract::Handle;

#[derive(Debug, Default)]
pub struct HandleRegistry {
    live: Mutex<Vec<Handle>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly stored handle.
    pub fn register(&self, handle: Handle) {
        debug!(handle = %handle.id, "Registered remote handle");
        self.lock().push(handle);
    }

    /// Take `handle` out of the registry after it has been passed to `delete`.
    /// Returns false if it was not registered (already released or drained).
    pub fn release(&self, handle: &Handle) -> bool {
        let mut live = self.lock();
        match live.iter().position(|h| h.id == handle.id) {
            Some(index) => {
                live.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove and return every handle still registered.
    pub fn drain(&self) -> Vec<Handle> {
        std::mem::take(&mut *self.lock())
    }

    pub fn snapshot(&self) -> Vec<Handle> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Handle>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HandleRegistry {
    fn drop(&mut self) {
        let live = self.live.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !live.is_empty() {
            let ids: Vec<&str> = live.iter().map(|h| h.id.as_str()).collect();
            error!(count = live.len(), handles = ?ids, "Handle registry dropped with undeleted remote files");
        }
    }
}
