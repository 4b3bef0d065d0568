//! Releasable handles for published results
//!
//! A published result is addressed through a handle, the analogue of a
//! temporary object URL. Handles are registered on creation and unregistered
//! when dropped, so every path that discards a result (replacement, failure,
//! reset, processor drop) releases it without an explicit revoke call.

use crate::types::EncodedImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Registry of live result handles
#[derive(Debug, Default)]
pub struct HandleRegistry {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, usize>>,
    released: AtomicU64,
}

impl HandleRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a payload and return the owning handle
    #[must_use]
    pub fn acquire(self: &Arc<Self>, image: EncodedImage) -> ResultHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, image.len());
        tracing::trace!(handle = id, bytes = image.len(), "Result handle acquired");

        ResultHandle {
            id,
            image,
            registry: Arc::clone(self),
        }
    }

    fn release(&self, id: u64) {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            self.released.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(handle = id, "Result handle released");
        }
    }

    /// Number of handles currently alive
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total bytes held by live handles
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    /// Number of handles released so far
    #[must_use]
    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

/// Owning handle to a published result; released on drop
#[derive(Debug)]
pub struct ResultHandle {
    id: u64,
    image: EncodedImage,
    registry: Arc<HandleRegistry>,
}

impl ResultHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Object-URL style address of this handle
    #[must_use]
    pub fn url(&self) -> String {
        format!("blob:imgralph/{}", self.id)
    }

    #[must_use]
    pub fn image(&self) -> &EncodedImage {
        &self.image
    }
}

impl Drop for ResultHandle {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

/// Install `next` in `slot`, releasing whatever was there
///
/// This is the single exit path for result replacement: success, empty crop,
/// failure and reset all go through it.
pub fn replace_result(slot: &mut Option<ResultHandle>, next: Option<ResultHandle>) {
    let previous = std::mem::replace(slot, next);
    drop(previous);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_drop() {
        let registry = HandleRegistry::new();
        let handle = registry.acquire(EncodedImage::png(vec![1, 2, 3]));
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.live_bytes(), 3);
        assert!(handle.url().starts_with("blob:imgralph/"));

        drop(handle);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.released_count(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = HandleRegistry::new();
        let a = registry.acquire(EncodedImage::png(vec![1]));
        let b = registry.acquire(EncodedImage::png(vec![2]));
        assert_ne!(a.id(), b.id());
        assert_ne!(a.url(), b.url());
    }

    #[test]
    fn test_replace_releases_previous() {
        let registry = HandleRegistry::new();
        let mut slot = Some(registry.acquire(EncodedImage::png(vec![0; 10])));

        replace_result(&mut slot, Some(registry.acquire(EncodedImage::png(vec![0; 4]))));
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.live_bytes(), 4);

        replace_result(&mut slot, None);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.released_count(), 2);
    }
}
