//! Stream registry: ID allocation plus the live handle table (§4.A, §4.C).
//!
//! Allocation and registration happen under one lock so that a freshly
//! allocated ID can never collide with a concurrently allocated one — the
//! generator's collision predicate is the registry's own membership check.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::stream::StreamHandle;
use crate::stream_id::{Role, StreamId, StreamIdGenerator};

struct Inner {
    generator: StreamIdGenerator,
    streams: HashMap<StreamId, Arc<StreamHandle>>,
}

/// Shared table of in-flight streams, keyed by stream ID.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(role: Role) -> Self {
        Self {
            inner: Mutex::new(Inner {
                generator: StreamIdGenerator::new(role),
                streams: HashMap::new(),
            }),
        }
    }

    /// Allocate a fresh stream ID without registering a handle for it (used
    /// by fire-and-forget, which has no inbound state to track).
    pub fn allocate_id(&self) -> Result<StreamId> {
        let mut inner = self.inner.lock();
        inner.generator.next_id(|_| false)
    }

    /// Allocate a stream ID and register `build`'s handle for it atomically.
    /// `build` receives the allocated ID so it can construct the handle
    /// with it baked in.
    pub fn register_new(
        &self,
        build: impl FnOnce(StreamId) -> Arc<StreamHandle>,
    ) -> Result<Arc<StreamHandle>> {
        let mut inner = self.inner.lock();
        let id = inner.generator.next_id(|id| inner.streams.contains_key(&id))?;
        let handle = build(id);
        inner.streams.insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn lookup(&self, id: StreamId) -> Option<Arc<StreamHandle>> {
        self.inner.lock().streams.get(&id).cloned()
    }

    pub fn remove(&self, id: StreamId) -> Option<Arc<StreamHandle>> {
        self.inner.lock().streams.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every currently-registered handle, for connection-wide
    /// teardown (a stream-0 ERROR closes every open stream with
    /// CONNECTION_ERROR/CONNECTION_CLOSE).
    pub fn all(&self) -> Vec<Arc<StreamHandle>> {
        self.inner.lock().streams.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::payload::StreamResult;
    use crate::sender::FrameSender;
    use crate::stream::StreamKind;
    use tokio::sync::mpsc;

    fn dummy_handle(id: StreamId) -> Arc<StreamHandle> {
        let (sender, _rx) = FrameSender::new(4);
        let (tx, _rx2) = mpsc::channel::<StreamResult>(4);
        Arc::new(StreamHandle::new(id, StreamKind::Response, tx, sender, 0))
    }

    #[test]
    fn allocation_is_collision_free_under_concurrent_registration() {
        let registry = Registry::new(Role::Client);
        let a = registry.register_new(dummy_handle).unwrap();
        let b = registry.register_new(dummy_handle).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_returns_registry_to_baseline() {
        let registry = Registry::new(Role::Client);
        let handle = registry.register_new(dummy_handle).unwrap();
        assert_eq!(registry.len(), 1);
        let removed = registry.remove(handle.id());
        assert!(removed.is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn lookup_of_unknown_id_is_none() {
        let registry = Registry::new(Role::Client);
        assert!(registry.lookup(999).is_none());
    }

    #[test]
    fn frame_enqueue_still_works_through_a_registered_handle() {
        let registry = Registry::new(Role::Client);
        let handle = registry.register_new(dummy_handle).unwrap();
        let found = registry.lookup(handle.id()).unwrap();
        assert_eq!(found.id(), handle.id());
        let _ = Frame::Cancel { stream_id: handle.id() };
    }
}
