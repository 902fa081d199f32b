//! SinkRegistry - per-stream table of session sinks
//!
//! Copy-on-write: dispatch takes an `Arc` snapshot under a brief read lock,
//! register/unregister swap in a modified copy under the write lock. A
//! snapshot is never torn and never blocks writers while it is iterated.

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{SessionId, StreamKind};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;

/// Immutable view of a registry at one instant
pub type SinkSnapshot<T> = Arc<HashMap<SessionId, Arc<SinkHandle<T>>>>;

pub struct SinkRegistry<T> {
    kind: StreamKind,
    sinks: RwLock<SinkSnapshot<T>>,
}

impl<T> SinkRegistry<T> {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            sinks: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Add a sink under `session_id`
    pub fn register(
        &self,
        session_id: SessionId,
        handle: SinkHandle<T>,
    ) -> Result<Arc<SinkHandle<T>>, DispatcherError> {
        let handle = Arc::new(handle);
        {
            let mut sinks = self.sinks.write();
            if sinks.contains_key(&session_id) {
                handle.close();
                return Err(DispatcherError::AlreadyRegistered {
                    kind: self.kind,
                    session_id,
                });
            }
            Arc::make_mut(&mut *sinks).insert(session_id.clone(), Arc::clone(&handle));
        }
        debug!(kind = %self.kind, session_id = %session_id, sinks = self.len(), "sink registered");
        Ok(handle)
    }

    /// Remove and close the sink for `session_id`
    ///
    /// Idempotent: returns false if nothing was registered under that id.
    /// Items already queued are still delivered.
    pub fn unregister(&self, session_id: &str) -> bool {
        let removed = {
            let mut sinks = self.sinks.write();
            if !sinks.contains_key(session_id) {
                return false;
            }
            Arc::make_mut(&mut *sinks).remove(session_id)
        };
        match removed {
            Some(handle) => {
                handle.close();
                info!(kind = %self.kind, session_id, "sink unregistered");
                true
            }
            None => false,
        }
    }

    /// Current sink set
    pub fn snapshot(&self) -> SinkSnapshot<T> {
        Arc::clone(&self.sinks.read())
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SinkHandle<T>>> {
        self.sinks.read().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sinks.read().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    /// Remove every sink and wait for each worker to drain
    pub async fn shutdown_all(&self) {
        let drained = std::mem::take(&mut *self.sinks.write());
        info!(kind = %self.kind, sinks = drained.len(), "shutting down all sinks");
        for handle in drained.values() {
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::LogSink;
    use contracts::{DropPolicy, Event};

    fn log_handle(name: &str) -> SinkHandle<Event> {
        SinkHandle::spawn(LogSink::new(name), 4, DropPolicy::DropOldest)
    }

    #[tokio::test]
    async fn test_register_and_snapshot_isolation() {
        let registry = SinkRegistry::new(StreamKind::Event);
        registry.register(SessionId::new("a"), log_handle("a")).unwrap();

        let before = registry.snapshot();
        registry.register(SessionId::new("b"), log_handle("b")).unwrap();

        // Old snapshot is unaffected by the later insert
        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
        registry.shutdown_all().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = SinkRegistry::new(StreamKind::Event);
        registry.register(SessionId::new("a"), log_handle("a")).unwrap();
        let err = registry
            .register(SessionId::new("a"), log_handle("a2"))
            .unwrap_err();
        assert!(matches!(err, DispatcherError::AlreadyRegistered { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = SinkRegistry::new(StreamKind::Event);
        let handle = registry.register(SessionId::new("a"), log_handle("a")).unwrap();

        assert!(registry.unregister("a"));
        assert!(handle.is_closed());
        assert!(!registry.unregister("a"));
        assert!(!registry.unregister("never-registered"));
        assert_eq!(registry.len(), 0);
    }
}
