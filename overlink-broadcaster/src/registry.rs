use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, Span};
use uuid::Uuid;

use crate::transport::ConnectionHandle;

/// Opaque identifier of one registered console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh random (v4) id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a handle, independent of the vtable half of the pointer.
pub(crate) fn same_handle(a: &ConnectionHandle, b: &ConnectionHandle) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// Thread-safe store of live connections.
///
/// Callers never take a lock themselves; the internal lock is never held
/// across an await point or a transport call.
pub struct Registry {
    connections: RwLock<BTreeMap<ConnectionId, ConnectionHandle>>,
    span: Span,
}

impl Registry {
    pub fn new(span: Span) -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            span,
        }
    }

    /// Insert or replace the connection under `id`. Last writer wins.
    pub fn register(&self, id: ConnectionId, handle: ConnectionHandle) {
        let mut conns = self.connections.write();
        let replaced = conns.insert(id, handle).is_some();
        info!(
            parent: &self.span,
            conn_id = %id,
            replaced,
            total = conns.len(),
            "client registered"
        );
    }

    /// Remove `id` if present, handing its handle back to the caller.
    pub fn unregister(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let mut conns = self.connections.write();
        let removed = conns.remove(&id);
        if removed.is_some() {
            info!(parent: &self.span, conn_id = %id, total = conns.len(), "client unregistered");
        }
        removed
    }

    /// Remove `id` only while it still maps to `handle`.
    ///
    /// Returns `false` when the id is gone or was re-registered with a
    /// different handle in the meantime.
    pub(crate) fn remove_if_same(&self, id: ConnectionId, handle: &ConnectionHandle) -> bool {
        let mut conns = self.connections.write();
        match conns.get(&id) {
            Some(current) if same_handle(current, handle) => {
                let _ = conns.remove(&id);
                debug!(parent: &self.span, conn_id = %id, total = conns.len(), "dead client removed");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// Point-in-time copy of every registration, ordered by id.
    ///
    /// Later registrations are not observed; entries removed by other
    /// threads stay valid in the copy since handles are reference counted.
    pub fn snapshot(&self) -> Vec<(ConnectionId, ConnectionHandle)> {
        self.connections
            .read()
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Span::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::QueuedTransport;

    fn handle() -> ConnectionHandle {
        // The registry never looks at transport state
        let (transport, _frames) = QueuedTransport::channel(4);
        Arc::new(transport)
    }

    #[test]
    fn test_register_and_count() {
        let registry = Registry::default();
        assert_eq!(registry.count(), 0);

        let a = ConnectionId::random();
        let b = ConnectionId::random();
        registry.register(a, handle());
        registry.register(b, handle());
        assert_eq!(registry.count(), 2);
        assert!(registry.contains(a));
    }

    #[test]
    fn test_count_tracks_distinct_ids() {
        let registry = Registry::default();
        let ids: Vec<ConnectionId> = (0..5).map(|_| ConnectionId::random()).collect();

        // register all, re-register two, unregister one twice, unregister unknown
        for id in &ids {
            registry.register(*id, handle());
        }
        registry.register(ids[0], handle());
        registry.register(ids[3], handle());
        let _ = registry.unregister(ids[1]);
        let _ = registry.unregister(ids[1]);
        let _ = registry.unregister(ConnectionId::random());

        assert_eq!(registry.count(), 4);
    }

    #[test]
    fn test_last_writer_wins() {
        let registry = Registry::default();
        let id = ConnectionId::random();
        let first = handle();
        let second = handle();

        registry.register(id, Arc::clone(&first));
        registry.register(id, Arc::clone(&second));

        let current = registry.get(id).unwrap();
        assert!(same_handle(&current, &second));
        assert!(!same_handle(&current, &first));
    }

    #[test]
    fn test_unregister_returns_handle() {
        let registry = Registry::default();
        let id = ConnectionId::random();
        let h = handle();
        registry.register(id, Arc::clone(&h));

        let returned = registry.unregister(id).unwrap();
        assert!(same_handle(&returned, &h));
        assert!(registry.unregister(id).is_none());
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let registry = Registry::default();
        let a = ConnectionId::random();
        registry.register(a, handle());

        let snapshot = registry.snapshot();
        registry.register(ConnectionId::random(), handle());
        let _ = registry.unregister(a);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, a);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_remove_if_same_ignores_replacement() {
        let registry = Registry::default();
        let id = ConnectionId::random();
        let stale = handle();
        registry.register(id, Arc::clone(&stale));
        registry.register(id, handle());

        assert!(!registry.remove_if_same(id, &stale));
        assert!(registry.contains(id));

        let current = registry.get(id).unwrap();
        assert!(registry.remove_if_same(id, &current));
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let registry = Arc::new(Registry::default());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut kept = 0;
                    for i in 0..50 {
                        let id = ConnectionId::random();
                        registry.register(id, handle());
                        if i % 2 == 0 {
                            let _ = registry.unregister(id);
                        } else {
                            kept += 1;
                        }
                        let _ = registry.snapshot();
                    }
                    kept
                })
            })
            .collect();

        let kept: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(registry.count(), kept);
        assert_eq!(registry.snapshot().len(), kept);
    }
}
