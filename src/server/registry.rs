use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tokio::sync::Notify;

/// The server's view of one client connection.
///
/// The connection owns the strong reference; the registry only holds a
/// weak one, so a finished connection disappears from it on its own.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Cell<u64>,
    description: RefCell<String>,
    closed: Cell<bool>,
    notify: Notify,
}

impl ConnectionHandle {
    pub fn new(id: u64, description: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            id: Cell::new(id),
            description: RefCell::new(description.into()),
            closed: Cell::new(false),
            notify: Notify::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id.get()
    }

    pub fn set_id(&self, id: u64) {
        self.id.set(id);
    }

    pub fn description(&self) -> String {
        self.description.borrow().clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        *self.description.borrow_mut() = description.into();
    }

    /// Marks the connection closed and wakes whoever waits on
    /// [`ConnectionHandle::closed`].
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.closed.get() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RefCell<Vec<Weak<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: &Rc<ConnectionHandle>) {
        let mut connections = self.connections.borrow_mut();
        connections.retain(|weak| weak.strong_count() > 0);
        connections.push(Rc::downgrade(handle));
    }

    /// Live, still-open connections, oldest first.
    pub fn active(&self) -> Vec<Rc<ConnectionHandle>> {
        let mut connections = self.connections.borrow_mut();
        connections.retain(|weak| weak.strong_count() > 0);
        connections
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|handle| !handle.is_closed())
            .collect()
    }

    pub fn close_all(&self) {
        for handle in self.active() {
            tracing::debug!(conn = handle.id(), "closing connection");
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_connections_leave_the_registry() {
        let registry = ConnectionRegistry::new();
        let a = ConnectionHandle::new(1, "a");
        let b = ConnectionHandle::new(2, "b");
        registry.register(&a);
        registry.register(&b);
        assert_eq!(registry.active().len(), 2);

        drop(a);
        let ids: Vec<u64> = registry.active().iter().map(|h| h.id()).collect();
        assert_eq!(ids, vec![2]);

        b.close();
        assert!(registry.active().is_empty());
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let handle = ConnectionHandle::new(7, "x");
        let waiter = Rc::clone(&handle);
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let wait = tokio::task::spawn_local(async move { waiter.closed().await });
                tokio::task::yield_now().await;
                handle.close();
                wait.await.unwrap();
            })
            .await;
    }
}
