//! Identity-keyed session registry.
//!
//! Maps each caller identity to at most one live [`SessionClient`]. Creation
//! is lazy and cheap — the transport connect happens later under the client's
//! own lock — so the table lock is only ever held for the check-and-insert
//! step and never across I/O. Unrelated identities' sends are never
//! serialized against each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::client::{SessionClient, SessionId, TerminateHook};
use crate::config::ConnectionDetails;
use crate::transport::Transport;

struct RegistryInner<T: Transport> {
    clients: Mutex<HashMap<String, Arc<SessionClient<T>>>>,
}

/// The identity → session mapping; the only shared mutable state.
pub struct SessionRegistry<T: Transport> {
    transport: Arc<T>,
    inner: Arc<RegistryInner<T>>,
}

impl<T: Transport> std::fmt::Debug for SessionRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SessionRegistry<T> {
    /// Create an empty registry backed by the given transport.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            inner: Arc::new(RegistryInner {
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve the live client for `details.identity`, creating one if none
    /// exists.
    ///
    /// At most one client per identity: the check-and-insert is atomic under
    /// the table lock, so two concurrent calls for the same identity resolve
    /// to the same instance and at most one transport connect ever happens.
    /// A released entry (closed explicitly or torn down after the remote end
    /// hung up) is replaced with a fresh client.
    #[must_use]
    pub fn get_or_create(&self, details: ConnectionDetails) -> Arc<SessionClient<T>> {
        let mut clients = self
            .inner
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(existing) = clients.get(details.identity.as_str()) {
            if existing.is_released() {
                tracing::debug!(
                    user = %details.identity,
                    id = %existing.id(),
                    "replacing released session entry"
                );
            } else {
                return Arc::clone(existing);
            }
        }

        let id = SessionId::new();
        let identity = details.identity.clone();
        let client = Arc::new(SessionClient::new(
            id,
            details,
            Arc::clone(&self.transport),
            self.terminate_hook(&identity, id),
        ));
        clients.insert(identity, Arc::clone(&client));
        client
    }

    /// Release the session for `identity`, if any.
    ///
    /// Idempotent: releasing an absent identity is a no-op. Returns whether a
    /// session was actually released.
    pub async fn release(&self, identity: &str) -> bool {
        let removed = self
            .inner
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(identity);

        match removed {
            Some(client) => {
                tracing::debug!(user = %identity, id = %client.id(), "releasing session");
                client.close().await;
                true
            }
            None => {
                tracing::debug!(user = %identity, "release of unknown identity, nothing to do");
                false
            }
        }
    }

    /// Release every tracked session.
    ///
    /// The table is drained atomically, so a concurrent `get_or_create`
    /// cannot resurrect a drained entry — it creates a brand-new session
    /// against the emptied registry.
    pub async fn release_all(&self) {
        let drained: Vec<(String, Arc<SessionClient<T>>)> = {
            let mut clients = self
                .inner
                .clients
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            clients.drain().collect()
        };

        let count = drained.len();
        for (identity, client) in drained {
            tracing::debug!(user = %identity, id = %client.id(), "releasing session");
            client.close().await;
        }
        tracing::info!(released = count, "released all sessions");
    }

    /// Remove `identity`'s entry only if it is this exact instance.
    ///
    /// Used by the send path's self-healing: a failed client is evicted
    /// without touching a newer session that may already have replaced it.
    /// The caller closes the evicted client.
    pub(crate) fn evict(&self, identity: &str, id: SessionId) -> bool {
        let mut clients = self
            .inner
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match clients.get(identity) {
            Some(client) if client.id() == id => {
                clients.remove(identity);
                true
            }
            _ => false,
        }
    }

    /// Number of tracked sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether an identity has a tracked session.
    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.inner
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(identity)
    }

    /// Build the hook a client's producer loop invokes when the remote end
    /// hangs up: evict that exact client instance and close it.
    ///
    /// The instance id comparison ensures a stale teardown never evicts a
    /// newer session registered under the same identity.
    fn terminate_hook(&self, identity: &str, id: SessionId) -> TerminateHook {
        let inner: Weak<RegistryInner<T>> = Arc::downgrade(&self.inner);
        let identity = identity.to_string();

        Arc::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };

            let removed = {
                let mut clients = inner
                    .clients
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                match clients.get(&identity) {
                    Some(client) if client.id() == id => clients.remove(&identity),
                    _ => None,
                }
            };

            if let Some(client) = removed {
                tracing::debug!(
                    user = %identity,
                    id = %id,
                    "stream terminated, evicting dead session"
                );
                tokio::spawn(async move { client.close().await });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::MuxConfig;
    use crate::mock::MockTransport;
    use crate::sink::CallbackSink;

    fn details(identity: &str) -> ConnectionDetails {
        let sink: Arc<dyn CallbackSink> = Arc::new(|_: String, _: &str| {});
        ConnectionDetails::new(&MuxConfig::new("mock-host"), sink, identity, identity, "pw")
    }

    #[tokio::test]
    async fn same_identity_resolves_to_same_client() {
        let registry = SessionRegistry::new(MockTransport::new());
        let a = registry.get_or_create(details("alice"));
        let b = registry.get_or_create(details("alice"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn distinct_identities_get_distinct_clients() {
        let registry = SessionRegistry::new(MockTransport::new());
        let alice = registry.get_or_create(details("alice"));
        let bob = registry.get_or_create(details("bob"));
        assert!(!Arc::ptr_eq(&alice, &bob));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn release_absent_identity_is_noop() {
        let registry = SessionRegistry::new(MockTransport::new());
        assert!(!registry.release("ghost").await);
    }

    #[tokio::test]
    async fn release_closes_and_removes() {
        let transport = MockTransport::new();
        let registry = SessionRegistry::new(transport.clone());
        let client = registry.get_or_create(details("alice"));
        client.open().await.unwrap();

        assert!(registry.release("alice").await);
        assert!(!registry.contains("alice"));
        assert!(client.is_released());
    }

    #[tokio::test]
    async fn released_entry_is_replaced() {
        let transport = MockTransport::new();
        let registry = SessionRegistry::new(transport.clone());
        let first = registry.get_or_create(details("alice"));
        first.open().await.unwrap();
        first.close().await;

        // Entry still present but released; the next lookup swaps it out.
        let second = registry.get_or_create(details("alice"));
        assert!(!Arc::ptr_eq(&first, &second));
        second.open().await.unwrap();
        assert_eq!(transport.connects_for("alice"), 2);
        registry.release_all().await;
    }

    #[tokio::test]
    async fn release_all_empties_registry() {
        let transport = MockTransport::new();
        let registry = SessionRegistry::new(transport.clone());
        for identity in ["alice", "bob", "carol"] {
            let client = registry.get_or_create(details(identity));
            client.open().await.unwrap();
        }
        assert_eq!(registry.len(), 3);

        registry.release_all().await;
        assert!(registry.is_empty());

        // The registry keeps working against an empty table.
        let client = registry.get_or_create(details("alice"));
        client.open().await.unwrap();
        assert_eq!(transport.connects_for("alice"), 2);
        registry.release_all().await;
    }

    #[tokio::test]
    async fn dead_session_is_evicted() {
        let transport = MockTransport::new();
        let registry = SessionRegistry::new(transport.clone());
        let client = registry.get_or_create(details("alice"));
        client.open().await.unwrap();
        assert!(registry.contains("alice"));

        transport.stream("alice").unwrap().close_remote();

        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.contains("alice") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("dead session should be evicted from the registry");
    }

    #[tokio::test]
    async fn concurrent_lookups_create_one_client() {
        let registry = Arc::new(SessionRegistry::new(MockTransport::new()));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.get_or_create(details("alice")).id()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(registry.len(), 1);
    }
}
