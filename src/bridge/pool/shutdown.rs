//! Shutdown coordination for the connection registry.
//!
//! `remove_all` removes connections one by one. `remove_all_with_timeout`
//! tears them down in parallel under one global ceiling and force-closes
//! whatever is still draining when it expires.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use super::{ConnectionHandle, ConnectionState, Registry, ShutdownTimeout};

impl Registry {
    /// Drains a JoinSet, logging any task panics with the provided context.
    async fn drain_join_set(join_set: &mut JoinSet<()>, task_context: &str) {
        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    log::error!(target: "conjure::bridge", "{} panicked: {}", task_context, e);
                }
            }
        }
    }

    /// Remove every connection, one at a time. Each removal blocks until the
    /// connection's tasks have exited.
    pub async fn remove_all(&self) {
        for tag in self.tags() {
            self.remove(&tag).await;
        }
    }

    /// Remove every connection in parallel, bounded by `timeout`.
    ///
    /// The registry is emptied up front. Connections that have not finished
    /// draining when the timeout expires have their tasks aborted and are
    /// marked `Closed`.
    pub async fn remove_all_with_timeout(&self, timeout: ShutdownTimeout) {
        let taken = self.inner.connections.swap(Arc::new(HashMap::new()));
        if taken.is_empty() {
            return;
        }
        let handles: Vec<Arc<ConnectionHandle>> = taken.values().cloned().collect();

        let mut join_set = JoinSet::new();
        for handle in &handles {
            let handle = Arc::clone(handle);
            join_set.spawn(async move {
                handle.teardown().await;
                log::info!(target: "conjure::bridge", "[{}] Disconnected", handle.tag());
            });
        }

        let graceful = tokio::time::timeout(
            timeout.as_duration(),
            Self::drain_join_set(&mut join_set, "Connection teardown"),
        )
        .await;

        if graceful.is_err() {
            let stuck: Vec<&str> = handles
                .iter()
                .filter(|handle| handle.state() != ConnectionState::Closed)
                .map(|handle| handle.tag())
                .collect();
            log::warn!(
                target: "conjure::bridge",
                "Shutdown timed out after {:?}, force-closing: {}",
                timeout.as_duration(),
                stuck.join(", ")
            );
            for handle in &handles {
                handle.force_close();
            }
            // Aborted tasks join promptly, letting the teardowns finish.
            Self::drain_join_set(&mut join_set, "Connection teardown").await;
        }
    }
}
