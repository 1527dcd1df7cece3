//! Connection registry.
//!
//! Process-wide map from tag to live connection, stored as an `ArcSwap`
//! snapshot. Readers (`lookup`, `matching`, `status`) never block; writers
//! replace the whole map with `rcu`. Mutation per tag is remove-before-add:
//! `add` tears down any previous connection under the same tag before opening
//! the new one.

mod connect_spec;
mod connection_handle;
mod connection_state;
mod shutdown;
mod timeouts;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use ulid::Ulid;

pub use connect_spec::{ConnectSpec, ConnectionInfo, DEFAULT_HOST};
pub use connection_handle::ConnectionHandle;
pub use connection_state::ConnectionState;
pub use timeouts::{InitTimeout, ShutdownTimeout};

use super::actor::{DisconnectHook, WriteFailureHook};
use super::connection::open_stream;
use crate::error::{ReplError, ReplResult};
use crate::protocol::CodeGenerator;
use crate::render::OutputRenderer;

type ConnectionMap = HashMap<String, Arc<ConnectionHandle>>;

/// Registry of named connections. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    connections: ArcSwap<ConnectionMap>,
    code: Arc<dyn CodeGenerator>,
    renderer: Arc<dyn OutputRenderer>,
    init_timeout: InitTimeout,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("connections", &self.tags())
            .field("init_timeout", &self.inner.init_timeout)
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(code: Arc<dyn CodeGenerator>, renderer: Arc<dyn OutputRenderer>) -> Self {
        Self::with_init_timeout(code, renderer, InitTimeout::default())
    }

    pub fn with_init_timeout(
        code: Arc<dyn CodeGenerator>,
        renderer: Arc<dyn OutputRenderer>,
        init_timeout: InitTimeout,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: ArcSwap::from_pointee(HashMap::new()),
                code,
                renderer,
                init_timeout,
            }),
        }
    }

    pub fn code(&self) -> &Arc<dyn CodeGenerator> {
        &self.inner.code
    }

    pub fn renderer(&self) -> &Arc<dyn OutputRenderer> {
        &self.inner.renderer
    }

    /// Connect to a prepl over TCP and register it under `spec.tag`.
    ///
    /// Any connection already registered under the tag is removed first. The
    /// connect and the prelude exchange are bounded by the init timeout.
    pub async fn add(&self, spec: &ConnectSpec) -> ReplResult<Arc<ConnectionHandle>> {
        let info = spec.resolve()?;
        self.remove(&info.tag).await;

        let limit = self.inner.init_timeout.as_duration();
        let stream = tokio::time::timeout(limit, open_stream(&info.tag, &info.host, info.port))
            .await
            .map_err(|_| ReplError::timeout(&info.tag, limit))??;
        self.add_stream(info, stream).await
    }

    /// Register a connection over an already open stream.
    ///
    /// Spawns the pump, sends the prelude and waits for its reply, stores the
    /// connection, then starts the router and marks it `Live`.
    pub async fn add_stream<S>(
        &self,
        info: ConnectionInfo,
        stream: S,
    ) -> ReplResult<Arc<ConnectionHandle>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.remove(&info.tag).await;

        let handle = Arc::new(ConnectionHandle::new(info));
        let tag = handle.tag().to_string();
        handle
            .start_pump(
                stream,
                self.disconnect_hook(&tag, handle.id()),
                self.write_failure_hook(&tag, handle.id()),
            )
            .await;

        info!(target: "conjure::bridge", "[{}] Loading conjure.repl...", tag);
        let limit = self.inner.init_timeout.as_duration();
        let prelude = self.inner.code.prelude(handle.info().variant);
        let init = match tokio::time::timeout(limit, handle.initialize(prelude)).await {
            Ok(result) => result,
            Err(_) => Err(ReplError::timeout(&tag, limit)),
        };
        if let Err(e) = init {
            warn!(target: "conjure::bridge", "[{}] Connection setup failed: {}", tag, e);
            handle.force_close();
            handle.teardown().await;
            return Err(e);
        }

        if let Some(replaced) = self.insert(Arc::clone(&handle)) {
            // A concurrent add for the same tag won the race to the map.
            warn!(
                target: "conjure::bridge",
                "[{}] Replacing connection added concurrently",
                tag
            );
            replaced.teardown().await;
        }
        handle
            .start_router(Arc::clone(&self.inner.code), Arc::clone(&self.inner.renderer))
            .await;
        handle.advance(ConnectionState::Live);

        // The pump may have stopped before the entry existed, in which case
        // its hooks found nothing to remove.
        if handle.is_drained() {
            self.force_remove(&tag, handle.id()).await;
            return Err(ReplError::closed(tag));
        }

        info!(target: "conjure::bridge", "{}", handle.info());
        Ok(handle)
    }

    /// Remove and tear down the connection under `tag`.
    ///
    /// Returns once every task of the connection has exited. Returns `false`
    /// when nothing was registered under the tag.
    pub async fn remove(&self, tag: &str) -> bool {
        self.remove_matching(tag, None).await
    }

    /// Remove `tag` only if it still refers to connection `id`.
    ///
    /// Used by the reader's disconnect hook, which must not tear down a newer
    /// connection registered under the same tag.
    pub(crate) async fn remove_if_current(&self, tag: &str, id: Ulid) -> bool {
        self.remove_matching(tag, Some(id)).await
    }

    async fn remove_matching(&self, tag: &str, id: Option<Ulid>) -> bool {
        let Some(handle) = self.take_entry(tag, id) else {
            return false;
        };
        debug!(target: "conjure::bridge", "[{}] Removing connection {}", tag, handle.id());
        handle.teardown().await;
        info!(target: "conjure::bridge", "[{}] Disconnected", tag);
        true
    }

    /// Remove connection `id` without waiting for the remote to hang up.
    ///
    /// For connections whose stream can no longer be written: the quit
    /// directive would never arrive, so a graceful teardown could wait forever.
    async fn force_remove(&self, tag: &str, id: Ulid) -> bool {
        let Some(handle) = self.take_entry(tag, Some(id)) else {
            return false;
        };
        handle.force_close();
        handle.teardown().await;
        warn!(target: "conjure::bridge", "[{}] Connection lost", tag);
        true
    }

    /// Atomically remove the entry for `tag` (if its id matches) and return it.
    fn take_entry(&self, tag: &str, id: Option<Ulid>) -> Option<Arc<ConnectionHandle>> {
        let is_target =
            |handle: &Arc<ConnectionHandle>| id.is_none_or(|id| handle.id() == id);
        if !self.inner.connections.load().get(tag).is_some_and(|h| is_target(h)) {
            return None;
        }

        let mut removed = None;
        self.inner.connections.rcu(|current| {
            let mut next = ConnectionMap::clone(current);
            let hit = next.get(tag).is_some_and(|h| is_target(h));
            removed = if hit { next.remove(tag) } else { None };
            next
        });
        removed
    }

    /// Store `handle`, returning whatever it replaced.
    fn insert(&self, handle: Arc<ConnectionHandle>) -> Option<Arc<ConnectionHandle>> {
        let tag = handle.tag().to_string();
        let mut replaced = None;
        self.inner.connections.rcu(|current| {
            let mut next = ConnectionMap::clone(current);
            replaced = next.insert(tag.clone(), Arc::clone(&handle));
            next
        });
        replaced
    }

    /// Hook run by the reader task when the stream ends.
    fn disconnect_hook(&self, tag: &str, id: Ulid) -> DisconnectHook {
        let tag = tag.to_string();
        self.spawn_on_registry(move |registry| async move {
            if registry.remove_if_current(&tag, id).await {
                debug!(target: "conjure::bridge", "[{}] Removed after remote close", tag);
            }
        })
    }

    /// Hook run by the writer task when a frame cannot be written.
    fn write_failure_hook(&self, tag: &str, id: Ulid) -> WriteFailureHook {
        let tag = tag.to_string();
        self.spawn_on_registry(move |registry| async move {
            registry.force_remove(&tag, id).await;
        })
    }

    /// Callback that spawns `cleanup` against this registry, if both the
    /// registry and a runtime are still around when it fires.
    ///
    /// Holds only a weak reference so a finished registry is not kept alive by
    /// its own connections.
    fn spawn_on_registry<F, Fut>(&self, cleanup: F) -> Box<dyn FnOnce() + Send + 'static>
    where
        F: FnOnce(Registry) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let registry = Arc::downgrade(&self.inner);
        Box::new(move || {
            let Some(inner) = Weak::upgrade(&registry) else {
                return;
            };
            // Outside a runtime (process exit) there is nothing left to clean up.
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                return;
            };
            runtime.spawn(cleanup(Registry { inner }));
        })
    }

    pub fn lookup(&self, tag: &str) -> Option<Arc<ConnectionHandle>> {
        self.inner.connections.load().get(tag).cloned()
    }

    /// Every connection whose path matcher accepts `path`, ordered by tag.
    pub fn matching(&self, path: &str) -> Vec<Arc<ConnectionHandle>> {
        let snapshot = self.inner.connections.load();
        let mut matches: Vec<_> = snapshot
            .values()
            .filter(|handle| handle.info().matches(path))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.tag().cmp(b.tag()));
        matches
    }

    /// Descriptions of every connection, ordered by tag.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let snapshot = self.inner.connections.load();
        let mut infos: Vec<_> = snapshot.values().map(|handle| handle.info().clone()).collect();
        infos.sort_by(|a, b| a.tag.cmp(&b.tag));
        infos
    }

    fn tags(&self) -> Vec<String> {
        self.connections().into_iter().map(|info| info.tag).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.connections.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.load().is_empty()
    }

    /// Human-readable summary: a count line, then one line per connection.
    pub fn status(&self) -> String {
        let infos = self.connections();
        if infos.is_empty() {
            return "No connections".to_string();
        }
        let mut lines = vec![format!("{} connection(s)", infos.len())];
        lines.extend(infos.iter().map(ToString::to_string));
        lines.join("\n")
    }
}
