//! Connection handle for prepl connections.
//!
//! One handle per connection instance. It owns the three queues, the task
//! handles of the pump and router, and the lifecycle state.
//!
//! Exchange flow:
//! 1. Take the per-connection exchange lock (held for the whole exchange)
//! 2. Discard replies still owed to earlier, timed-out exchanges
//! 3. For each payload: push onto the eval-queue, take one reply from the
//!    pending-result queue
//! 4. Return the last reply

use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{AbortHandle, JoinHandle};
use ulid::Ulid;

use super::ConnectionState;
use super::connect_spec::ConnectionInfo;
use crate::bridge::Reply;
use crate::bridge::actor::{
    DisconnectHook, WriteFailureHook, spawn_reader_task, spawn_result_router, spawn_writer_task,
};
use crate::bridge::queue::{Queue, Recv};
use crate::error::{LockResultExt, ReplError, ReplResult};
use crate::protocol::{CodeGenerator, InboundMessage, MessageTag};
use crate::render::OutputRenderer;

/// Join handles of the connection's tasks, taken by the first teardown.
#[derive(Default)]
struct TaskJoins {
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    router: Option<JoinHandle<()>>,
}

/// A live (or dying) connection.
pub struct ConnectionHandle {
    /// Tells this instance apart from a later reconnect under the same tag.
    id: Ulid,
    info: ConnectionInfo,
    /// std::sync::RwLock for fast, synchronous state checks
    state: RwLock<ConnectionState>,
    eval_queue: Arc<Queue<String>>,
    pending_queue: Arc<Queue<InboundMessage>>,
    read_queue: Arc<Queue<InboundMessage>>,
    /// Serializes exchanges so a caller never takes another caller's reply.
    exchange_lock: tokio::sync::Mutex<()>,
    /// Replies the remote still owes to exchanges nobody waits for anymore.
    stale_replies: AtomicUsize,
    /// tokio Mutex so a second teardown waits for the first to finish joining.
    joins: tokio::sync::Mutex<TaskJoins>,
    aborts: std::sync::Mutex<Vec<AbortHandle>>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("tag", &self.info.tag)
            .field("addr", &self.info.addr())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Create a handle in `Connecting` state with fresh queues and no tasks.
    pub(crate) fn new(info: ConnectionInfo) -> Self {
        Self {
            id: Ulid::new(),
            info,
            state: RwLock::new(ConnectionState::Connecting),
            eval_queue: Arc::new(Queue::new("eval")),
            pending_queue: Arc::new(Queue::new("pending-result")),
            read_queue: Arc::new(Queue::new("read")),
            exchange_lock: tokio::sync::Mutex::new(()),
            stale_replies: AtomicUsize::new(0),
            joins: tokio::sync::Mutex::new(TaskJoins::default()),
            aborts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn tag(&self) -> &str {
        &self.info.tag
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().recover_poison("ConnectionHandle::state")
    }

    /// Move the state forward. Backward transitions are ignored.
    pub(crate) fn advance(&self, next: ConnectionState) {
        let mut state = self.state.write().recover_poison("ConnectionHandle::advance");
        if state.can_advance_to(next) {
            debug!(
                target: "conjure::bridge",
                "[{}] {} -> {}",
                self.info.tag,
                *state,
                next
            );
            *state = next;
        }
    }

    /// Whether the reader has stopped and no more frames will arrive.
    pub fn is_drained(&self) -> bool {
        self.read_queue.is_closed()
    }

    /// Split the stream and spawn the reader and writer tasks.
    ///
    /// When the writer fails, the read and pending-result queues are closed
    /// first so every waiting caller sees `Closed`, then `on_write_failure`
    /// runs.
    pub(crate) async fn start_pump<S>(
        &self,
        stream: S,
        on_disconnect: DisconnectHook,
        on_write_failure: WriteFailureHook,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let read_queue = Arc::clone(&self.read_queue);
        let pending_queue = Arc::clone(&self.pending_queue);
        let writer = spawn_writer_task(
            self.info.tag.clone(),
            write_half,
            Arc::clone(&self.eval_queue),
            Box::new(move || {
                read_queue.close();
                pending_queue.close();
                on_write_failure();
            }),
        );
        let reader = spawn_reader_task(
            self.info.tag.clone(),
            read_half,
            Arc::clone(&self.read_queue),
            on_disconnect,
        );

        self.track(&writer);
        self.track(&reader);
        let mut joins = self.joins.lock().await;
        joins.writer = Some(writer);
        joins.reader = Some(reader);
    }

    /// Send the prelude and wait for its `ret` on the read-queue.
    ///
    /// Runs before the router exists, so the reply never reaches the
    /// pending-result queue.
    pub(crate) async fn initialize(&self, prelude: String) -> ReplResult<()> {
        if self.eval_queue.push(prelude).await.is_err() {
            return Err(ReplError::closed(self.tag()));
        }
        loop {
            match self.read_queue.take().await {
                Recv::Item(message) if message.tag == MessageTag::Ret => {
                    debug!(
                        target: "conjure::bridge",
                        "[{}] Prelude loaded: {}",
                        self.info.tag,
                        message.text()
                    );
                    return Ok(());
                }
                Recv::Item(message) => {
                    debug!(
                        target: "conjure::bridge",
                        "[{}] Prelude {}: {}",
                        self.info.tag,
                        message.tag,
                        message.text().trim_end()
                    );
                }
                Recv::Closed => return Err(ReplError::closed(self.tag())),
            }
        }
    }

    pub(crate) async fn start_router(
        &self,
        code: Arc<dyn CodeGenerator>,
        renderer: Arc<dyn OutputRenderer>,
    ) {
        let router = spawn_result_router(
            self.info.clone(),
            Arc::clone(&self.read_queue),
            Arc::clone(&self.pending_queue),
            code,
            renderer,
        );
        self.track(&router);
        self.joins.lock().await.router = Some(router);
    }

    fn track(&self, task: &JoinHandle<()>) {
        self.aborts
            .lock()
            .recover_poison("ConnectionHandle::track")
            .push(task.abort_handle());
    }

    /// Send each payload in turn and return the reply to the last one.
    ///
    /// Earlier replies are taken and discarded, which is how the
    /// namespace-switch of double-submit dialects is absorbed. With `timeout`
    /// set the whole exchange is bounded and may return `Reply::TimedOut`.
    pub async fn exchange(&self, payloads: Vec<String>, timeout: Option<Duration>) -> Reply {
        let _exclusive = self.exchange_lock.lock().await;
        if self.state() >= ConnectionState::Draining {
            return Reply::Closed;
        }
        match timeout {
            None => self.exchange_locked(payloads).await,
            Some(limit) => {
                let bounded = tokio::time::timeout(limit, self.exchange_locked(payloads));
                match bounded.await {
                    Ok(reply) => reply,
                    Err(_) => {
                        warn!(
                            target: "conjure::bridge",
                            "[{}] No reply within {:?}, {} late replies will be discarded",
                            self.info.tag,
                            limit,
                            self.stale_replies.load(Ordering::Acquire)
                        );
                        Reply::TimedOut
                    }
                }
            }
        }
    }

    /// Exchange body. Cancel safe: `stale_replies` always equals the number of
    /// pushed payloads whose reply has not been taken.
    async fn exchange_locked(&self, payloads: Vec<String>) -> Reply {
        while self.stale_replies.load(Ordering::Acquire) > 0 {
            match self.pending_queue.take().await {
                Recv::Item(late) => {
                    self.stale_replies.fetch_sub(1, Ordering::AcqRel);
                    debug!(
                        target: "conjure::bridge",
                        "[{}] Discarding late reply: {}",
                        self.info.tag,
                        late.text()
                    );
                }
                Recv::Closed => return Reply::Closed,
            }
        }

        let mut reply = Reply::Closed;
        for payload in payloads {
            if self.eval_queue.push(payload).await.is_err() {
                return Reply::Closed;
            }
            self.stale_replies.fetch_add(1, Ordering::AcqRel);
            match self.pending_queue.take().await {
                Recv::Item(message) => {
                    self.stale_replies.fetch_sub(1, Ordering::AcqRel);
                    reply = Reply::Value(message);
                }
                Recv::Closed => return Reply::Closed,
            }
        }
        reply
    }

    /// Graceful teardown.
    ///
    /// Marks `Draining`, closes the eval and pending-result queues, then waits
    /// for the writer, reader and router to exit before marking `Closed`. The
    /// reader only exits once the remote closes its side, unless the writer
    /// has already failed, in which case every task is aborted.
    pub(crate) async fn teardown(&self) {
        // A failed writer never sent the quit directive, so the remote will
        // not hang up on its own.
        if self.eval_queue.is_closed() && self.state() < ConnectionState::Draining {
            self.force_close();
        }
        self.advance(ConnectionState::Draining);
        self.eval_queue.close();
        self.pending_queue.close();

        let mut joins = self.joins.lock().await;
        for (name, task) in [
            ("writer", joins.writer.take()),
            ("reader", joins.reader.take()),
            ("router", joins.router.take()),
        ] {
            let Some(task) = task else { continue };
            if let Err(e) = task.await {
                if e.is_panic() {
                    log::error!(
                        target: "conjure::bridge",
                        "[{}] {} task panicked: {}",
                        self.info.tag,
                        name,
                        e
                    );
                } else {
                    debug!(target: "conjure::bridge", "[{}] {} task aborted", self.info.tag, name);
                }
            }
        }
        drop(joins);

        self.advance(ConnectionState::Closed);
    }

    /// Abort every task and close every queue without waiting.
    ///
    /// Used when the remote does not finish a graceful teardown in time. A
    /// later `teardown` still joins the aborted tasks.
    pub(crate) fn force_close(&self) {
        for task in self
            .aborts
            .lock()
            .recover_poison("ConnectionHandle::force_close")
            .drain(..)
        {
            task.abort();
        }
        self.eval_queue.close();
        self.pending_queue.close();
        self.read_queue.close();
        self.advance(ConnectionState::Closed);
    }
}
