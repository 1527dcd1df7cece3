//! Reader task for a prepl connection.
//!
//! The Reader Task:
//! - Decodes one EDN frame at a time from the inbound half of the stream
//! - Pushes each tagged message onto the read-queue
//! - Logs and skips frames that are not tagged maps or do not parse
//! - Stops on EOF, on a read error, or when the read-queue is closed
//!
//! However the task ends (including panic or abort), its cleanup guard closes
//! the read-queue and fires the disconnect hook so the registry can drop the
//! connection.

use std::io;
use std::sync::Arc;

use log::{debug, warn};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use crate::bridge::connection::FrameReader;
use crate::bridge::queue::Queue;
use crate::protocol::InboundMessage;

/// Callback run once when the reader task ends.
pub(crate) type DisconnectHook = Box<dyn FnOnce() + Send + 'static>;

/// Runs the reader's cleanup on drop.
struct ReaderCleanup {
    tag: String,
    read_queue: Arc<Queue<InboundMessage>>,
    on_disconnect: Option<DisconnectHook>,
}

impl Drop for ReaderCleanup {
    fn drop(&mut self) {
        debug!(target: "conjure::bridge::reader", "[{}] Reader stopped", self.tag);
        self.read_queue.close();
        if let Some(hook) = self.on_disconnect.take() {
            hook();
        }
    }
}

/// Spawn the reader task for one connection.
pub(crate) fn spawn_reader_task<R>(
    tag: String,
    reader: R,
    read_queue: Arc<Queue<InboundMessage>>,
    on_disconnect: DisconnectHook,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let cleanup = ReaderCleanup {
        tag: tag.clone(),
        read_queue: Arc::clone(&read_queue),
        on_disconnect: Some(on_disconnect),
    };
    tokio::spawn(async move {
        let _cleanup = cleanup;
        reader_loop(&tag, FrameReader::new(reader), &read_queue).await;
    })
}

async fn reader_loop<R>(
    tag: &str,
    mut frames: FrameReader<R>,
    read_queue: &Queue<InboundMessage>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match frames.read_frame().await {
            Ok(Some(value)) => match InboundMessage::from_value(value) {
                Ok(message) => {
                    if read_queue.push(message).await.is_err() {
                        debug!(
                            target: "conjure::bridge::reader",
                            "[{}] Read queue closed, stopping reader",
                            tag
                        );
                        return;
                    }
                }
                Err(e) => {
                    warn!(target: "conjure::bridge::reader", "[{}] Skipping frame: {}", tag, e);
                }
            },
            Ok(None) => {
                debug!(target: "conjure::bridge::reader", "[{}] Remote closed the stream", tag);
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(
                    target: "conjure::bridge::reader",
                    "[{}] Skipping malformed frame: {}",
                    tag,
                    e
                );
            }
            Err(e) => {
                warn!(target: "conjure::bridge::reader", "[{}] Read error: {}", tag, e);
                return;
            }
        }
    }
}
