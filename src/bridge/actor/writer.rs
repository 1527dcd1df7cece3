//! Writer task for a prepl connection.
//!
//! The single writer drains the eval-queue onto the stream. Closing the
//! eval-queue is the stop signal:
//!
//! 1. **Drain**: items already queued are still written (the queue hands out
//!    buffered items before reporting closed)
//! 2. **Quit**: `:repl/quit` is written as the final frame
//! 3. **Close**: the write half is shut down so the remote sees EOF
//!
//! The remote then closes its side, which ends the reader task.
//!
//! A frame that cannot be written (after the transport's own retries) is
//! fatal: the writer closes the eval-queue, fires its failure hook and stops
//! without sending the quit directive.

use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::bridge::connection::write_frame;
use crate::bridge::queue::{Queue, Recv};
use crate::protocol::QUIT_DIRECTIVE;

/// Callback run once when the writer gives up on the stream.
pub(crate) type WriteFailureHook = Box<dyn FnOnce() + Send + 'static>;

/// Spawn the writer task for one connection.
pub(crate) fn spawn_writer_task<W>(
    tag: String,
    writer: W,
    eval_queue: Arc<Queue<String>>,
    on_failure: WriteFailureHook,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(writer_loop(tag, writer, eval_queue, on_failure))
}

async fn writer_loop<W>(
    tag: String,
    mut writer: W,
    eval_queue: Arc<Queue<String>>,
    on_failure: WriteFailureHook,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        match eval_queue.take().await {
            Recv::Item(frame) => match write_frame(&mut writer, &frame).await {
                Ok(()) => {
                    trace!(
                        target: "conjure::bridge::writer",
                        "[{}] Sent {} bytes",
                        tag,
                        frame.len()
                    );
                }
                Err(e) => {
                    warn!(
                        target: "conjure::bridge::writer",
                        "[{}] Write error: {}, stopping writer",
                        tag,
                        e
                    );
                    // Later pushes fail fast instead of queueing into the void.
                    eval_queue.close();
                    on_failure();
                    return;
                }
            },
            Recv::Closed => break,
        }
    }

    debug!(target: "conjure::bridge::writer", "[{}] Eval queue closed, sending quit", tag);
    if let Err(e) = write_frame(&mut writer, QUIT_DIRECTIVE).await {
        debug!(target: "conjure::bridge::writer", "[{}] Could not send quit: {}", tag, e);
    }
    if let Err(e) = writer.shutdown().await {
        debug!(target: "conjure::bridge::writer", "[{}] Could not close write half: {}", tag, e);
    }
}
