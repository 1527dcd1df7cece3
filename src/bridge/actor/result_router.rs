//! Result router for a prepl connection.
//!
//! Consumes the read-queue and splits the stream in two:
//! - `ret` frames go to the pending-result queue, where the single blocked
//!   caller of the connection takes them
//! - everything else (`out`, `err`, `tap`, unknown tags) is an async event for
//!   the output renderer
//!
//! `ret` and `tap` payloads are EDN text and get a second decode on the way.

use std::sync::Arc;

use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::bridge::ConnectionInfo;
use crate::bridge::queue::{Queue, Recv};
use crate::protocol::{CodeGenerator, InboundMessage, MessageTag, Value};
use crate::render::OutputRenderer;

/// Where a decoded message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Destination {
    /// The caller blocked on the pending-result queue.
    Caller,
    Renderer,
}

pub(crate) fn destination(tag: &MessageTag) -> Destination {
    match tag {
        MessageTag::Ret => Destination::Caller,
        _ => Destination::Renderer,
    }
}

/// Decode the EDN payload of `ret` and `tap` frames.
///
/// A preamble form is logged and dropped. When the payload does not parse the
/// raw string is kept.
pub(crate) fn decode_payload(
    code: &dyn CodeGenerator,
    conn_tag: &str,
    mut message: InboundMessage,
) -> InboundMessage {
    if !message.tag.is_payload_bearing() {
        return message;
    }
    let Value::Str(raw) = &message.val else {
        return message;
    };
    match code.parse_response(raw) {
        Ok((preamble, payload)) => {
            if let Some(preamble) = preamble {
                debug!(
                    target: "conjure::bridge::router",
                    "[{}] Response preamble: {}",
                    conn_tag,
                    preamble
                );
            }
            message.val = payload;
        }
        Err(e) => {
            warn!(
                target: "conjure::bridge::router",
                "[{}] Could not decode {} payload, keeping raw text: {}",
                conn_tag,
                message.tag,
                e
            );
        }
    }
    message
}

/// Spawn the router task. It exits once the read-queue reports closed.
pub(crate) fn spawn_result_router(
    info: ConnectionInfo,
    read_queue: Arc<Queue<InboundMessage>>,
    pending_queue: Arc<Queue<InboundMessage>>,
    code: Arc<dyn CodeGenerator>,
    renderer: Arc<dyn OutputRenderer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Recv::Item(message) = read_queue.take().await {
            let message = decode_payload(code.as_ref(), &info.tag, message);
            match destination(&message.tag) {
                Destination::Caller => {
                    if let Err(dropped) = pending_queue.push(message).await {
                        debug!(
                            target: "conjure::bridge::router",
                            "[{}] No caller for result, dropping: {}",
                            info.tag,
                            dropped.text()
                        );
                    }
                }
                Destination::Renderer => renderer.event(&info, &message),
            }
        }
        // No more results can arrive; wake any caller still waiting.
        pending_queue.close();
        debug!(target: "conjure::bridge::router", "[{}] Router stopped", info.tag);
    })
}
