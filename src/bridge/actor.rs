//! Per-connection tasks: reader, writer and result router.
//!
//! Each live connection runs exactly one of each. They talk only through the
//! connection's queues, and every one of them ends when the queue it waits on
//! is closed.

mod reader;
mod result_router;
mod writer;

pub(crate) use reader::{DisconnectHook, spawn_reader_task};
pub(crate) use result_router::spawn_result_router;
pub(crate) use writer::{WriteFailureHook, spawn_writer_task};
