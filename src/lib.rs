pub mod bridge;
pub mod config;
pub mod editor;
pub mod error;
pub mod protocol;
pub mod render;
pub mod system;

pub use bridge::{
    ConnectSpec, ConnectionHandle, ConnectionInfo, ConnectionState, EvalReply, Orchestrator,
    Registry, Reply, RequestContext,
};
pub use config::ReplSettings;
pub use error::{ReplError, ReplResult};
pub use protocol::{ClojureCode, CodeGenerator, InboundMessage, MessageTag, Value, Variant};
pub use render::{OutputRenderer, TerminalRenderer};
pub use system::{Event, System};
