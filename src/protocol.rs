//! Wire protocol for socket prepls: EDN decoding, frame shapes, dialects and
//! the code sent to the remote side.

pub mod code;
pub mod edn;
mod message;
mod variant;

pub use code::{ClojureCode, CodeGenerator, SourceOrigin};
pub use edn::{EdnError, Value};
pub use message::{FrameError, InboundMessage, MessageTag, QUIT_DIRECTIVE};
pub use variant::{ParseVariantError, Variant};
