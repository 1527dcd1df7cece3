//! Connection manager and eval pipeline for socket prepls.
//!
//! Data flow per connection:
//!
//! ```text
//! Orchestrator -> eval-queue -> writer task -> wire -> remote
//! remote -> wire -> reader task -> read-queue -> result router
//!     result router -> pending-result queue -> blocked caller  (ret)
//!     result router -> output renderer                         (everything else)
//! ```

mod actor;
mod connection;
mod eval;
mod pool;
mod queue;
mod reply;

pub use eval::{EvalReply, Orchestrator, RequestContext};
pub use pool::{
    ConnectSpec, ConnectionHandle, ConnectionInfo, ConnectionState, DEFAULT_HOST, InitTimeout,
    Registry, ShutdownTimeout,
};
pub use reply::Reply;
