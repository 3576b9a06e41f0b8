//! Relay wire layer: channels, message framing and typed bindings.
//!
//! Applications talk over in-memory duplex pipes. On top of a pipe, a
//! router correlates requests with replies and dispatches inbound calls.
//!
//! ## Architecture
//!
//! - **Endpoint**: one end of a pipe; endpoints can travel inside messages
//! - **WireMessage**: length-prefixed JSON envelope for calls and replies
//! - **ServiceProxy**: calling side, validated against a service descriptor
//! - **ServiceHandler**: serving side, held weakly by its binding

pub mod bindings;
pub mod channel;
pub mod message;
mod router;

pub use bindings::{
    bind_peer, bind_proxy, bind_proxy_with, bind_stub, bind_stub_with, bind_stub_with_options,
    BindOptions, CallArgs, CallOutcome, PendingCall, ServiceHandler, ServiceProxy,
};
pub use channel::{pipe, Endpoint, EndpointReceiver, EndpointSender, HandleId, Message};
pub use message::{CallResult, WireError, WireMessage};
