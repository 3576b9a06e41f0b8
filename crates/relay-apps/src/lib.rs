//! Demo applications for the Relay broker.
//!
//! The typed bindings ([`echo`], [`pingpong`]) wrap [`ServiceProxy`] and
//! [`ServiceHandler`](relay_wire::ServiceHandler) with per-method Rust
//! signatures. The applications built on them are registered under the
//! `mojo:` scheme by [`bundled::register_bundled`].

pub mod bundled;
pub mod echo;
pub mod echo_client;
pub mod echo_server;
pub mod pingpong;
pub mod pingpong_app;
pub mod share_echo;

pub use bundled::{bundled_urls, register_bundled, BundledLoader, BUNDLED_APPS};

use relay_types::{ApplicationError, RelayError, RelayResult};
use relay_wire::CallOutcome;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Outcome of a typed call that completed: the decoded reply, or the
/// application error the remote reported.
pub type Reply<T> = Result<T, ApplicationError>;

/// Serialize call parameters.
pub(crate) fn to_params<T: Serialize>(params: &T) -> RelayResult<Value> {
    serde_json::to_value(params).map_err(|e| RelayError::Decode(e.to_string()))
}

/// Serialize a handler's reply.
pub(crate) fn to_reply<T: Serialize>(value: &T) -> CallOutcome {
    serde_json::to_value(value).map_err(|e| ApplicationError::new(500, e.to_string()))
}

/// Decode a completed call into its typed reply.
pub(crate) fn decode_reply<T: DeserializeOwned>(outcome: CallOutcome) -> Reply<T> {
    outcome.and_then(|value| {
        serde_json::from_value(value).map_err(|e| ApplicationError::bad_params(e.to_string()))
    })
}
