//! Shared error types for the Relay broker.

use crate::endpoint::EndpointId;
use thiserror::Error;

/// Top-level error type for broker operations.
///
/// Application-level failures reported by a handler are not errors at this
/// level; they travel inside replies as [`crate::service::ApplicationError`].
#[derive(Error, Debug)]
pub enum RelayError {
    /// The identifier could not be resolved to a running application.
    #[error("Cannot resolve '{identifier}': {reason}")]
    Resolution {
        /// The identifier that failed to resolve.
        identifier: EndpointId,
        /// Why resolution failed.
        reason: String,
    },

    /// The service exchange was already closed.
    #[error("Service exchange for '{0}' is closed")]
    ExchangeClosed(EndpointId),

    /// The shell was already closed.
    #[error("Shell of '{0}' is closed")]
    ShellClosed(EndpointId),

    /// An inbound message was malformed.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The underlying channel was severed.
    #[error("Channel closed")]
    ChannelClosed,

    /// The proxy's service type does not declare the method.
    #[error("Service '{service}' has no method '{method}'")]
    UnknownMethod {
        /// Service type name.
        service: String,
        /// The method that was attempted.
        method: String,
    },

    /// A reply-producing method was sent as a notification, or vice versa.
    #[error("Method '{service}.{method}' {expected}")]
    MethodKindMismatch {
        /// Service type name.
        service: String,
        /// The method that was attempted.
        method: String,
        /// What the descriptor says about it.
        expected: &'static str,
    },

    /// A completion barrier was marked with a flag it does not track.
    #[error("Unknown completion flag: {0}")]
    UnknownBarrierFlag(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Build a resolution error for `identifier`.
    pub fn resolution(identifier: &EndpointId, reason: impl Into<String>) -> Self {
        Self::Resolution {
            identifier: identifier.clone(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the transport is gone.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed)
    }
}

/// Alias for Result with RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
