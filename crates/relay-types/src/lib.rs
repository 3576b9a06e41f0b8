//! Core types for the Relay application service broker.
//!
//! This crate defines the shared data structures used across the wire layer,
//! the kernel and applications: endpoint identifiers, service descriptors,
//! errors and configuration. It contains no business logic.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod service;

pub use endpoint::{EndpointId, InstanceId};
pub use error::{RelayError, RelayResult};
pub use service::{ApplicationError, MethodDescriptor, ServiceDescriptor, EMPTY_SERVICE};
