//! Relay kernel: shells, service exchanges and the application manager.
//!
//! An application reaches another by asking its [`Shell`] to connect to an
//! identifier. The shell resolves the identifier through the
//! [`ApplicationManager`], opens a pipe, and wraps its end in a
//! [`ServiceExchange`]; the far application receives the other end in
//! `accept_connection`. Services are then requested and provided over the
//! exchange.

pub mod app;
pub mod barrier;
pub mod config;
pub mod exchange;
pub mod manager;
pub mod resolver;
pub mod shell;

pub use app::{AppContext, Application, RunningApplication};
pub use barrier::CompletionBarrier;
pub use exchange::{Activation, ExchangeInfo, ExchangeState, ServiceExchange, SERVICE_PROVIDER};
pub use manager::{ApplicationLoader, ApplicationManager, FnLoader};
pub use resolver::{ApplicationConnection, ModuleResolver};
pub use shell::Shell;
