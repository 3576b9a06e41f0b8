//! `mojo:echo_client`: sends one string to an echo server and quits.
//!
//! The server URL is `args[1]`, defaulting to `mojo:echo_server`.

use crate::echo::{EchoProxy, ECHO};
use async_trait::async_trait;
use relay_kernel::{AppContext, Application};
use relay_types::RelayResult;
use std::sync::Mutex;
use tracing::{info, warn};

pub const DEFAULT_ECHO_SERVER: &str = "mojo:echo_server";

pub const GREETING: &str = "Hello World";

#[derive(Default)]
pub struct EchoClient {
    response: Mutex<Option<String>>,
}

impl EchoClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// The echoed value, once the server has answered.
    pub fn response(&self) -> Option<String> {
        self.response.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Application for EchoClient {
    async fn initialize(&self, ctx: AppContext) -> RelayResult<()> {
        let target = ctx
            .args()
            .get(1)
            .cloned()
            .unwrap_or_else(|| DEFAULT_ECHO_SERVER.to_string());
        let echo = EchoProxy::new(ctx.shell().connect_service(target.as_str(), &ECHO).await?);

        match echo.echo_string(GREETING.to_string()).await? {
            Ok(value) => {
                info!(client = %ctx.url(), server = %target, response = ?value, "Echo response");
                *self.response.lock().unwrap_or_else(|e| e.into_inner()) = value;
            }
            Err(e) => warn!(server = %target, error = %e, "Echo failed"),
        }
        ctx.quit();
        Ok(())
    }
}
