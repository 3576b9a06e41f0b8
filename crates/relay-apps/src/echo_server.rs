//! `mojo:echo_server`: provides `examples.Echo` to every peer.

use crate::echo::{Echo, EchoStub, ECHO};
use crate::Reply;
use async_trait::async_trait;
use relay_kernel::{AppContext, Application, ServiceExchange};
use relay_types::{EndpointId, RelayResult};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Echoes every string back unchanged.
pub struct EchoImpl {
    ctx: Option<AppContext>,
}

impl EchoImpl {
    pub fn new(ctx: Option<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Echo for EchoImpl {
    async fn echo_string(&self, value: Option<String>) -> Reply<Option<String>> {
        debug!(value = ?value, "echoString");
        Ok(value)
    }

    fn quit(&self) {
        if let Some(ctx) = &self.ctx {
            ctx.quit();
        }
    }
}

#[derive(Default)]
pub struct EchoServer {
    ctx: OnceLock<AppContext>,
}

impl EchoServer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Application for EchoServer {
    async fn initialize(&self, ctx: AppContext) -> RelayResult<()> {
        let _ = self.ctx.set(ctx);
        Ok(())
    }

    async fn accept_connection(&self, requestor: EndpointId, exchange: ServiceExchange) {
        let ctx = self.ctx.get().cloned();
        let provided = exchange.provide(&ECHO, move |_client| {
            Arc::new(EchoStub::new(EchoImpl::new(ctx.clone())))
        });
        if let Err(e) = provided {
            warn!(requestor = %requestor, error = %e, "Could not provide echo service");
        }
    }
}
