//! `mojo:share_echo` and `mojo:share_echo_target`: two applications that
//! each provide `examples.Echo` to the other over one connection and call
//! the other's. Each quits once its own service has been used and its own
//! request has been answered, in whichever order that happens.
//!
//! `share_echo` takes the target URL as `args[1]`.

use crate::echo::{Echo, EchoProxy, EchoStub, ECHO};
use crate::Reply;
use async_trait::async_trait;
use relay_kernel::{AppContext, Application, CompletionBarrier, ServiceExchange};
use relay_types::{EndpointId, RelayResult};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{info, warn};

/// Set when the locally provided echo service answered a call.
pub const PROVIDED_SERVICE: &str = "providedService";
/// Set when the remote echo service answered our call.
pub const REQUESTED_SERVICE: &str = "requestedService";

/// Barrier that quits the application once both directions are done.
///
/// The last flag may be set inside the echo handler, before its reply is
/// sent. Bound handlers finish the calls they are serving before their
/// endpoints close, so that reply still goes out.
fn quit_when_done(ctx: &AppContext) -> CompletionBarrier {
    let ctx = ctx.clone();
    CompletionBarrier::new([PROVIDED_SERVICE, REQUESTED_SERVICE], move || {
        info!(url = %ctx.url(), "Shared echo in both directions");
        ctx.quit();
    })
}

fn mark(barrier: &CompletionBarrier, flag: &str) {
    if let Err(e) = barrier.mark(flag) {
        warn!(flag, error = %e, "Could not mark completion flag");
    }
}

/// Echo service that prefixes every value.
struct PrefixEcho {
    prefix: &'static str,
    barrier: CompletionBarrier,
}

#[async_trait]
impl Echo for PrefixEcho {
    async fn echo_string(&self, value: Option<String>) -> Reply<Option<String>> {
        mark(&self.barrier, PROVIDED_SERVICE);
        Ok(Some(format!("{}{}", self.prefix, value.unwrap_or_default())))
    }
}

/// Provide the prefixed echo on `exchange`, then call the far side's echo
/// with `greeting` and store the answer in `response`.
fn share(
    exchange: &ServiceExchange,
    prefix: &'static str,
    greeting: &'static str,
    barrier: CompletionBarrier,
    response: Arc<Mutex<Option<String>>>,
) -> RelayResult<()> {
    let provided = barrier.clone();
    exchange.provide(&ECHO, move |_client| {
        Arc::new(EchoStub::new(PrefixEcho {
            prefix,
            barrier: provided.clone(),
        }))
    })?;
    let echo = EchoProxy::new(exchange.request(&ECHO)?);
    tokio::spawn(async move {
        match echo.echo_string(greeting.to_string()).await {
            Ok(Ok(value)) => {
                info!(response = ?value, "{greeting} received echo");
                *response.lock().unwrap_or_else(|e| e.into_inner()) = value;
                mark(&barrier, REQUESTED_SERVICE);
            }
            Ok(Err(e)) => warn!(error = %e, "Echo request failed"),
            Err(e) => warn!(error = %e, "Echo request not delivered"),
        }
    });
    Ok(())
}

/// Connects to its target, provides echo to it and requests the target's.
#[derive(Default)]
pub struct ShareEcho {
    response: Arc<Mutex<Option<String>>>,
}

impl ShareEcho {
    pub fn new() -> Self {
        Self::default()
    }

    /// What the target's echo service answered.
    pub fn response(&self) -> Option<String> {
        self.response.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Application for ShareEcho {
    async fn initialize(&self, ctx: AppContext) -> RelayResult<()> {
        let [_, target] = ctx.args() else {
            warn!(url = %ctx.url(), args = ?ctx.args(), "Expected URL argument");
            return Ok(());
        };
        let exchange = ctx.shell().connect(target.as_str()).await?;
        share(
            &exchange,
            "ShareEcho: ",
            "ShareEcho",
            quit_when_done(&ctx),
            Arc::clone(&self.response),
        )
    }
}

/// Accepts share_echo's connection and does the same from its side.
#[derive(Default)]
pub struct ShareEchoTarget {
    ctx: OnceLock<AppContext>,
    response: Arc<Mutex<Option<String>>>,
}

impl ShareEchoTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// What share_echo's echo service answered.
    pub fn response(&self) -> Option<String> {
        self.response.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Application for ShareEchoTarget {
    async fn initialize(&self, ctx: AppContext) -> RelayResult<()> {
        let _ = self.ctx.set(ctx);
        Ok(())
    }

    async fn accept_connection(&self, requestor: EndpointId, exchange: ServiceExchange) {
        let Some(ctx) = self.ctx.get() else {
            return;
        };
        let shared = share(
            &exchange,
            "ShareEchoTarget: ",
            "ShareEchoTarget",
            quit_when_done(ctx),
            Arc::clone(&self.response),
        );
        if let Err(e) = shared {
            warn!(requestor = %requestor, error = %e, "Could not share echo service");
        }
    }
}
