//! `mojo:pingpong` and `mojo:pingpong_target`: provide the ping-pong
//! service, and ping other instances of it on request.

use crate::pingpong::{
    PingPongClient, PingPongClientProxy, PingPongClientStub, PingPongService,
    PingPongServiceProxy, PingPongServiceStub, PINGPONG,
};
use crate::Reply;
use async_trait::async_trait;
use relay_kernel::{AppContext, Application, ServiceExchange};
use relay_types::{ApplicationError, EndpointId, RelayError, RelayResult};
use relay_wire::{bind_proxy_with, bind_stub_with, Endpoint, ServiceHandler, ServiceProxy};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type PongSignal = Arc<Mutex<Option<oneshot::Sender<()>>>>;

/// Signals once the pong carrying `last` arrives.
struct PongWaiter {
    last: u16,
    done: PongSignal,
}

impl PingPongClient for PongWaiter {
    fn pong(&self, value: u16) {
        debug!(value, "pong");
        if value == self.last {
            if let Some(done) = self.done.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = done.send(());
            }
        }
    }
}

fn unavailable(e: RelayError) -> ApplicationError {
    ApplicationError::new(503, e.to_string())
}

/// Replies run `1..=count+1`, so `pong(count)` never arrives for zero.
fn check_count(count: u16) -> Reply<()> {
    if count == 0 {
        return Err(ApplicationError::bad_params("count must be at least 1"));
    }
    Ok(())
}

/// Ping `target` with `0..=count`, wait for `pong(count)`, then tell the
/// target to quit.
async fn ping_until(target: PingPongServiceProxy, count: u16) -> Reply<bool> {
    let (tx, rx) = oneshot::channel();
    let done: PongSignal = Arc::new(Mutex::new(Some(tx)));
    let waiter = Arc::new(PingPongClientStub::new(PongWaiter {
        last: count,
        done: Arc::clone(&done),
    }));
    target.set_client(&waiter);
    // Dropping the sender fails the wait if the target goes away first.
    target.inner().on_error(move |err| {
        if err.is_channel_closed() {
            done.lock().unwrap_or_else(|e| e.into_inner()).take();
        }
    });

    for value in 0..=count {
        target.ping(value).map_err(unavailable)?;
    }
    if rx.await.is_err() {
        return Err(ApplicationError::new(
            410,
            format!("target closed before pong({count})"),
        ));
    }
    if let Err(e) = target.quit() {
        debug!(error = %e, "Target already gone");
    }
    Ok(true)
}

/// One binding of the ping-pong service, serving one client.
pub struct PingPongImpl {
    ctx: AppContext,
    client: PingPongClientProxy,
    served: Mutex<Vec<(ServiceProxy, Arc<dyn ServiceHandler>)>>,
}

impl PingPongImpl {
    pub fn new(ctx: AppContext, client: ServiceProxy) -> Self {
        Self {
            ctx,
            client: PingPongClientProxy::new(client),
            served: Mutex::new(Vec::new()),
        }
    }

    fn activation(ctx: AppContext) -> impl Fn(ServiceProxy) -> Arc<PingPongServiceStub<PingPongImpl>> {
        move |client| Arc::new(PingPongServiceStub::new(PingPongImpl::new(ctx.clone(), client)))
    }
}

#[async_trait]
impl PingPongService for PingPongImpl {
    fn ping(&self, value: u16) {
        if let Err(e) = self.client.pong(value.wrapping_add(1)) {
            debug!(value, error = %e, "Dropping pong; client gone");
        }
    }

    fn quit(&self) {
        info!(url = %self.ctx.url(), instance = %self.ctx.instance_id(), "Quit requested");
        self.ctx.quit();
    }

    async fn ping_target_url(&self, url: String, count: u16) -> Reply<bool> {
        check_count(count)?;
        let exchange = self
            .ctx
            .shell()
            .connect(url.as_str())
            .await
            .map_err(unavailable)?;
        let target = PingPongServiceProxy::new(exchange.request(&PINGPONG).map_err(unavailable)?);
        let ok = ping_until(target, count).await?;
        info!(target = %url, count, "Ping target finished");
        Ok(ok)
    }

    async fn ping_target_service(&self, target: Endpoint, count: u16) -> Reply<bool> {
        check_count(count)?;
        let target = bind_proxy_with(target, &PINGPONG, self.ctx.bind_options());
        ping_until(PingPongServiceProxy::new(target), count).await
    }

    fn get_ping_pong_service(&self, endpoint: Endpoint) {
        let activation = Self::activation(self.ctx.clone());
        let (binding, handler) =
            bind_stub_with(endpoint, &PINGPONG, self.ctx.bind_options(), |client| {
                activation(client) as Arc<dyn ServiceHandler>
            });
        let mut served = self.served.lock().unwrap_or_else(|e| e.into_inner());
        served.retain(|(binding, _)| !binding.is_closed());
        served.push((binding, handler));
    }
}

#[derive(Default)]
pub struct PingPongApp {
    ctx: OnceLock<AppContext>,
}

impl PingPongApp {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Application for PingPongApp {
    async fn initialize(&self, ctx: AppContext) -> RelayResult<()> {
        let _ = self.ctx.set(ctx);
        Ok(())
    }

    async fn accept_connection(&self, requestor: EndpointId, exchange: ServiceExchange) {
        let Some(ctx) = self.ctx.get().cloned() else {
            return;
        };
        if let Err(e) = exchange.provide(&PINGPONG, PingPongImpl::activation(ctx)) {
            warn!(requestor = %requestor, error = %e, "Could not provide ping-pong service");
        }
    }
}
