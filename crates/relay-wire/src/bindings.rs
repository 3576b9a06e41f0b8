//! Typed bindings over channel endpoints.
//!
//! A [`ServiceProxy`] is the calling side of an endpoint: it sends requests
//! and notifications declared by the remote service type and awaits replies.
//! A stub is the serving side: inbound calls are dispatched to a
//! [`ServiceHandler`]. Both directions share one router, so a stub can call
//! back into the client interface and a proxy can accept callbacks through
//! [`ServiceProxy::set_local_handler`].
//!
//! Handlers are held weakly. The owner of the handler decides its lifetime;
//! once it is dropped, inbound requests are answered with an error.

use crate::channel::{Endpoint, HandleId};
use crate::router::Router;
use async_trait::async_trait;
use relay_types::config::DEFAULT_MAX_MESSAGE_SIZE;
use relay_types::{ApplicationError, RelayError, RelayResult, ServiceDescriptor};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Result of a completed call: a value, or an application-level failure.
pub type CallOutcome = Result<Value, ApplicationError>;

/// Arguments of one inbound call.
#[derive(Debug, Default)]
pub struct CallArgs {
    /// JSON parameters.
    pub params: Value,
    /// Endpoints transferred with the call.
    pub endpoints: Vec<Endpoint>,
}

impl CallArgs {
    pub fn new(params: Value) -> Self {
        Self {
            params,
            endpoints: Vec::new(),
        }
    }

    pub fn with_endpoints(params: Value, endpoints: Vec<Endpoint>) -> Self {
        Self { params, endpoints }
    }

    /// Deserialize the parameters, mapping failures to a 400 error.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ApplicationError> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| ApplicationError::bad_params(e.to_string()))
    }

    /// Take the first transferred endpoint.
    pub fn take_endpoint(&mut self) -> Result<Endpoint, ApplicationError> {
        if self.endpoints.is_empty() {
            return Err(ApplicationError::bad_params("expected an endpoint argument"));
        }
        Ok(self.endpoints.remove(0))
    }
}

/// Serving side of a service type.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// The service type this handler implements.
    fn descriptor(&self) -> &'static ServiceDescriptor;

    /// Handle one inbound call. For notifications the returned value is
    /// discarded; an error is only logged.
    async fn handle(&self, method: &str, args: CallArgs) -> CallOutcome;
}

/// Options for binding an endpoint.
#[derive(Debug, Clone, Copy)]
pub struct BindOptions {
    /// Maximum size of a single encoded message.
    pub max_message_size: u32,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Calling side of an endpoint, typed by the remote service descriptor.
#[derive(Clone)]
pub struct ServiceProxy {
    router: Arc<Router>,
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("service", &self.router.remote().name)
            .field("endpoint", &self.router.id())
            .field("closed", &self.router.is_closed())
            .finish()
    }
}

impl ServiceProxy {
    /// The remote service type.
    pub fn descriptor(&self) -> &'static ServiceDescriptor {
        self.router.remote()
    }

    /// Identity of the bound endpoint.
    pub fn id(&self) -> HandleId {
        self.router.id()
    }

    /// Call a reply-producing method.
    pub fn call(&self, method: &str, params: Value) -> PendingCall {
        self.call_with_endpoints(method, params, Vec::new())
    }

    /// Call a reply-producing method, transferring `endpoints` with it.
    pub fn call_with_endpoints(
        &self,
        method: &str,
        params: Value,
        endpoints: Vec<Endpoint>,
    ) -> PendingCall {
        match self.router.call(method, params, endpoints) {
            Ok((call_id, rx)) => PendingCall::waiting(call_id, rx),
            Err(e) => PendingCall::failed(e),
        }
    }

    /// Send a notification.
    pub fn notify(&self, method: &str, params: Value) -> RelayResult<()> {
        self.router.notify(method, params, Vec::new())
    }

    /// Send a notification, transferring `endpoints` with it.
    pub fn notify_with_endpoints(
        &self,
        method: &str,
        params: Value,
        endpoints: Vec<Endpoint>,
    ) -> RelayResult<()> {
        self.router.notify(method, params, endpoints)
    }

    /// Serve calls arriving on this endpoint with `handler` (held weakly).
    pub fn set_local_handler<H: ServiceHandler + 'static>(&self, handler: &Arc<H>) {
        let weak: Weak<dyn ServiceHandler> = Arc::downgrade(handler) as Weak<dyn ServiceHandler>;
        self.router.set_handler(Some(weak));
    }

    /// Like [`ServiceProxy::set_local_handler`] for an already type-erased handler.
    pub fn set_local_handler_weak(&self, handler: Weak<dyn ServiceHandler>) {
        self.router.set_handler(Some(handler));
    }

    /// Register a callback for connection errors: undecodable messages and
    /// closure by the peer.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&RelayError) + Send + Sync + 'static,
    {
        self.router.set_error_handler(Arc::new(handler));
    }

    /// Close the endpoint. Pending calls fail with `ChannelClosed`.
    pub fn close(&self) {
        self.router.close();
    }

    /// Refuse new calls, and close the endpoint once every inbound request
    /// has been answered and every outbound call has its reply. A reply
    /// the peer already sent is never lost.
    pub fn close_when_idle(&self) {
        self.router.close_when_idle();
    }

    pub fn is_closed(&self) -> bool {
        self.router.is_closed()
    }

    /// Number of requests still awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.router.pending_calls()
    }

    /// Whether both proxies share one bound endpoint.
    pub fn ptr_eq(&self, other: &ServiceProxy) -> bool {
        Arc::ptr_eq(&self.router, &other.router)
    }
}

enum PendingState {
    Ready(Option<RelayError>),
    Waiting(oneshot::Receiver<RelayResult<CallOutcome>>),
}

/// Future for the reply of one call.
///
/// Resolves to `Ok(outcome)` when a reply arrives, or to an error when the
/// call could not be sent or the channel closed first.
pub struct PendingCall {
    call_id: Option<u64>,
    state: PendingState,
}

impl PendingCall {
    fn waiting(call_id: u64, rx: oneshot::Receiver<RelayResult<CallOutcome>>) -> Self {
        Self {
            call_id: Some(call_id),
            state: PendingState::Waiting(rx),
        }
    }

    fn failed(err: RelayError) -> Self {
        Self {
            call_id: None,
            state: PendingState::Ready(Some(err)),
        }
    }

    /// Correlation id, if the request was sent.
    pub fn call_id(&self) -> Option<u64> {
        self.call_id
    }
}

impl Future for PendingCall {
    type Output = RelayResult<CallOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            PendingState::Ready(err) => {
                Poll::Ready(Err(err.take().unwrap_or(RelayError::ChannelClosed)))
            }
            PendingState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(RelayError::ChannelClosed))),
        }
    }
}

/// Bind the calling side of `endpoint` to the remote service `descriptor`.
pub fn bind_proxy(endpoint: Endpoint, descriptor: &'static ServiceDescriptor) -> ServiceProxy {
    bind_proxy_with(endpoint, descriptor, BindOptions::default())
}

/// [`bind_proxy`] with explicit options.
pub fn bind_proxy_with(
    endpoint: Endpoint,
    descriptor: &'static ServiceDescriptor,
    options: BindOptions,
) -> ServiceProxy {
    let (router, receiver) = Router::new(endpoint, descriptor, options.max_message_size);
    Router::start(&router, receiver);
    ServiceProxy { router }
}

/// Bind a symmetric endpoint: both sides speak `descriptor`, and inbound
/// calls reach `handler` from the first message on.
pub fn bind_peer(
    endpoint: Endpoint,
    descriptor: &'static ServiceDescriptor,
    options: BindOptions,
    handler: Weak<dyn ServiceHandler>,
) -> ServiceProxy {
    let (router, receiver) = Router::new(endpoint, descriptor, options.max_message_size);
    router.set_handler(Some(handler));
    Router::start(&router, receiver);
    ServiceProxy { router }
}

/// Serve `endpoint` with `handler`. Returns a proxy to the caller's client
/// interface, which also owns the binding: dropping every clone of it
/// closes the endpoint.
pub fn bind_stub<H: ServiceHandler + 'static>(endpoint: Endpoint, handler: &Arc<H>) -> ServiceProxy {
    bind_stub_with_options(endpoint, handler, BindOptions::default())
}

/// [`bind_stub`] with explicit options.
pub fn bind_stub_with_options<H: ServiceHandler + 'static>(
    endpoint: Endpoint,
    handler: &Arc<H>,
    options: BindOptions,
) -> ServiceProxy {
    let descriptor = handler.descriptor().client_descriptor();
    let (router, receiver) = Router::new(endpoint, descriptor, options.max_message_size);
    let proxy = ServiceProxy { router };
    proxy.set_local_handler(handler);
    Router::start(&proxy.router, receiver);
    proxy
}

/// Serve `endpoint` with a handler built from the client proxy.
///
/// `activation` runs before the read loop starts, so no inbound call is
/// missed. The returned handler must be kept alive by the caller.
pub fn bind_stub_with<F>(
    endpoint: Endpoint,
    descriptor: &'static ServiceDescriptor,
    options: BindOptions,
    activation: F,
) -> (ServiceProxy, Arc<dyn ServiceHandler>)
where
    F: FnOnce(ServiceProxy) -> Arc<dyn ServiceHandler>,
{
    let (router, receiver) = Router::new(
        endpoint,
        descriptor.client_descriptor(),
        options.max_message_size,
    );
    let proxy = ServiceProxy { router };
    let handler = activation(proxy.clone());
    proxy.set_local_handler_weak(Arc::downgrade(&handler));
    Router::start(&proxy.router, receiver);
    (proxy, handler)
}
