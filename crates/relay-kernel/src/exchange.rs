//! Service exchange: the bidirectional service broker for one connection.
//!
//! Each side of a connection owns one [`ServiceExchange`]. `request` asks
//! the far side for a service by sending it one end of a fresh pipe; the
//! far side binds that end to a handler built by whatever was registered
//! with `provide`. Requests for services nobody provides yet are held and
//! bound as soon as a provider appears.
//!
//! Closing an exchange fails the calls this side is still waiting on, but
//! lets handlers finish answering calls they already took. When the far
//! side closes first, replies it already sent are still delivered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_types::{
    ApplicationError, EndpointId, MethodDescriptor, RelayError, RelayResult, ServiceDescriptor,
};
use relay_wire::{
    bind_peer, bind_proxy_with, bind_stub_with, pipe, BindOptions, CallArgs, CallOutcome,
    Endpoint, ServiceHandler, ServiceProxy,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tracing::{debug, info, warn};

/// Control interface spoken by both ends of an exchange.
pub static SERVICE_PROVIDER: ServiceDescriptor = ServiceDescriptor {
    name: "relay.ServiceProvider",
    methods: &[MethodDescriptor::notify("connectToService")],
    client: Some(&SERVICE_PROVIDER),
};

/// Builds a handler for one remote request, given the proxy to the
/// requester's client interface.
pub type Activation = Arc<dyn Fn(ServiceProxy) -> Arc<dyn ServiceHandler> + Send + Sync>;

/// Lifecycle of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    Open,
    Closed,
}

/// Snapshot of one exchange, as listed by a shell.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeInfo {
    pub identifier: EndpointId,
    pub state: ExchangeState,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConnectToService {
    service_name: String,
}

struct Provider {
    descriptor: &'static ServiceDescriptor,
    activation: Activation,
}

struct BoundService {
    service: &'static str,
    client: ServiceProxy,
    // Owned here; the binding only holds it weakly.
    _handler: Arc<dyn ServiceHandler>,
}

struct ExchangeInner {
    identifier: EndpointId,
    connected_at: DateTime<Utc>,
    options: BindOptions,
    channel: OnceLock<ServiceProxy>,
    closed: AtomicBool,
    providers: Mutex<HashMap<String, Provider>>,
    requested: Mutex<Vec<ServiceProxy>>,
    bound: Mutex<Vec<BoundService>>,
    unclaimed: Mutex<Vec<(String, Endpoint)>>,
}

/// Broker for the services flowing over one connection. Cheap to clone;
/// clones share state.
#[derive(Clone)]
pub struct ServiceExchange {
    inner: Arc<ExchangeInner>,
}

impl std::fmt::Debug for ServiceExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceExchange")
            .field("identifier", &self.inner.identifier)
            .field("state", &self.state())
            .finish()
    }
}

impl ServiceExchange {
    /// Wrap `endpoint`, the local end of a connection to `identifier`.
    pub fn new(identifier: EndpointId, endpoint: Endpoint, options: BindOptions) -> Self {
        let inner = Arc::new(ExchangeInner {
            identifier,
            connected_at: Utc::now(),
            options,
            channel: OnceLock::new(),
            closed: AtomicBool::new(false),
            providers: Mutex::new(HashMap::new()),
            requested: Mutex::new(Vec::new()),
            bound: Mutex::new(Vec::new()),
            unclaimed: Mutex::new(Vec::new()),
        });

        let weak: Weak<dyn ServiceHandler> = Arc::downgrade(&inner) as Weak<dyn ServiceHandler>;
        let channel = bind_peer(endpoint, &SERVICE_PROVIDER, options, weak);
        let on_close = Arc::downgrade(&inner);
        channel.on_error(move |err| {
            let Some(inner) = on_close.upgrade() else {
                return;
            };
            if err.is_channel_closed() {
                inner.close_by_peer();
            } else {
                warn!(identifier = %inner.identifier, error = %err, "Service exchange error");
            }
        });
        let _ = inner.channel.set(channel);
        debug!(identifier = %inner.identifier, "Opened service exchange");
        Self { inner }
    }

    /// Identifier of the application on the far side.
    pub fn identifier(&self) -> &EndpointId {
        &self.inner.identifier
    }

    pub fn state(&self) -> ExchangeState {
        if self.inner.closed.load(Ordering::SeqCst) {
            ExchangeState::Closed
        } else {
            ExchangeState::Open
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ExchangeState::Closed
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    pub fn info(&self) -> ExchangeInfo {
        ExchangeInfo {
            identifier: self.inner.identifier.clone(),
            state: self.state(),
            connected_at: self.inner.connected_at,
        }
    }

    /// Whether both handles refer to the same exchange.
    pub fn ptr_eq(&self, other: &ServiceExchange) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register `activation` for `descriptor`. It runs once per remote
    /// request for that service. Registering again replaces the previous
    /// activation; handlers it already produced stay bound.
    pub fn provide<H, F>(&self, descriptor: &'static ServiceDescriptor, activation: F) -> RelayResult<()>
    where
        H: ServiceHandler + 'static,
        F: Fn(ServiceProxy) -> Arc<H> + Send + Sync + 'static,
    {
        let activation: Activation =
            Arc::new(move |client| activation(client) as Arc<dyn ServiceHandler>);
        self.provide_dyn(descriptor, activation)
    }

    /// Like [`ServiceExchange::provide`] for an already type-erased activation.
    pub fn provide_dyn(
        &self,
        descriptor: &'static ServiceDescriptor,
        activation: Activation,
    ) -> RelayResult<()> {
        self.ensure_open()?;
        // Lock order: unclaimed, then providers. Holding `unclaimed` across
        // the insert means a concurrent request either sees the provider or
        // is already queued for the drain below.
        let waiting: Vec<Endpoint> = {
            let mut unclaimed = self.inner.unclaimed.lock().unwrap_or_else(|e| e.into_inner());
            self.inner
                .providers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(
                    descriptor.name.to_string(),
                    Provider {
                        descriptor,
                        activation,
                    },
                );
            let (matched, rest): (Vec<_>, Vec<_>) = unclaimed
                .drain(..)
                .partition(|(name, _)| name == descriptor.name);
            *unclaimed = rest;
            matched.into_iter().map(|(_, endpoint)| endpoint).collect()
        };
        debug!(identifier = %self.inner.identifier, service = descriptor.name, "Providing service");
        for endpoint in waiting {
            self.inner.bind_requested(descriptor.name, endpoint);
        }
        Ok(())
    }

    /// Ask the far side for `descriptor`. Returns at once; calls on the
    /// proxy wait until the far side binds a handler.
    pub fn request(&self, descriptor: &'static ServiceDescriptor) -> RelayResult<ServiceProxy> {
        self.ensure_open()?;
        let channel = self.channel()?;
        let (local, remote) = pipe();
        let proxy = bind_proxy_with(local, descriptor, self.inner.options);
        let params = serde_json::to_value(ConnectToService {
            service_name: descriptor.name.to_string(),
        })
        .map_err(|e| RelayError::Decode(e.to_string()))?;
        if let Err(e) = channel.notify_with_endpoints("connectToService", params, vec![remote]) {
            proxy.close();
            return Err(if e.is_channel_closed() {
                RelayError::ExchangeClosed(self.inner.identifier.clone())
            } else {
                e
            });
        }

        let mut requested = self.inner.requested.lock().unwrap_or_else(|e| e.into_inner());
        requested.retain(|p| !p.is_closed());
        requested.push(proxy.clone());
        drop(requested);
        // A close that raced with us has already drained the list.
        if self.is_closed() {
            proxy.close();
            return Err(RelayError::ExchangeClosed(self.inner.identifier.clone()));
        }
        debug!(identifier = %self.inner.identifier, service = descriptor.name, "Requested service");
        Ok(proxy)
    }

    /// Close the connection and every requested proxy; calls still waiting
    /// on a reply fail with `ChannelClosed`. Bound handlers finish the calls
    /// they are serving before their endpoints close. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Number of handlers currently bound on behalf of the far side.
    pub fn bound_services(&self) -> usize {
        let mut bound = self.inner.bound.lock().unwrap_or_else(|e| e.into_inner());
        bound.retain(|b| !b.client.is_closed());
        bound.len()
    }

    /// Names of requested services still waiting for a provider.
    pub fn unclaimed_services(&self) -> Vec<String> {
        self.inner
            .unclaimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn ensure_open(&self) -> RelayResult<()> {
        if self.is_closed() {
            return Err(RelayError::ExchangeClosed(self.inner.identifier.clone()));
        }
        Ok(())
    }

    fn channel(&self) -> RelayResult<&ServiceProxy> {
        self.inner
            .channel
            .get()
            .ok_or_else(|| RelayError::ExchangeClosed(self.inner.identifier.clone()))
    }
}

impl ExchangeInner {
    fn bind_requested(&self, service: &str, endpoint: Endpoint) {
        if self.closed.load(Ordering::SeqCst) {
            endpoint.close();
            return;
        }
        let (descriptor, activation) = {
            // Checked and queued under one lock; see `provide_dyn`.
            let mut unclaimed = self.unclaimed.lock().unwrap_or_else(|e| e.into_inner());
            let provider = self
                .providers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(service)
                .map(|p| (p.descriptor, Arc::clone(&p.activation)));
            match provider {
                Some(provider) => provider,
                None => {
                    info!(identifier = %self.identifier, service, "No provider yet; holding request");
                    unclaimed.push((service.to_string(), endpoint));
                    return;
                }
            }
        };

        let (client, handler) =
            bind_stub_with(endpoint, descriptor, self.options, |client| activation(client));
        let mut bound = self.bound.lock().unwrap_or_else(|e| e.into_inner());
        bound.retain(|b| !b.client.is_closed());
        bound.push(BoundService {
            service: descriptor.name,
            client: client.clone(),
            _handler: handler,
        });
        drop(bound);
        if self.closed.load(Ordering::SeqCst) {
            client.close();
        }
        debug!(identifier = %self.identifier, service = descriptor.name, "Bound service");
    }

    fn close(&self) {
        self.shut_down(false);
    }

    /// The far side went away. Its replies may still be queued behind the
    /// control channel's closure, so requested proxies drain instead of
    /// failing their calls outright.
    fn close_by_peer(&self) {
        self.shut_down(true);
    }

    fn shut_down(&self, by_peer: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(channel) = self.channel.get() {
            channel.close();
        }
        let requested: Vec<ServiceProxy> = self
            .requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for proxy in requested {
            if by_peer {
                proxy.close_when_idle();
            } else {
                proxy.close();
            }
        }
        let bound: Vec<BoundService> = self
            .bound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for service in &bound {
            debug!(service = service.service, "Unbinding service");
            service.client.close_when_idle();
        }
        let unclaimed: Vec<(String, Endpoint)> = self
            .unclaimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for (_, endpoint) in unclaimed {
            endpoint.close();
        }
        self.providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!(identifier = %self.identifier, "Closed service exchange");
    }
}

#[async_trait]
impl ServiceHandler for ExchangeInner {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &SERVICE_PROVIDER
    }

    async fn handle(&self, method: &str, mut args: CallArgs) -> CallOutcome {
        match method {
            "connectToService" => {
                let request: ConnectToService = args.parse()?;
                let endpoint = args.take_endpoint()?;
                self.bind_requested(&request.service_name, endpoint);
                Ok(Value::Null)
            }
            other => Err(ApplicationError::unknown_method(SERVICE_PROVIDER.name, other)),
        }
    }
}

impl Drop for ExchangeInner {
    fn drop(&mut self) {
        self.close();
    }
}
