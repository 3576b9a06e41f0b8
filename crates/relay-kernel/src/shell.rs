//! Shell: an application's connection cache.
//!
//! Every application instance gets one shell. `connect` returns the
//! service exchange for an identifier, resolving and connecting on the
//! first call and reusing the cached exchange afterwards.

use crate::exchange::{ExchangeInfo, ServiceExchange};
use crate::resolver::ModuleResolver;
use relay_types::{EndpointId, RelayError, RelayResult, ServiceDescriptor};
use relay_wire::{pipe, BindOptions, ServiceProxy};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use tracing::{debug, info};

/// Connection cache of one application instance.
pub struct Shell {
    url: EndpointId,
    resolver: Weak<dyn ModuleResolver>,
    options: BindOptions,
    exchanges: Mutex<HashMap<EndpointId, ServiceExchange>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("url", &self.url)
            .field("connections", &self.connections().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Shell {
    /// Create the shell of the application at `url`.
    pub fn new(url: EndpointId, resolver: Weak<dyn ModuleResolver>, options: BindOptions) -> Self {
        Self {
            url,
            resolver,
            options,
            exchanges: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Identifier of the application owning this shell.
    pub fn url(&self) -> &EndpointId {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Return the exchange connected to `identifier`, connecting first if
    /// needed. Only a miss suspends, and only while resolution runs.
    pub async fn connect(&self, identifier: impl Into<EndpointId>) -> RelayResult<ServiceExchange> {
        let identifier = identifier.into();
        if let Some(existing) = self.cached(&identifier)? {
            return Ok(existing);
        }

        let resolver = self.resolver.upgrade().ok_or_else(|| {
            RelayError::resolution(&identifier, "application manager is no longer running")
        })?;
        let connection = resolver.resolve(&identifier).await?;

        let (local, remote) = pipe();
        let exchange = {
            let mut exchanges = self.exchanges.lock().unwrap_or_else(|e| e.into_inner());
            if self.is_closed() {
                return Err(RelayError::ShellClosed(self.url.clone()));
            }
            // Another connect may have finished while we were resolving.
            if let Some(existing) = exchanges.get(&identifier).filter(|x| !x.is_closed()) {
                debug!(from = %self.url, to = %identifier, "Connection raced; reusing cached exchange");
                return Ok(existing.clone());
            }
            let exchange = ServiceExchange::new(identifier.clone(), local, self.options);
            exchanges.insert(identifier.clone(), exchange.clone());
            exchange
        };
        connection.accept(&self.url, remote);
        info!(from = %self.url, to = %identifier, "Connected");
        Ok(exchange)
    }

    /// Connect to `identifier` and request `descriptor` from it.
    pub async fn connect_service(
        &self,
        identifier: impl Into<EndpointId>,
        descriptor: &'static ServiceDescriptor,
    ) -> RelayResult<ServiceProxy> {
        self.connect(identifier).await?.request(descriptor)
    }

    /// Close every cached exchange and clear the cache. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let exchanges: Vec<ServiceExchange> = self
            .exchanges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, exchange)| exchange)
            .collect();
        for exchange in &exchanges {
            exchange.close();
        }
        info!(url = %self.url, closed = exchanges.len(), "Shell closed");
    }

    /// Snapshot of the cached exchanges.
    pub fn connections(&self) -> Vec<ExchangeInfo> {
        let mut infos: Vec<ExchangeInfo> = self
            .exchanges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(ServiceExchange::info)
            .collect();
        infos.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        infos
    }

    /// Whether an open exchange to `identifier` is cached.
    pub fn contains(&self, identifier: &EndpointId) -> bool {
        self.exchanges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identifier)
            .is_some_and(|x| !x.is_closed())
    }

    fn cached(&self, identifier: &EndpointId) -> RelayResult<Option<ServiceExchange>> {
        if self.is_closed() {
            return Err(RelayError::ShellClosed(self.url.clone()));
        }
        let mut exchanges = self.exchanges.lock().unwrap_or_else(|e| e.into_inner());
        match exchanges.get(identifier) {
            Some(existing) if !existing.is_closed() => Ok(Some(existing.clone())),
            Some(_) => {
                debug!(from = %self.url, to = %identifier, "Dropping closed exchange from cache");
                exchanges.remove(identifier);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.close();
    }
}
