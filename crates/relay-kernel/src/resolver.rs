//! Module resolution: turning an endpoint identifier into a running
//! application that can accept a connection.

use async_trait::async_trait;
use relay_types::{EndpointId, RelayResult};
use relay_wire::Endpoint;
use std::sync::Arc;

/// Inbound connection point of a running application.
pub trait ApplicationConnection: Send + Sync {
    /// Accept a new connection from `requestor`. The application owns
    /// `endpoint` from here on.
    fn accept(&self, requestor: &EndpointId, endpoint: Endpoint);
}

/// Locates (or starts) the application behind an identifier.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    /// Resolve `identifier`. Fails with `RelayError::Resolution`.
    async fn resolve(&self, identifier: &EndpointId)
        -> RelayResult<Arc<dyn ApplicationConnection>>;
}
