//! Loader for the applications compiled into this crate.

use crate::echo_client::EchoClient;
use crate::echo_server::EchoServer;
use crate::pingpong_app::PingPongApp;
use crate::share_echo::{ShareEcho, ShareEchoTarget};
use async_trait::async_trait;
use relay_kernel::{Application, ApplicationLoader, ApplicationManager};
use relay_types::{EndpointId, RelayError, RelayResult};
use std::sync::Arc;

/// URL scheme the bundled applications live under.
pub const BUNDLED_SCHEME: &str = "mojo";

/// Names of the bundled applications, as in `mojo:<name>`.
pub const BUNDLED_APPS: &[&str] = &[
    "echo_client",
    "echo_server",
    "pingpong",
    "pingpong_target",
    "share_echo",
    "share_echo_target",
];

/// Instantiates bundled applications by name. A fresh instance is built
/// for every load.
#[derive(Debug, Default, Clone, Copy)]
pub struct BundledLoader;

impl BundledLoader {
    fn instantiate(name: &str) -> Option<Arc<dyn Application>> {
        let app: Arc<dyn Application> = match name {
            "echo_client" => Arc::new(EchoClient::new()),
            "echo_server" => Arc::new(EchoServer::new()),
            "pingpong" | "pingpong_target" => Arc::new(PingPongApp::new()),
            "share_echo" => Arc::new(ShareEcho::new()),
            "share_echo_target" => Arc::new(ShareEchoTarget::new()),
            _ => return None,
        };
        Some(app)
    }
}

#[async_trait]
impl ApplicationLoader for BundledLoader {
    async fn load(&self, url: &EndpointId) -> RelayResult<Arc<dyn Application>> {
        let key = url.without_query();
        let name = key
            .as_str()
            .strip_prefix(BUNDLED_SCHEME)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or_default();
        Self::instantiate(name)
            .ok_or_else(|| RelayError::resolution(url, "no bundled application with that name"))
    }
}

/// Serve the bundled applications for the `mojo:` scheme.
pub fn register_bundled(manager: &ApplicationManager) {
    manager.set_loader_for_scheme(BUNDLED_SCHEME, Arc::new(BundledLoader));
}

/// `mojo:` URLs of every bundled application.
pub fn bundled_urls() -> Vec<EndpointId> {
    BUNDLED_APPS
        .iter()
        .map(|name| EndpointId::new(format!("{BUNDLED_SCHEME}:{name}")))
        .collect()
}
