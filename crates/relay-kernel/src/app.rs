//! Application model: the trait applications implement, the context they
//! receive, and the running instance that owns their shell.

use crate::exchange::ServiceExchange;
use crate::manager::ApplicationManager;
use crate::resolver::ApplicationConnection;
use crate::shell::Shell;
use async_trait::async_trait;
use relay_types::{EndpointId, InstanceId, RelayResult};
use relay_wire::{BindOptions, Endpoint};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// An application hosted by the [`ApplicationManager`].
#[async_trait]
pub trait Application: Send + Sync {
    /// Called once after the application is loaded. Connections accepted
    /// before this returns are held until it does. An error quits the
    /// application.
    async fn initialize(&self, ctx: AppContext) -> RelayResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// A peer connected; `exchange` is this side of that connection.
    async fn accept_connection(&self, requestor: EndpointId, exchange: ServiceExchange) {
        let _ = (requestor, exchange);
    }
}

/// Everything an application gets to talk to the rest of the system.
#[derive(Clone)]
pub struct AppContext {
    id: InstanceId,
    args: Arc<[String]>,
    shell: Arc<Shell>,
    options: BindOptions,
    instance: Weak<AppInstance>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("id", &self.id)
            .field("url", self.url())
            .field("args", &self.args)
            .finish()
    }
}

impl AppContext {
    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    /// The URL this application was started for.
    pub fn url(&self) -> &EndpointId {
        self.shell.url()
    }

    /// Startup arguments. By convention `args[0]` is the application URL.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// This application's connection cache.
    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    /// Options the manager binds endpoints with; use them for endpoints the
    /// application binds itself.
    pub fn bind_options(&self) -> BindOptions {
        self.options
    }

    /// Stop the application: closes its shell and every inbound exchange,
    /// and removes it from the manager. Idempotent.
    pub fn quit(&self) {
        match self.instance.upgrade() {
            Some(instance) => instance.quit(),
            None => self.shell.close(),
        }
    }
}

/// A loaded application plus the state the manager keeps for it.
pub(crate) struct AppInstance {
    id: InstanceId,
    url: EndpointId,
    args: Arc<[String]>,
    shell: Arc<Shell>,
    app: Arc<dyn Application>,
    options: BindOptions,
    ready: watch::Sender<bool>,
    quit: watch::Sender<bool>,
    inbound: Mutex<Vec<ServiceExchange>>,
    manager: Weak<ApplicationManager>,
}

impl AppInstance {
    pub(crate) fn new(
        url: EndpointId,
        args: Vec<String>,
        shell: Shell,
        app: Arc<dyn Application>,
        options: BindOptions,
        manager: Weak<ApplicationManager>,
    ) -> Arc<Self> {
        let (ready, _) = watch::channel(false);
        let (quit, _) = watch::channel(false);
        Arc::new(Self {
            id: InstanceId::new(),
            url,
            args: args.into(),
            shell: Arc::new(shell),
            app,
            options,
            ready,
            quit,
            inbound: Mutex::new(Vec::new()),
            manager,
        })
    }

    pub(crate) fn id(&self) -> InstanceId {
        self.id
    }

    pub(crate) fn context(self: &Arc<Self>) -> AppContext {
        AppContext {
            id: self.id,
            args: Arc::clone(&self.args),
            shell: Arc::clone(&self.shell),
            options: self.options,
            instance: Arc::downgrade(self),
        }
    }

    /// Run `initialize` on its own task; connections wait for it.
    pub(crate) fn start(self: &Arc<Self>) {
        let instance = Arc::clone(self);
        tokio::spawn(async move {
            let ctx = instance.context();
            match instance.app.initialize(ctx).await {
                Ok(()) => {
                    instance.ready.send_replace(true);
                    debug!(url = %instance.url, "Application initialized");
                }
                Err(e) => {
                    warn!(url = %instance.url, error = %e, "Application failed to initialize");
                    instance.quit();
                }
            }
        });
    }

    pub(crate) fn has_quit(&self) -> bool {
        *self.quit.borrow()
    }

    pub(crate) fn quit(&self) {
        if self.quit.send_replace(true) {
            return;
        }
        self.shell.close();
        let inbound: Vec<ServiceExchange> = self
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for exchange in inbound {
            exchange.close();
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_instance(&self.url, self.id);
        }
        info!(url = %self.url, instance = %self.id, "Application quit");
    }

    async fn wait(&self) {
        let mut quit = self.quit.subscribe();
        let _ = quit.wait_for(|quit| *quit).await;
    }
}

impl ApplicationConnection for AppInstance {
    fn accept(&self, requestor: &EndpointId, endpoint: Endpoint) {
        if self.has_quit() {
            debug!(url = %self.url, requestor = %requestor, "Refusing connection; application quit");
            endpoint.close();
            return;
        }
        let exchange = ServiceExchange::new(requestor.clone(), endpoint, self.options);
        {
            let mut inbound = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
            inbound.retain(|x| !x.is_closed());
            inbound.push(exchange.clone());
        }

        let app = Arc::clone(&self.app);
        let mut ready = self.ready.subscribe();
        let mut quit = self.quit.subscribe();
        let requestor = requestor.clone();
        tokio::spawn(async move {
            let initialized = tokio::select! {
                biased;
                _ = async { quit.wait_for(|quit| *quit).await.is_ok() } => false,
                ok = async { ready.wait_for(|ready| *ready).await.is_ok() } => ok,
            };
            if !initialized {
                exchange.close();
                return;
            }
            app.accept_connection(requestor, exchange).await;
        });
    }
}

/// Handle to an application started with [`ApplicationManager::run`].
#[derive(Clone)]
pub struct RunningApplication {
    instance: Arc<AppInstance>,
}

impl std::fmt::Debug for RunningApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningApplication")
            .field("url", &self.instance.url)
            .field("id", &self.instance.id)
            .field("running", &self.is_running())
            .finish()
    }
}

impl RunningApplication {
    pub(crate) fn new(instance: Arc<AppInstance>) -> Self {
        Self { instance }
    }

    pub fn url(&self) -> &EndpointId {
        &self.instance.url
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance.id
    }

    /// The application's context, as handed to `initialize`.
    pub fn context(&self) -> AppContext {
        self.instance.context()
    }

    pub fn is_running(&self) -> bool {
        !self.instance.has_quit()
    }

    /// Quit the application. Idempotent.
    pub fn quit(&self) {
        self.instance.quit();
    }

    /// Wait until the application quits.
    pub async fn wait(&self) {
        self.instance.wait().await;
    }
}
