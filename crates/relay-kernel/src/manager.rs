//! Application manager: loads applications by URL and resolves
//! identifiers for every shell it hands out.
//!
//! Resolution applies URL mappings, reuses a running instance for the
//! query-stripped URL, and otherwise asks the loaders in order: the loader
//! registered for the exact URL, then the one for its scheme, then the
//! default loader.

use crate::app::{AppInstance, Application, RunningApplication};
use crate::resolver::{ApplicationConnection, ModuleResolver};
use crate::shell::Shell;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_types::config::RelayConfig;
use relay_types::{EndpointId, InstanceId, RelayError, RelayResult};
use relay_wire::BindOptions;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, info};

/// Mapping chains longer than this are treated as cycles.
const MAX_MAPPING_DEPTH: usize = 16;

/// Produces an application for a URL.
#[async_trait]
pub trait ApplicationLoader: Send + Sync {
    async fn load(&self, url: &EndpointId) -> RelayResult<Arc<dyn Application>>;
}

/// Loader backed by a closure.
pub struct FnLoader<F> {
    load: F,
}

impl<F> FnLoader<F>
where
    F: Fn(&EndpointId) -> RelayResult<Arc<dyn Application>> + Send + Sync,
{
    pub fn new(load: F) -> Self {
        Self { load }
    }
}

#[async_trait]
impl<F> ApplicationLoader for FnLoader<F>
where
    F: Fn(&EndpointId) -> RelayResult<Arc<dyn Application>> + Send + Sync,
{
    async fn load(&self, url: &EndpointId) -> RelayResult<Arc<dyn Application>> {
        (self.load)(url)
    }
}

/// Loads, tracks and resolves applications.
pub struct ApplicationManager {
    me: Weak<ApplicationManager>,
    options: BindOptions,
    url_loaders: DashMap<EndpointId, Arc<dyn ApplicationLoader>>,
    scheme_loaders: DashMap<String, Arc<dyn ApplicationLoader>>,
    default_loader: RwLock<Option<Arc<dyn ApplicationLoader>>>,
    args: DashMap<EndpointId, Vec<String>>,
    mappings: DashMap<EndpointId, EndpointId>,
    running: DashMap<EndpointId, Arc<AppInstance>>,
}

impl ApplicationManager {
    /// Create a manager with default options.
    pub fn new() -> Arc<Self> {
        Self::with_options(BindOptions::default())
    }

    pub fn with_options(options: BindOptions) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            options,
            url_loaders: DashMap::new(),
            scheme_loaders: DashMap::new(),
            default_loader: RwLock::new(None),
            args: DashMap::new(),
            mappings: DashMap::new(),
            running: DashMap::new(),
        })
    }

    /// Create a manager configured from `config`: message size limit,
    /// URL mappings and per-application arguments.
    pub fn with_config(config: &RelayConfig) -> Arc<Self> {
        let manager = Self::with_options(BindOptions {
            max_message_size: config.max_message_size,
        });
        for (from, to) in &config.mappings {
            manager.add_url_mapping(from.as_str(), to.as_str());
        }
        for (url, app) in &config.apps {
            manager.set_args_for_url(url.as_str(), app.args.clone());
        }
        manager
    }

    pub fn set_loader_for_url(
        &self,
        url: impl Into<EndpointId>,
        loader: Arc<dyn ApplicationLoader>,
    ) {
        self.url_loaders.insert(url.into(), loader);
    }

    pub fn set_loader_for_scheme(&self, scheme: impl Into<String>, loader: Arc<dyn ApplicationLoader>) {
        self.scheme_loaders.insert(scheme.into(), loader);
    }

    pub fn set_default_loader(&self, loader: Arc<dyn ApplicationLoader>) {
        *self.default_loader.write().unwrap_or_else(|e| e.into_inner()) = Some(loader);
    }

    /// Arguments passed to the application at `url` when it starts.
    pub fn set_args_for_url(&self, url: impl Into<EndpointId>, args: Vec<String>) {
        self.args.insert(url.into(), args);
    }

    /// Resolve `from` as if it were `to`.
    pub fn add_url_mapping(&self, from: impl Into<EndpointId>, to: impl Into<EndpointId>) {
        self.mappings.insert(from.into(), to.into());
    }

    /// A shell not owned by any application, for code driving the manager
    /// from outside (launchers, tests).
    pub fn create_shell(&self, url: impl Into<EndpointId>) -> Shell {
        Shell::new(url.into(), self.resolver(), self.options)
    }

    /// Start (or find) the application for `identifier`.
    pub async fn run(&self, identifier: impl Into<EndpointId>) -> RelayResult<RunningApplication> {
        let instance = self.launch(&identifier.into()).await?;
        Ok(RunningApplication::new(instance))
    }

    /// URLs of the running applications, sorted.
    pub fn running(&self) -> Vec<EndpointId> {
        let mut urls: Vec<EndpointId> = self.running.iter().map(|e| e.key().clone()).collect();
        urls.sort();
        urls
    }

    pub fn is_running(&self, identifier: &EndpointId) -> bool {
        let url = self.map_url(identifier);
        self.running.contains_key(&url.without_query())
    }

    /// Quit every running application.
    pub fn shutdown(&self) {
        let instances: Vec<Arc<AppInstance>> =
            self.running.iter().map(|e| Arc::clone(e.value())).collect();
        info!(count = instances.len(), "Shutting down applications");
        for instance in instances {
            instance.quit();
        }
    }

    pub(crate) fn remove_instance(&self, url: &EndpointId, id: InstanceId) {
        self.running
            .remove_if(&url.without_query(), |_, instance| instance.id() == id);
    }

    fn resolver(&self) -> Weak<dyn ModuleResolver> {
        self.me.clone() as Weak<dyn ModuleResolver>
    }

    fn map_url(&self, identifier: &EndpointId) -> EndpointId {
        let mut url = identifier.clone();
        for _ in 0..MAX_MAPPING_DEPTH {
            match self.mappings.get(&url) {
                Some(to) if *to != url => url = to.clone(),
                _ => break,
            }
        }
        url
    }

    fn loader_for(&self, url: &EndpointId, key: &EndpointId) -> Option<Arc<dyn ApplicationLoader>> {
        if let Some(loader) = self.url_loaders.get(url).or_else(|| self.url_loaders.get(key)) {
            return Some(Arc::clone(loader.value()));
        }
        if let Some(loader) = url.scheme().and_then(|s| self.scheme_loaders.get(s)) {
            return Some(Arc::clone(loader.value()));
        }
        self.default_loader
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn args_for(&self, url: &EndpointId, key: &EndpointId) -> Vec<String> {
        self.args
            .get(url)
            .or_else(|| self.args.get(key))
            .map(|args| args.value().clone())
            .unwrap_or_else(|| vec![url.to_string()])
    }

    async fn launch(&self, identifier: &EndpointId) -> RelayResult<Arc<AppInstance>> {
        let url = self.map_url(identifier);
        if url != *identifier {
            debug!(from = %identifier, to = %url, "Applied URL mapping");
        }
        let key = url.without_query();
        if let Some(instance) = self.running.get(&key) {
            return Ok(Arc::clone(instance.value()));
        }

        let loader = self
            .loader_for(&url, &key)
            .ok_or_else(|| RelayError::resolution(identifier, "no loader for URL or scheme"))?;
        let app = loader.load(&url).await.map_err(|e| match e {
            RelayError::Resolution { .. } => e,
            other => RelayError::resolution(identifier, other.to_string()),
        })?;

        let instance = match self.running.entry(key.clone()) {
            // Loaded concurrently; keep the first instance.
            Entry::Occupied(existing) => return Ok(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                let shell = Shell::new(url.clone(), self.resolver(), self.options);
                let instance = AppInstance::new(
                    url.clone(),
                    self.args_for(&url, &key),
                    shell,
                    app,
                    self.options,
                    self.me.clone(),
                );
                slot.insert(Arc::clone(&instance));
                instance
            }
        };
        info!(url = %url, instance = %instance.id(), "Started application");
        instance.start();
        Ok(instance)
    }
}

#[async_trait]
impl ModuleResolver for ApplicationManager {
    async fn resolve(&self, identifier: &EndpointId) -> RelayResult<Arc<dyn ApplicationConnection>> {
        let instance = self.launch(identifier).await?;
        Ok(instance as Arc<dyn ApplicationConnection>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppContext;
    use std::sync::Mutex;

    /// Records the args it was initialized with.
    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    }

    #[async_trait]
    impl Application for Recorder {
        async fn initialize(&self, ctx: AppContext) -> RelayResult<()> {
            self.seen
                .lock()
                .unwrap()
                .push((self.name.to_string(), ctx.args().to_vec()));
            Ok(())
        }
    }

    fn recorder_loader(
        name: &'static str,
        seen: &Arc<Mutex<Vec<(String, Vec<String>)>>>,
    ) -> Arc<dyn ApplicationLoader> {
        let seen = Arc::clone(seen);
        Arc::new(FnLoader::new(move |_url: &EndpointId| {
            Ok(Arc::new(Recorder {
                name,
                seen: Arc::clone(&seen),
            }) as Arc<dyn Application>)
        }))
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_loader_precedence() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = ApplicationManager::new();
        manager.set_default_loader(recorder_loader("default", &seen));
        manager.set_loader_for_scheme("mojo", recorder_loader("scheme", &seen));
        manager.set_loader_for_url("mojo:special", recorder_loader("url", &seen));

        manager.run("mojo:special").await.unwrap();
        manager.run("mojo:other").await.unwrap();
        manager.run("file:///app.js").await.unwrap();
        settle().await;

        let names: Vec<String> = seen.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["url", "scheme", "default"]);
    }

    #[tokio::test]
    async fn test_unknown_url_is_resolution_error() {
        let manager = ApplicationManager::new();
        let err = manager.run("bad:identifier").await.unwrap_err();
        assert!(matches!(err, RelayError::Resolution { .. }));
        assert!(manager.running().is_empty());
    }

    #[tokio::test]
    async fn test_loader_error_becomes_resolution_error() {
        let manager = ApplicationManager::new();
        manager.set_loader_for_scheme(
            "broken",
            Arc::new(FnLoader::new(|_url: &EndpointId| {
                Err(RelayError::Config("missing entry point".to_string()))
            })),
        );
        match manager.run("broken:app").await {
            Err(RelayError::Resolution { reason, .. }) => assert!(reason.contains("entry point")),
            other => panic!("Expected resolution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mappings_and_args() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = ApplicationManager::new();
        manager.set_loader_for_scheme("mojo", recorder_loader("scheme", &seen));
        manager.add_url_mapping("mojo:alias", "mojo:target");
        manager.set_args_for_url("mojo:target", vec!["mojo:target".into(), "--flag".into()]);

        let app = manager.run("mojo:alias").await.unwrap();
        settle().await;
        assert_eq!(app.url().as_str(), "mojo:target");
        assert!(manager.is_running(&EndpointId::from("mojo:alias")));
        assert_eq!(seen.lock().unwrap()[0].1, vec!["mojo:target", "--flag"]);

        manager.run("mojo:plain").await.unwrap();
        settle().await;
        assert_eq!(seen.lock().unwrap()[1].1, vec!["mojo:plain"]);
    }

    #[tokio::test]
    async fn test_mapping_cycle_terminates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = ApplicationManager::new();
        manager.set_default_loader(recorder_loader("default", &seen));
        manager.add_url_mapping("a:x", "b:x");
        manager.add_url_mapping("b:x", "a:x");
        assert!(manager.run("a:x").await.is_ok());
    }

    #[tokio::test]
    async fn test_query_stripped_url_reuses_instance() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = ApplicationManager::new();
        manager.set_default_loader(recorder_loader("default", &seen));
        let first = manager.run("mojo:app?x=1").await.unwrap();
        let second = manager.run("mojo:app?x=2").await.unwrap();
        assert_eq!(first.instance_id(), second.instance_id());
        assert_eq!(manager.running(), vec![EndpointId::from("mojo:app")]);
    }

    #[tokio::test]
    async fn test_quit_closes_shell_and_unregisters() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = ApplicationManager::new();
        manager.set_default_loader(recorder_loader("default", &seen));
        let app = manager.run("mojo:a").await.unwrap();
        let ctx = app.context();
        ctx.shell().connect("mojo:b").await.unwrap();
        assert_eq!(ctx.shell().connections().len(), 1);

        ctx.quit();
        ctx.quit();
        assert!(!app.is_running());
        assert!(ctx.shell().is_closed());
        assert!(!manager.is_running(&EndpointId::from("mojo:a")));
        assert!(manager.is_running(&EndpointId::from("mojo:b")));
        app.wait().await;

        // A fresh run starts a new instance.
        let again = manager.run("mojo:a").await.unwrap();
        assert_ne!(again.instance_id(), app.instance_id());
    }

    #[tokio::test]
    async fn test_shutdown_quits_everything() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = ApplicationManager::new();
        manager.set_default_loader(recorder_loader("default", &seen));
        let a = manager.run("mojo:a").await.unwrap();
        let b = manager.run("mojo:b").await.unwrap();
        manager.shutdown();
        assert!(!a.is_running());
        assert!(!b.is_running());
        assert!(manager.running().is_empty());
    }

    #[tokio::test]
    async fn test_with_config() {
        let config: RelayConfig = toml::from_str(
            r#"
            max_message_size = 4096

            [mappings]
            "mojo:echo" = "mojo:echo_server"

            [apps."mojo:echo_server"]
            args = ["mojo:echo_server", "loud"]
            "#,
        )
        .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = ApplicationManager::with_config(&config);
        manager.set_default_loader(recorder_loader("default", &seen));
        let app = manager.run("mojo:echo").await.unwrap();
        settle().await;
        assert_eq!(app.url().as_str(), "mojo:echo_server");
        assert_eq!(seen.lock().unwrap()[0].1, vec!["mojo:echo_server", "loud"]);
        // Applications bind their own endpoints with the configured limit.
        assert_eq!(app.context().bind_options().max_message_size, 4096);
    }
}
