use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::{
    component::Component,
    container::Container,
    context::EnvironmentContext,
    engine::EngineConnector,
    errors::{ConfigError, EnvironmentError},
    lifecycle::LifecycleHandler,
    net::detect_bind_address,
    ports::configure_port_bindings,
    resolver::EnvironmentValueResolver,
};

/// Callback run once at the start of shutdown, before containers are
/// destroyed.
pub type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

/// Declares the component set and engine connection for an [`Environment`].
pub struct EnvironmentBuilder {
    components: Vec<Component>,
    bind_address: Option<String>,
}

impl EnvironmentBuilder {
    fn new() -> Self {
        Self {
            components: Vec::new(),
            bind_address: None,
        }
    }

    #[must_use]
    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    /// Override bind-address discovery with a fixed address.
    #[must_use]
    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = Some(address.into());
        self
    }

    /// Validate the declaration, claim host ports for every component,
    /// resolve all environment templates, and connect the engine. No
    /// container is touched yet.
    pub async fn build(
        self,
        connector: Arc<dyn EngineConnector>,
    ) -> Result<Environment, EnvironmentError> {
        if self.components.is_empty() {
            return Err(ConfigError::EmptyComponentList.into());
        }

        let host = match self.bind_address {
            Some(address) => address,
            None => detect_bind_address(),
        };
        let mut context = EnvironmentContext::new(host);
        for component in self.components {
            context.add_container(component)?;
        }
        let context = Arc::new(context);

        configure_port_bindings(&context)?;

        let resolver = Arc::new(EnvironmentValueResolver::new(Arc::clone(&context)));
        resolver.configure_containers_env()?;

        let client = connector
            .connect()
            .await
            .map_err(|source| EnvironmentError::Connect { source })?;
        let lifecycle = LifecycleHandler::new(
            client,
            connector,
            Arc::clone(&context),
            Arc::clone(&resolver),
        );

        info!(
            id = context.id(),
            host = context.host(),
            components = context.len(),
            "environment ready"
        );
        Ok(Environment {
            inner: Arc::new(Inner {
                context,
                resolver,
                lifecycle,
                shutdown_fired: AtomicBool::new(false),
            }),
        })
    }
}

/// Handle to one declared container environment. Cheap to clone; all clones
/// share the same containers and shutdown latch.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<Inner>,
}

struct Inner {
    context: Arc<EnvironmentContext>,
    resolver: Arc<EnvironmentValueResolver>,
    lifecycle: LifecycleHandler,
    shutdown_fired: AtomicBool,
}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::new()
    }

    /// Build an environment from a plain component list.
    pub async fn new(
        connector: Arc<dyn EngineConnector>,
        components: Vec<Component>,
    ) -> Result<Self, EnvironmentError> {
        let mut builder = Self::builder();
        for component in components {
            builder = builder.with_component(component);
        }
        builder.build(connector).await
    }

    /// Start the named components one after another, in the given order.
    /// Fails on the first component that cannot start.
    pub async fn start(&self, names: &[&str]) -> Result<(), EnvironmentError> {
        for container in self.select("start", names)? {
            self.inner.lifecycle.start(&container).await?;
        }
        Ok(())
    }

    /// Start the named components concurrently. Returns the first failure
    /// without waiting for the remaining starts; those keep running and are
    /// cleaned up by shutdown.
    pub async fn start_parallel(&self, names: &[&str]) -> Result<(), EnvironmentError> {
        let containers = self.select("start in parallel", names)?;
        let (tx, mut rx) = mpsc::channel(containers.len());

        for container in containers {
            let environment = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = environment.inner.lifecycle.start(&container).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        while let Some(result) = rx.recv().await {
            result?;
        }
        Ok(())
    }

    /// Stop the named components. Containers keep their identity and can be
    /// started again.
    pub async fn stop(&self, names: &[&str]) -> Result<(), EnvironmentError> {
        for container in self.select("stop", names)? {
            self.inner.lifecycle.stop(&container).await?;
        }
        Ok(())
    }

    /// Remove the named components' containers from the engine.
    pub async fn destroy(&self, names: &[&str]) -> Result<(), EnvironmentError> {
        for container in self.select("destroy", names)? {
            self.inner.lifecycle.destroy(&container).await?;
        }
        Ok(())
    }

    /// Evaluate a template against the environment's variable key space.
    pub fn resolve(&self, template: &str) -> Result<String, EnvironmentError> {
        Ok(self.inner.resolver.resolve_template(template)?)
    }

    /// Bind/advertise address shared by all components.
    pub fn host(&self) -> &str {
        self.inner.context.host()
    }

    /// Host port assigned to a component port; an empty `port_name` selects
    /// the component's default port.
    pub fn port(&self, component: &str, port_name: &str) -> Result<u16, EnvironmentError> {
        Ok(self.inner.resolver.host_port(component, port_name)?)
    }

    /// Destroy every container and release the engine connection. Only the
    /// first call does anything; later calls return immediately.
    pub async fn shutdown(&self) {
        self.shutdown_with(Vec::new()).await;
    }

    /// [`shutdown`](Self::shutdown) preceded by caller hooks.
    pub async fn shutdown_with(&self, hooks: Vec<ShutdownHook>) {
        if self
            .inner
            .shutdown_fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        info!("shutting down environment");
        for hook in hooks {
            hook();
        }
        for container in self.inner.context.containers() {
            if let Err(error) = self.inner.lifecycle.destroy(container).await {
                error!(
                    component = container.component().name(),
                    %error,
                    "failed to destroy container during shutdown"
                );
            }
        }
        self.inner.lifecycle.close().await;
    }

    /// Install a signal-driven shutdown. On SIGINT or SIGTERM the hooks run
    /// and all containers are destroyed; the returned receiver fires once
    /// teardown finished.
    pub fn with_shutdown(&self, hooks: Vec<ShutdownHook>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let environment = self.clone();
        tokio::spawn(async move {
            wait_for_termination().await;
            environment.shutdown_with(hooks).await;
            let _ = tx.send(());
        });
        rx
    }

    fn select(
        &self,
        operation: &'static str,
        names: &[&str],
    ) -> Result<Vec<Arc<Container>>, EnvironmentError> {
        if names.is_empty() {
            return Err(ConfigError::NoComponentProvided { operation }.into());
        }
        // Resolve every name before any engine call so a typo cannot leave
        // the batch half applied.
        let mut containers = Vec::with_capacity(names.len());
        for name in names {
            containers.push(Arc::clone(self.inner.context.container(name)?));
        }
        Ok(containers)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.inner.context.id())
            .field("host", &self.inner.context.host())
            .field("components", &self.inner.context.len())
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = terminate.recv() => info!("received SIGTERM"),
            }
        }
        Err(error) => {
            warn!(%error, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to wait for ctrl-c");
    }
}
