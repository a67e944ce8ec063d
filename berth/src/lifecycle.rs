use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::{
    DynError,
    component::{PullPolicy, ValueResolver},
    container::Container,
    context::{EnvironmentContext, normalize_name},
    engine::{EngineClient, EngineConnector, EngineError, port_spec},
    resolver::EnvironmentValueResolver,
};

/// Failures driving a container through its lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("engine {operation} failed for '{component}': {source}")]
    Engine {
        component: String,
        operation: &'static str,
        #[source]
        source: EngineError,
    },
    #[error("container id for '{component}' is not set")]
    MissingContainerId { component: String },
    #[error("container '{id}' does not exist")]
    ContainerNotFound { id: String },
    #[error("image '{image}' is not present locally")]
    ImageNotPresent { image: String },
    #[error("{hook} hook of '{component}' failed: {source}")]
    Hook {
        component: String,
        hook: &'static str,
        #[source]
        source: DynError,
    },
}

/// Drives containers through Absent, Created, Running, Stopped and back.
/// Every operation is idempotent with respect to the state it targets.
pub(crate) struct LifecycleHandler {
    client: Arc<dyn EngineClient>,
    connector: Arc<dyn EngineConnector>,
    context: Arc<EnvironmentContext>,
    resolver: Arc<EnvironmentValueResolver>,
}

impl LifecycleHandler {
    pub(crate) fn new(
        client: Arc<dyn EngineClient>,
        connector: Arc<dyn EngineConnector>,
        context: Arc<EnvironmentContext>,
        resolver: Arc<EnvironmentValueResolver>,
    ) -> Self {
        Self {
            client,
            connector,
            context,
            resolver,
        }
    }

    /// Ensure a container exists on the engine. Reuses an already created
    /// container; a stored id the engine no longer knows is discarded and the
    /// container is created anew.
    pub(crate) async fn create(&self, container: &Container) -> Result<(), LifecycleError> {
        let component = container.component();
        let name = component.name();
        let stored = container.container_id();
        if !stored.is_empty() {
            if self.container_exists(name, &stored).await? {
                debug!(component = name, "container already created");
                return Ok(());
            }
            debug!(component = name, id = stored, "stored container is gone from the engine");
            container.clear_container_id();
        }

        self.ensure_image(name, component.image(), component.pull_policy())
            .await?;

        let env: Vec<String> = container
            .resolved_env()
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        let port_specs: Vec<String> = container
            .port_bindings()
            .unwrap_or_default()
            .iter()
            .map(|binding| {
                port_spec(self.context.host(), binding.host_port, binding.container_port)
            })
            .collect();
        // Engine names are namespaced per environment instance.
        let engine_name = normalize_name(&format!("{name}-{}", self.context.id()));

        let id = self
            .client
            .create_container(&engine_name, component.image(), &env, &port_specs)
            .await
            .map_err(|source| LifecycleError::Engine {
                component: name.to_owned(),
                operation: "create",
                source,
            })?;
        container.set_container_id(&id);
        info!(component = name, id, "container created");
        Ok(())
    }

    /// Start a container, creating it first when necessary. A container that
    /// is already running is left alone.
    pub(crate) async fn start(&self, container: &Container) -> Result<(), LifecycleError> {
        let component = container.component();
        let name = component.name();

        self.create(container).await?;
        if self.is_running(container).await? {
            debug!(component = name, "container already running");
            return Ok(());
        }

        self.run_hook(name, "before start", component.before_start())
            .await?;

        let id = container.container_id();
        if let Err(source) = self.client.start_container(&id).await {
            self.fetch_logs(name, &id).await;
            return Err(LifecycleError::Engine {
                component: name.to_owned(),
                operation: "start",
                source,
            });
        }
        info!(component = name, id, "container started");

        if component.follow_logs() {
            self.follow_logs(container).await?;
        }

        self.run_hook(name, "after start", component.after_start())
            .await?;
        Ok(())
    }

    pub(crate) async fn is_running(&self, container: &Container) -> Result<bool, LifecycleError> {
        let id = container.container_id();
        if id.is_empty() {
            return Err(LifecycleError::MissingContainerId {
                component: container.component().name().to_owned(),
            });
        }
        let summary = self
            .client
            .container_by_id(&id)
            .await
            .map_err(|source| LifecycleError::Engine {
                component: container.component().name().to_owned(),
                operation: "inspect",
                source,
            })?
            .ok_or(LifecycleError::ContainerNotFound { id })?;
        Ok(summary.state.eq_ignore_ascii_case("running"))
    }

    /// Stop a running container. A container that was never created or is not
    /// running is left alone.
    pub(crate) async fn stop(&self, container: &Container) -> Result<(), LifecycleError> {
        let name = container.component().name();
        let id = container.container_id();
        if id.is_empty() {
            debug!(component = name, "nothing to stop");
            return Ok(());
        }
        if !self.is_running(container).await? {
            debug!(component = name, "container not running");
            return Ok(());
        }
        self.client
            .stop_container(&id)
            .await
            .map_err(|source| LifecycleError::Engine {
                component: name.to_owned(),
                operation: "stop",
                source,
            })?;
        info!(component = name, id, "container stopped");
        Ok(())
    }

    /// Remove the container from the engine and return the component to the
    /// absent state. Safe to call for components that were never created.
    pub(crate) async fn destroy(&self, container: &Container) -> Result<(), LifecycleError> {
        container.stop_follow_logs();

        let component = container.component();
        let name = component.name();
        let id = container.container_id();
        if id.is_empty() {
            debug!(component = name, "nothing to destroy");
            return Ok(());
        }

        let summary = self
            .client
            .container_by_id(&id)
            .await
            .map_err(|source| LifecycleError::Engine {
                component: name.to_owned(),
                operation: "inspect",
                source,
            })?;
        if let Some(summary) = summary {
            if summary.state.eq_ignore_ascii_case("running") {
                self.client
                    .stop_container(&id)
                    .await
                    .map_err(|source| LifecycleError::Engine {
                        component: name.to_owned(),
                        operation: "stop",
                        source,
                    })?;
            }
            self.client
                .remove_container(&id)
                .await
                .map_err(|source| LifecycleError::Engine {
                    component: name.to_owned(),
                    operation: "remove",
                    source,
                })?;
        }
        // The component can be started again from scratch afterwards.
        container.clear_container_id();
        info!(component = name, id, "container destroyed");

        if component.remove_image_after_destroy() {
            self.client
                .remove_image(component.image())
                .await
                .map_err(|source| LifecycleError::Engine {
                    component: name.to_owned(),
                    operation: "remove image",
                    source,
                })?;
            info!(component = name, image = component.image(), "image removed");
        }
        Ok(())
    }

    /// Stop all log followers and release the engine connection.
    pub(crate) async fn close(&self) {
        for container in self.context.containers() {
            container.stop_follow_logs();
        }
        if let Err(error) = self.client.close().await {
            warn!(%error, "failed to close engine client");
        }
    }

    async fn container_exists(&self, component: &str, id: &str) -> Result<bool, LifecycleError> {
        Ok(self
            .client
            .container_by_id(id)
            .await
            .map_err(|source| LifecycleError::Engine {
                component: component.to_owned(),
                operation: "inspect",
                source,
            })?
            .is_some())
    }

    async fn ensure_image(
        &self,
        component: &str,
        image: &str,
        policy: PullPolicy,
    ) -> Result<(), LifecycleError> {
        let exists = self
            .client
            .image_exists(image)
            .await
            .map_err(|source| LifecycleError::Engine {
                component: component.to_owned(),
                operation: "image inspect",
                source,
            })?;

        match policy {
            PullPolicy::LocalOnly => {
                if exists {
                    Ok(())
                } else {
                    Err(LifecycleError::ImageNotPresent {
                        image: image.to_owned(),
                    })
                }
            }
            PullPolicy::Pull => match self.client.pull_image(image).await {
                Ok(()) => Ok(()),
                Err(error) if exists => {
                    warn!(component, image, %error, "pull failed, using local image");
                    Ok(())
                }
                Err(source) => Err(LifecycleError::Engine {
                    component: component.to_owned(),
                    operation: "pull",
                    source,
                }),
            },
        }
    }

    async fn run_hook(
        &self,
        component: &str,
        hook: &'static str,
        callback: Option<&Arc<dyn crate::component::Callback>>,
    ) -> Result<(), LifecycleError> {
        let Some(callback) = callback else {
            return Ok(());
        };
        debug!(component, hook, "running hook");
        let resolver: &dyn ValueResolver = self.resolver.as_ref();
        callback
            .call(component, resolver)
            .await
            .map_err(|source| LifecycleError::Hook {
                component: component.to_owned(),
                hook,
                source,
            })
    }

    /// Stream container output line by line into the log until the container
    /// is destroyed or the stream ends. Uses a dedicated engine connection so
    /// a long follow never blocks lifecycle calls.
    async fn follow_logs(&self, container: &Container) -> Result<(), LifecycleError> {
        let name = container.component().name().to_owned();
        let id = container.container_id();

        let follower = self
            .connector
            .connect()
            .await
            .map_err(|source| LifecycleError::Engine {
                component: name.clone(),
                operation: "connect log follower",
                source,
            })?;
        let stream = follower
            .container_logs(&id, true)
            .await
            .map_err(|source| LifecycleError::Engine {
                component: name.clone(),
                operation: "follow logs",
                source,
            })?;

        let token = container.begin_log_follow();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            info!(target: "berth::container", component = name, "{line}");
                        }
                        Ok(None) => break,
                        Err(error) => {
                            warn!(component = name, %error, "log stream failed");
                            break;
                        }
                    },
                }
            }
            if let Err(error) = follower.close().await {
                warn!(component = name, %error, "failed to close log follower");
            }
        });
        Ok(())
    }

    /// Best effort dump of recent container output after a failed start.
    async fn fetch_logs(&self, component: &str, id: &str) {
        match self.client.container_logs(id, false).await {
            Ok(stream) => {
                let mut lines = BufReader::new(stream).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    error!(target: "berth::container", component, "{line}");
                }
            }
            Err(error) => warn!(component, %error, "failed to fetch container logs"),
        }
    }
}
