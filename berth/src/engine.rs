use std::{fmt, pin::Pin, sync::Arc};

use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Raw container log output, demultiplexed stdout/stderr.
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// Opaque failure from the container engine.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct EngineError {
    #[source]
    source: anyhow::Error,
}

impl EngineError {
    pub fn new(source: anyhow::Error) -> Self {
        Self { source }
    }

    pub fn msg(message: impl fmt::Display) -> Self {
        Self {
            source: anyhow::Error::msg(message.to_string()),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(source: anyhow::Error) -> Self {
        Self::new(source)
    }
}

/// Engine-side view of a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Engine state string, e.g. "created", "running", "exited".
    pub state: String,
}

/// Container engine operations the lifecycle handler depends on.
///
/// Implementations wrap one engine connection; log following opens a
/// dedicated connection through [`EngineConnector`] so a long-lived stream
/// never starves lifecycle calls.
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError>;

    async fn container_by_id(&self, id: &str) -> Result<Option<ContainerSummary>, EngineError>;

    async fn image_exists(&self, name: &str) -> Result<bool, EngineError>;

    async fn pull_image(&self, name: &str) -> Result<(), EngineError>;

    async fn remove_image(&self, name: &str) -> Result<(), EngineError>;

    /// Create a container and return its engine id. `port_specs` entries are
    /// formatted by [`port_spec`].
    async fn create_container(
        &self,
        name: &str,
        image: &str,
        env: &[String],
        port_specs: &[String],
    ) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    async fn container_logs(&self, id: &str, follow: bool) -> Result<LogStream, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Factory for engine connections.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn EngineClient>, EngineError>;
}

/// Publish format for one port mapping: `{bind}:{host}:{container}/tcp`.
pub fn port_spec(bind_address: &str, host_port: u16, container_port: u16) -> String {
    format!("{bind_address}:{host_port}:{container_port}/tcp")
}
