use crate::{
    engine::EngineError, lifecycle::LifecycleError, ports::AllocationError,
    resolver::ResolveError,
};

/// Configuration failures surfaced while declaring or addressing components.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("component list is empty")]
    EmptyComponentList,
    #[error("component name and image must not be empty")]
    MissingNameOrImage,
    #[error("component '{name}' is configured twice")]
    DuplicateComponent { name: String },
    #[error("component '{name}' is not configured")]
    NotConfigured { name: String },
    #[error("component '{component}' port name '{port}' is configured twice")]
    DuplicatePortName { component: String, port: String },
    #[error("component '{component}' container port {port} is invalid")]
    InvalidContainerPort { component: String, port: u16 },
    #[error("no component was provided to {operation}")]
    NoComponentProvided { operation: &'static str },
}

/// Top-level environment errors returned to callers.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("failed to connect engine client: {source}")]
    Connect {
        #[source]
        source: EngineError,
    },
}
