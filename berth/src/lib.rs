//! Ephemeral multi-container environments for integration testing.
//!
//! Callers declare a fixed set of [`Component`]s (image, ports, env
//! templates, readiness hooks), obtain an [`Environment`], and drive it
//! through start/stop/destroy. Host ports are claimed up front, cross
//! component references are resolved before any container is created, and
//! shutdown tears everything down exactly once.

pub mod component;
pub mod container;
pub mod engine;
pub mod environment;
pub mod errors;
pub mod mock;

mod context;
mod lifecycle;
mod net;
mod ports;
mod resolver;

pub use component::{Callback, Component, PortSpec, PullPolicy, ValueResolver};
pub use container::{Container, PortBinding};
pub use engine::{ContainerSummary, EngineClient, EngineConnector, EngineError, LogStream};
pub use environment::{Environment, EnvironmentBuilder, ShutdownHook};
pub use errors::{ConfigError, EnvironmentError};
pub use lifecycle::LifecycleError;
pub use mock::{MockConnector, MockEngine};
pub use ports::AllocationError;
pub use resolver::ResolveError;

/// Boxed error type carried by user-supplied callbacks and hooks.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;
