use std::{
    collections::BTreeMap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio_util::sync::CancellationToken;

use crate::component::Component;

/// An assigned (name, container port, host port) triple for one component
/// port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortBinding {
    pub name: String,
    pub container_port: u16,
    pub host_port: u16,
}

/// The orchestrator's live record for one registered component: the immutable
/// declaration plus the runtime state gained over its lifecycle.
///
/// Runtime fields are written only by the lifecycle handler; callers must not
/// issue overlapping operations for the same component concurrently.
pub struct Container {
    component: Component,
    declared_name: String,
    runtime: Mutex<Runtime>,
}

#[derive(Default)]
struct Runtime {
    container_id: String,
    port_bindings: Option<Vec<PortBinding>>,
    env: BTreeMap<String, String>,
    log_follow: Option<CancellationToken>,
}

impl Container {
    pub(crate) fn new(component: Component, declared_name: String) -> Self {
        Self {
            component,
            declared_name,
            runtime: Mutex::new(Runtime::default()),
        }
    }

    /// The declaration this container was registered with (name normalized).
    pub fn component(&self) -> &Component {
        &self.component
    }

    /// The component name exactly as the caller declared it.
    pub fn declared_name(&self) -> &str {
        &self.declared_name
    }

    /// Engine container identifier; empty until the container was created.
    pub fn container_id(&self) -> String {
        self.lock().container_id.clone()
    }

    pub(crate) fn set_container_id(&self, id: &str) {
        self.lock().container_id = id.to_owned();
    }

    pub(crate) fn clear_container_id(&self) {
        self.lock().container_id.clear();
    }

    /// Port bindings assigned by the allocator; `None` until allocation ran.
    pub fn port_bindings(&self) -> Option<Vec<PortBinding>> {
        self.lock().port_bindings.clone()
    }

    pub(crate) fn set_port_bindings(&self, bindings: Vec<PortBinding>) {
        self.lock().port_bindings = Some(bindings);
    }

    /// Environment variables with all template references resolved.
    pub fn resolved_env(&self) -> BTreeMap<String, String> {
        self.lock().env.clone()
    }

    pub(crate) fn set_resolved_env(&self, env: BTreeMap<String, String>) {
        self.lock().env = env;
    }

    /// Install a fresh cancellation token for a log-follow task, cancelling
    /// any previous one.
    pub(crate) fn begin_log_follow(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self.lock().log_follow.replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        token
    }

    /// Cancel the log-follow task if one is running. Safe to call any number
    /// of times; never blocks.
    pub fn stop_follow_logs(&self) {
        if let Some(token) = &self.lock().log_follow {
            token.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("component", &self.component)
            .field("declared_name", &self.declared_name)
            .field("container_id", &self.container_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> Container {
        Container::new(Component::new("cache", "redis:7"), "CACHE".to_owned())
    }

    #[test]
    fn container_id_roundtrip() {
        let container = container();
        assert!(container.container_id().is_empty());

        container.set_container_id("abc123");
        assert_eq!(container.container_id(), "abc123");

        container.clear_container_id();
        assert!(container.container_id().is_empty());
    }

    #[test]
    fn stop_follow_logs_is_idempotent() {
        let container = container();
        // No token installed yet.
        container.stop_follow_logs();

        let token = container.begin_log_follow();
        container.stop_follow_logs();
        container.stop_follow_logs();
        assert!(token.is_cancelled());
    }

    #[test]
    fn debug_output_names_component_and_id() {
        let container = container();
        container.set_container_id("abc123");

        let debug = format!("{container:?}");
        assert!(debug.contains("cache"));
        assert!(debug.contains("CACHE"));
        assert!(debug.contains("abc123"));
    }

    #[test]
    fn begin_log_follow_cancels_previous_token() {
        let container = container();
        let first = container.begin_log_follow();
        let second = container.begin_log_follow();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}
