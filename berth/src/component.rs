use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;

use crate::{DynError, resolver::ResolveError};

/// How the lifecycle handler obtains a component's image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PullPolicy {
    /// Pull from the registry, falling back to an already present local image
    /// when the pull fails.
    #[default]
    Pull,
    /// Never pull; the image must already exist locally.
    LocalOnly,
}

/// A single exposed port of a component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSpec {
    name: Option<String>,
    container_port: u16,
    host_port: Option<u16>,
}

impl PortSpec {
    /// Expose `container_port` on an ephemeral host port.
    #[must_use]
    pub const fn new(container_port: u16) -> Self {
        Self {
            name: None,
            container_port,
            host_port: None,
        }
    }

    /// Name the port. Unnamed ports take the owning component's name; each
    /// named port within a component must be unique after case folding.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Request a fixed host port instead of an ephemeral one.
    #[must_use]
    pub const fn with_host_port(mut self, port: u16) -> Self {
        self.host_port = Some(port);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub const fn container_port(&self) -> u16 {
        self.container_port
    }

    pub const fn host_port(&self) -> Option<u16> {
        self.host_port
    }
}

/// Hook invoked by the lifecycle handler around container start; readiness
/// probes implement this and poll until the component is usable.
#[async_trait]
pub trait Callback: Send + Sync {
    async fn call(
        &self,
        component_name: &str,
        resolver: &dyn ValueResolver,
    ) -> Result<(), DynError>;
}

/// Resolution of container parameters exposed to callbacks.
pub trait ValueResolver: Send + Sync {
    /// Evaluate a template against the environment's variable key space.
    fn resolve(&self, template: &str) -> Result<String, ResolveError>;
    /// Bind/advertise address of the environment.
    fn host(&self) -> &str;
    /// Host port assigned to a component port; an empty `port_name` selects
    /// the component's default port.
    fn port(&self, component: &str, port_name: &str) -> Result<u16, ResolveError>;
}

/// Caller-supplied declaration of one desired container. Immutable after
/// registration.
#[derive(Clone)]
pub struct Component {
    name: String,
    image: String,
    pull_policy: PullPolicy,
    ports: Vec<PortSpec>,
    env: BTreeMap<String, String>,
    remove_image_after_destroy: bool,
    follow_logs: bool,
    before_start: Option<Arc<dyn Callback>>,
    after_start: Option<Arc<dyn Callback>>,
}

impl Component {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            pull_policy: PullPolicy::default(),
            ports: Vec::new(),
            env: BTreeMap::new(),
            remove_image_after_destroy: false,
            follow_logs: false,
            before_start: None,
            after_start: None,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: PortSpec) -> Self {
        self.ports.push(port);
        self
    }

    /// Add an environment variable; the value may be a template referencing
    /// any component's host or ports.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// Remove the image from the engine host after destroy. Unsafe when other
    /// containers still reference the same tag; removal errors are surfaced.
    #[must_use]
    pub fn with_remove_image(mut self, enabled: bool) -> Self {
        self.remove_image_after_destroy = enabled;
        self
    }

    /// Follow container log output on a dedicated engine connection.
    #[must_use]
    pub fn with_follow_logs(mut self, enabled: bool) -> Self {
        self.follow_logs = enabled;
        self
    }

    #[must_use]
    pub fn with_before_start(mut self, callback: Arc<dyn Callback>) -> Self {
        self.before_start = Some(callback);
        self
    }

    #[must_use]
    pub fn with_after_start(mut self, callback: Arc<dyn Callback>) -> Self {
        self.after_start = Some(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub const fn pull_policy(&self) -> PullPolicy {
        self.pull_policy
    }

    pub fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub const fn remove_image_after_destroy(&self) -> bool {
        self.remove_image_after_destroy
    }

    pub const fn follow_logs(&self) -> bool {
        self.follow_logs
    }

    pub fn before_start(&self) -> Option<&Arc<dyn Callback>> {
        self.before_start.as_ref()
    }

    pub fn after_start(&self) -> Option<&Arc<dyn Callback>> {
        self.after_start.as_ref()
    }

    pub(crate) fn renamed(mut self, name: String) -> Self {
        self.name = name;
        self
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("pull_policy", &self.pull_policy)
            .field("ports", &self.ports)
            .field("env", &self.env)
            .field("remove_image_after_destroy", &self.remove_image_after_destroy)
            .field("follow_logs", &self.follow_logs)
            .finish_non_exhaustive()
    }
}
