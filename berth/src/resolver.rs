use std::{collections::HashMap, sync::Arc};

use tera::{Context as TeraContext, Tera, Value};

use crate::{
    component::ValueResolver,
    container::{Container, PortBinding},
    context::{EnvironmentContext, normalize_name},
    errors::ConfigError,
};

const QUALIFIER_HOST: &str = "Host";
// Both resolve to the mapped port on the host.
const QUALIFIER_PORT: &str = "Port";
const QUALIFIER_HOST_PORT: &str = "HostPort";
// Both resolve to the exposed port within the container.
const QUALIFIER_CONTAINER_PORT: &str = "ContainerPort";
const QUALIFIER_TARGET_PORT: &str = "TargetPort";

/// Failures evaluating templates against the environment's key space.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown key '{key}'")]
    UnknownKey { key: String },
    #[error("port bindings for '{component}' are not defined")]
    PortBindingsNotDefined { component: String },
    #[error("failed to render template '{name}': {source}")]
    Template {
        name: String,
        #[source]
        source: tera::Error,
    },
    #[error("component '{component}' has no port named '{port}'")]
    UnknownPort { component: String, port: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Template-evaluation service mapping symbolic keys to literal host, port,
/// and environment values.
///
/// For every container and every port binding four qualifiers are generated
/// (`Port`/`HostPort` for the host side, `ContainerPort`/`TargetPort` for the
/// container side) under `{component}.{qualifier}` for the default port and
/// `{component}.{portName}.{qualifier}` for named ports, plus
/// `{component}.Host`. Keys are registered under both the declared and the
/// normalized spelling.
pub(crate) struct EnvironmentValueResolver {
    context: Arc<EnvironmentContext>,
}

impl EnvironmentValueResolver {
    pub(crate) fn new(context: Arc<EnvironmentContext>) -> Self {
        Self { context }
    }

    /// Eagerly resolve every component's raw environment-variable templates
    /// into literal strings. Must run after port allocation and before any
    /// container is created.
    pub(crate) fn configure_containers_env(&self) -> Result<(), ResolveError> {
        let variables = Arc::new(self.merged_variables()?);
        for container in self.context.containers() {
            let component = container.component();
            if component.env().is_empty() {
                continue;
            }
            let mut env = std::collections::BTreeMap::new();
            for (key, template) in component.env() {
                let name = format!("component {} env {}", component.name(), key);
                env.insert(key.clone(), render(&name, template, Arc::clone(&variables))?);
            }
            container.set_resolved_env(env);
        }
        Ok(())
    }

    /// Evaluate a template. Strict: an unresolved reference aborts the whole
    /// resolution, never silently substituting an empty string.
    pub(crate) fn resolve_template(&self, template: &str) -> Result<String, ResolveError> {
        render("resolve", template, Arc::new(self.merged_variables()?))
    }

    /// Host port assigned to a component port; empty `port_name` selects the
    /// default port.
    pub(crate) fn host_port(&self, component: &str, port_name: &str) -> Result<u16, ResolveError> {
        let container = self.context.container(component)?;
        let component_name = container.component().name().to_owned();
        let Some(bindings) = container.port_bindings() else {
            return Err(ResolveError::PortBindingsNotDefined {
                component: component_name,
            });
        };

        let wanted = if port_name.is_empty() {
            component_name.clone()
        } else {
            normalize_name(port_name)
        };
        bindings
            .iter()
            .find(|binding| binding.name == wanted)
            .map(|binding| binding.host_port)
            .ok_or(ResolveError::UnknownPort {
                component: component_name,
                port: wanted,
            })
    }

    /// System environment (lowest priority) overwritten by the generated
    /// variable key space, so a same-named process variable never shadows a
    /// computed value but stays visible when no computed value exists.
    fn merged_variables(&self) -> Result<HashMap<String, String>, ResolveError> {
        let mut variables: HashMap<String, String> = std::env::vars().collect();
        variables.extend(self.environment_context_variables()?);
        Ok(variables)
    }

    /// The generated key space alone. Requires port bindings to be assigned
    /// for every registered container.
    pub(crate) fn environment_context_variables(
        &self,
    ) -> Result<HashMap<String, String>, ResolveError> {
        let mut variables = HashMap::new();
        for container in self.context.containers() {
            let Some(bindings) = container.port_bindings() else {
                return Err(ResolveError::PortBindingsNotDefined {
                    component: container.component().name().to_owned(),
                });
            };
            self.append_container_variables(container.declared_name(), container, &bindings, &mut variables);
            self.append_container_variables(container.component().name(), container, &bindings, &mut variables);
        }
        Ok(variables)
    }

    fn append_container_variables(
        &self,
        prefix: &str,
        container: &Container,
        bindings: &[PortBinding],
        variables: &mut HashMap<String, String>,
    ) {
        let component_name = container.component().name();
        variables.insert(
            format!("{prefix}.{QUALIFIER_HOST}"),
            self.context.host().to_owned(),
        );

        for binding in bindings {
            if binding.name == component_name {
                append_port_qualifiers(variables, prefix, binding);
            } else {
                append_port_qualifiers(variables, &format!("{prefix}.{}", binding.name), binding);
            }
        }

        // Named ports are also reachable under their declared spelling.
        for spec in container.component().ports() {
            let Some(declared) = spec.name() else {
                continue;
            };
            let normalized = normalize_name(declared);
            if normalized == declared {
                continue;
            }
            if let Some(binding) = bindings.iter().find(|binding| binding.name == normalized) {
                append_port_qualifiers(variables, &format!("{prefix}.{declared}"), binding);
            }
        }
    }
}

fn append_port_qualifiers(
    variables: &mut HashMap<String, String>,
    prefix: &str,
    binding: &PortBinding,
) {
    let host_port = binding.host_port.to_string();
    let container_port = binding.container_port.to_string();
    variables.insert(format!("{prefix}.{QUALIFIER_PORT}"), host_port.clone());
    variables.insert(format!("{prefix}.{QUALIFIER_HOST_PORT}"), host_port);
    variables.insert(
        format!("{prefix}.{QUALIFIER_CONTAINER_PORT}"),
        container_port.clone(),
    );
    variables.insert(format!("{prefix}.{QUALIFIER_TARGET_PORT}"), container_port);
}

impl ValueResolver for EnvironmentValueResolver {
    fn resolve(&self, template: &str) -> Result<String, ResolveError> {
        self.resolve_template(template)
    }

    fn host(&self) -> &str {
        self.context.host()
    }

    fn port(&self, component: &str, port_name: &str) -> Result<u16, ResolveError> {
        self.host_port(component, port_name)
    }
}

/// Render a template with the single `value(key="...")` lookup function bound
/// to the variable map. Unknown keys abort the render.
fn render(
    name: &str,
    template: &str,
    variables: Arc<HashMap<String, String>>,
) -> Result<String, ResolveError> {
    let mut tera = Tera::default();
    tera.register_function("value", lookup(variables));
    tera.add_raw_template(name, template)
        .map_err(|source| ResolveError::Template {
            name: name.to_owned(),
            source,
        })?;
    tera.render(name, &TeraContext::new())
        .map_err(|source| ResolveError::Template {
            name: name.to_owned(),
            source,
        })
}

fn lookup(
    variables: Arc<HashMap<String, String>>,
) -> impl Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync {
    move |args| {
        let key = args
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("value() requires a string `key` argument"))?;
        variables
            .get(key)
            .map(|value| Value::String(value.clone()))
            .ok_or_else(|| tera::Error::msg(format!("unknown key '{key}'")))
    }
}
