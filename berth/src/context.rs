use std::{collections::HashMap, sync::Arc};

use uuid::Uuid;

use crate::{component::Component, container::Container, errors::ConfigError};

/// Case folding applied to component and port names.
pub(crate) fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}

/// Process-scoped environment state: a random id used to namespace container
/// names on the engine, the resolved bind address, and the container
/// registry.
///
/// The registry is populated only during construction and never mutated
/// afterwards.
pub(crate) struct EnvironmentContext {
    id: String,
    host: String,
    containers: HashMap<String, Arc<Container>>,
    order: Vec<String>,
}

impl EnvironmentContext {
    pub(crate) fn new(host: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            host,
            containers: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// Register a component, normalizing its name. Names must be unique after
    /// case folding.
    pub(crate) fn add_container(
        &mut self,
        component: Component,
    ) -> Result<Arc<Container>, ConfigError> {
        if component.name().is_empty() || component.image().is_empty() {
            return Err(ConfigError::MissingNameOrImage);
        }
        let declared_name = component.name().to_owned();
        let name = normalize_name(&declared_name);
        if self.containers.contains_key(&name) {
            return Err(ConfigError::DuplicateComponent { name });
        }

        let container = Arc::new(Container::new(
            component.renamed(name.clone()),
            declared_name,
        ));
        self.order.push(name.clone());
        self.containers.insert(name, Arc::clone(&container));
        Ok(container)
    }

    /// Normalized lookup; unknown names are a configuration error.
    pub(crate) fn container(&self, name: &str) -> Result<&Arc<Container>, ConfigError> {
        self.containers
            .get(&normalize_name(name))
            .ok_or_else(|| ConfigError::NotConfigured {
                name: name.to_owned(),
            })
    }

    /// Containers in declaration order.
    pub(crate) fn containers(&self) -> impl Iterator<Item = &Arc<Container>> {
        self.order
            .iter()
            .filter_map(|name| self.containers.get(name))
    }
}
