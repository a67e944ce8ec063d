//! In-memory engine for tests. Containers are plain records with an engine
//! state string; no process ever runs.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use crate::engine::{ContainerSummary, EngineClient, EngineConnector, EngineError, LogStream};

const STATE_CREATED: &str = "created";
const STATE_RUNNING: &str = "running";
const STATE_EXITED: &str = "exited";

/// Snapshot of one `create_container` call, kept for assertions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub port_specs: Vec<String>,
}

#[derive(Default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    created: Vec<CreatedContainer>,
    images: HashSet<String>,
    fail_pull: HashSet<String>,
    fail_start: HashSet<String>,
    logs: BTreeMap<String, Vec<u8>>,
    next_id: u64,
    create_calls: u64,
    start_calls: u64,
    stop_calls: u64,
    remove_calls: u64,
    pull_calls: u64,
    remove_image_calls: u64,
    close_calls: u64,
}

struct MockContainer {
    summary: ContainerSummary,
}

/// Shared-state fake of a container engine. Cloning shares the state, so a
/// connector and a test can observe the same containers.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `image` as already present on the engine host.
    #[must_use]
    pub fn with_image(self, image: impl Into<String>) -> Self {
        self.add_image(image);
        self
    }

    pub fn add_image(&self, image: impl Into<String>) {
        self.lock().images.insert(image.into());
    }

    pub fn image_present(&self, image: &str) -> bool {
        self.lock().images.contains(image)
    }

    /// Make every pull of `image` fail.
    pub fn fail_pull_of(&self, image: impl Into<String>) {
        self.lock().fail_pull.insert(image.into());
    }

    /// Make every start of a container created from `image` fail.
    pub fn fail_start_of(&self, image: impl Into<String>) {
        self.lock().fail_start.insert(image.into());
    }

    /// Canned log output returned for containers created from `image`.
    pub fn set_logs_of(&self, image: impl Into<String>, logs: impl Into<Vec<u8>>) {
        self.lock().logs.insert(image.into(), logs.into());
    }

    /// Snapshots of every `create_container` call in order.
    pub fn created_containers(&self) -> Vec<CreatedContainer> {
        self.lock().created.clone()
    }

    /// Current engine state strings keyed by container name.
    pub fn container_states(&self) -> BTreeMap<String, String> {
        self.lock()
            .containers
            .values()
            .map(|container| {
                (
                    container.summary.name.clone(),
                    container.summary.state.clone(),
                )
            })
            .collect()
    }

    pub fn create_calls(&self) -> u64 {
        self.lock().create_calls
    }

    pub fn start_calls(&self) -> u64 {
        self.lock().start_calls
    }

    pub fn stop_calls(&self) -> u64 {
        self.lock().stop_calls
    }

    pub fn remove_calls(&self) -> u64 {
        self.lock().remove_calls
    }

    pub fn pull_calls(&self) -> u64 {
        self.lock().pull_calls
    }

    pub fn remove_image_calls(&self) -> u64 {
        self.lock().remove_image_calls
    }

    pub fn close_calls(&self) -> u64 {
        self.lock().close_calls
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EngineClient for MockEngine {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        Ok(self
            .lock()
            .containers
            .values()
            .map(|container| container.summary.clone())
            .collect())
    }

    async fn container_by_id(&self, id: &str) -> Result<Option<ContainerSummary>, EngineError> {
        Ok(self
            .lock()
            .containers
            .get(id)
            .map(|container| container.summary.clone()))
    }

    async fn image_exists(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self.lock().images.contains(name))
    }

    async fn pull_image(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.pull_calls += 1;
        if state.fail_pull.contains(name) {
            return Err(EngineError::msg(format!("pull of '{name}' refused")));
        }
        state.images.insert(name.to_owned());
        Ok(())
    }

    async fn remove_image(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.remove_image_calls += 1;
        if !state.images.remove(name) {
            return Err(EngineError::msg(format!("no such image '{name}'")));
        }
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        image: &str,
        env: &[String],
        port_specs: &[String],
    ) -> Result<String, EngineError> {
        let mut state = self.lock();
        state.create_calls += 1;
        if !state.images.contains(image) {
            return Err(EngineError::msg(format!("no such image '{image}'")));
        }
        state.next_id += 1;
        let id = format!("mock-{:08}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                summary: ContainerSummary {
                    id: id.clone(),
                    name: name.to_owned(),
                    image: image.to_owned(),
                    state: STATE_CREATED.to_owned(),
                },
            },
        );
        state.created.push(CreatedContainer {
            id: id.clone(),
            name: name.to_owned(),
            image: image.to_owned(),
            env: env.to_vec(),
            port_specs: port_specs.to_vec(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.start_calls += 1;
        let image = match state.containers.get(id) {
            Some(container) => container.summary.image.clone(),
            None => return Err(EngineError::msg(format!("no such container '{id}'"))),
        };
        if state.fail_start.contains(&image) {
            return Err(EngineError::msg(format!(
                "container from '{image}' refused to start"
            )));
        }
        if let Some(container) = state.containers.get_mut(id) {
            container.summary.state = STATE_RUNNING.to_owned();
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.stop_calls += 1;
        match state.containers.get_mut(id) {
            Some(container) => {
                container.summary.state = STATE_EXITED.to_owned();
                Ok(())
            }
            None => Err(EngineError::msg(format!("no such container '{id}'"))),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.remove_calls += 1;
        match state.containers.remove(id) {
            Some(_) => Ok(()),
            None => Err(EngineError::msg(format!("no such container '{id}'"))),
        }
    }

    async fn container_logs(&self, id: &str, _follow: bool) -> Result<LogStream, EngineError> {
        let state = self.lock();
        let Some(container) = state.containers.get(id) else {
            return Err(EngineError::msg(format!("no such container '{id}'")));
        };
        let bytes = state
            .logs
            .get(&container.summary.image)
            .cloned()
            .unwrap_or_default();
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.lock().close_calls += 1;
        Ok(())
    }
}

/// Connector handing out clients that share one [`MockEngine`].
#[derive(Clone)]
pub struct MockConnector {
    engine: MockEngine,
}

impl MockConnector {
    pub fn new(engine: MockEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EngineConnector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn EngineClient>, EngineError> {
        Ok(Arc::new(self.engine.clone()))
    }
}
