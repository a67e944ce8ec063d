use std::{collections::HashSet, net::TcpListener};

use tracing::debug;

use crate::{
    container::PortBinding,
    context::{EnvironmentContext, normalize_name},
    errors::{ConfigError, EnvironmentError},
};

/// Failures claiming host ports for the environment.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("failed to bind {address}:{port}: {source}")]
    Bind {
        address: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read bound address on {address}: {source}")]
    LocalAddr {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Claim a host port for every declared port of every component and write the
/// resulting bindings onto the containers.
///
/// The whole batch is bound before any listener is released, so no container
/// creation can observe a partially allocated port set. The window between
/// releasing a listener and the engine binding the port is an accepted
/// limitation.
pub(crate) fn configure_port_bindings(context: &EnvironmentContext) -> Result<(), EnvironmentError> {
    let requests = normalized_exposed_ports(context)?;
    let bindings = claim_host_ports(context.host(), requests)?;
    for (name, ports) in bindings {
        context.container(&name)?.set_port_bindings(ports);
    }
    Ok(())
}

struct PortRequest {
    name: String,
    container_port: u16,
    // 0 requests an ephemeral port.
    host_port: u16,
}

fn normalized_exposed_ports(
    context: &EnvironmentContext,
) -> Result<Vec<(String, Vec<PortRequest>)>, ConfigError> {
    let mut component_ports = Vec::new();

    for container in context.containers() {
        let component = container.component();
        let component_name = component.name().to_owned();

        let mut seen = HashSet::new();
        let mut requests = Vec::new();
        for spec in component.ports() {
            if spec.container_port() == 0 {
                return Err(ConfigError::InvalidContainerPort {
                    component: component_name,
                    port: spec.container_port(),
                });
            }

            let port_name = match spec.name() {
                Some(name) if !name.is_empty() => normalize_name(name),
                _ => component_name.clone(),
            };
            if !seen.insert(port_name.clone()) {
                return Err(ConfigError::DuplicatePortName {
                    component: component_name,
                    port: port_name,
                });
            }

            requests.push(PortRequest {
                name: port_name,
                container_port: spec.container_port(),
                host_port: spec.host_port().unwrap_or(0),
            });
        }
        component_ports.push((component_name, requests));
    }
    Ok(component_ports)
}

/// Bind a listener per requested port, read back the OS-assigned numbers once
/// the whole batch succeeded, then release everything. Any failure releases
/// the listeners opened so far and aborts the batch.
fn claim_host_ports(
    host: &str,
    requests: Vec<(String, Vec<PortRequest>)>,
) -> Result<Vec<(String, Vec<PortBinding>)>, AllocationError> {
    let mut listeners = Vec::new();
    let mut result = Vec::new();

    for (component, ports) in requests {
        let mut bindings = Vec::new();
        for request in ports {
            let (listener, host_port) = listen(host, request.host_port)?;
            listeners.push(listener);
            bindings.push(PortBinding {
                name: request.name,
                container_port: request.container_port,
                host_port,
            });
        }
        result.push((component, bindings));
    }

    // Release the whole batch back to the OS right before container creation.
    drop(listeners);
    debug!(host, components = result.len(), "host ports claimed");
    Ok(result)
}

fn listen(host: &str, port: u16) -> Result<(TcpListener, u16), AllocationError> {
    let listener = TcpListener::bind((host, port)).map_err(|source| AllocationError::Bind {
        address: host.to_owned(),
        port,
        source,
    })?;
    let local = listener
        .local_addr()
        .map_err(|source| AllocationError::LocalAddr {
            address: host.to_owned(),
            source,
        })?;
    Ok((listener, local.port()))
}
