// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory container runtime for tests.
//!
//! Records every call, honours the port mappings declared in container
//! configs, and lets tests script failures per method name.

use super::{
    Container, ContainerConfig, ContainerRuntime, ContainerStatus, ExecResult, RuntimeError,
};
use async_trait::async_trait;
use berth_core::{ContainerId, ImageRef, ImageRegistry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A recorded runtime invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub method: String,
    pub target: String,
}

struct FakeContainer {
    container: Container,
    config: ContainerConfig,
    logs: Vec<String>,
    execs: Vec<Vec<String>>,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<ContainerId, FakeContainer>,
    /// canonical -> digest of locally present images
    images: HashMap<String, String>,
    networks: Vec<String>,
    calls: Vec<RuntimeCall>,
    /// method name -> error message for scripted failures
    fail_on: HashMap<String, String>,
    /// method name -> artificial latency for scripted slowness
    delay_on: HashMap<String, Duration>,
    next_id: u64,
}

/// Scriptable fake [`ContainerRuntime`].
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an image as locally present with the given digest.
    pub fn seed_image(&self, canonical: &str, digest: &str) {
        self.state
            .lock()
            .images
            .insert(canonical.to_string(), digest.to_string());
    }

    /// Make the named method fail with `msg` until cleared.
    pub fn fail_on(&self, method: &str, msg: &str) {
        self.state
            .lock()
            .fail_on
            .insert(method.to_string(), msg.to_string());
    }

    /// Make the named image operation sleep before completing, to exercise
    /// caller-side timeouts.
    pub fn delay_on(&self, method: &str, delay: Duration) {
        self.state
            .lock()
            .delay_on
            .insert(method.to_string(), delay);
    }

    async fn apply_delay(&self, method: &str) {
        let delay = self.state.lock().delay_on.get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn clear_failures(&self) {
        self.state.lock().fail_on.clear();
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    /// Commands executed inside the given container.
    pub fn recorded_execs(&self, id: &ContainerId) -> Vec<Vec<String>> {
        self.state
            .lock()
            .containers
            .get(id)
            .map(|c| c.execs.clone())
            .unwrap_or_default()
    }

    /// The config a container was created with.
    pub fn container_config(&self, id: &ContainerId) -> Option<ContainerConfig> {
        self.state.lock().containers.get(id).map(|c| c.config.clone())
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    pub fn append_log(&self, id: &ContainerId, line: &str) {
        if let Some(entry) = self.state.lock().containers.get_mut(id) {
            entry.logs.push(line.to_string());
        }
    }

    /// Force a container's observed status (e.g. to simulate a crash).
    pub fn set_status(&self, id: &ContainerId, status: ContainerStatus) {
        if let Some(entry) = self.state.lock().containers.get_mut(id) {
            entry.container.status = status;
        }
    }

    fn record(&self, method: &str, target: impl Into<String>) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall {
            method: method.to_string(),
            target: target.into(),
        });
        if let Some(msg) = state.fail_on.get(method) {
            return Err(RuntimeError::Other(msg.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(
        &self,
        name: &str,
        config: &ContainerConfig,
    ) -> Result<ContainerId, RuntimeError> {
        self.record("create_container", name)?;
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = ContainerId::new(format!("ctr-{:08x}", state.next_id));
        let image = config
            .0
            .get("image")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        state.containers.insert(
            id.clone(),
            FakeContainer {
                container: Container {
                    id: id.clone(),
                    name: name.to_string(),
                    image,
                    status: ContainerStatus::Created,
                    ports: config.port_mappings(),
                },
                config: config.clone(),
                logs: Vec::new(),
                execs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.record("start_container", id.as_str())?;
        let mut state = self.state.lock();
        let entry = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))?;
        entry.container.status = ContainerStatus::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.record("stop_container", id.as_str())?;
        let mut state = self.state.lock();
        let entry = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))?;
        entry.container.status = ContainerStatus::Exited;
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &ContainerId,
        _force: bool,
        _remove_volumes: bool,
    ) -> Result<(), RuntimeError> {
        self.record("remove_container", id.as_str())?;
        self.state.lock().containers.remove(id);
        Ok(())
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<Container, RuntimeError> {
        self.record("inspect_container", id.as_str())?;
        self.state
            .lock()
            .containers
            .get(id)
            .map(|c| c.container.clone())
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))
    }

    async fn wait_container(&self, id: &ContainerId) -> Result<i32, RuntimeError> {
        self.record("wait_container", id.as_str())?;
        let mut state = self.state.lock();
        let entry = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))?;
        entry.container.status = ContainerStatus::Exited;
        Ok(0)
    }

    async fn exec_in_container(
        &self,
        id: &ContainerId,
        _user: &str,
        command: &[String],
    ) -> Result<ExecResult, RuntimeError> {
        self.record("exec_in_container", id.as_str())?;
        let mut state = self.state.lock();
        let entry = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))?;
        entry.execs.push(command.to_vec());
        Ok(ExecResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn container_logs(&self, id: &ContainerId) -> Result<Vec<String>, RuntimeError> {
        self.record("container_logs", id.as_str())?;
        self.state
            .lock()
            .containers
            .get(id)
            .map(|c| c.logs.clone())
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))
    }

    async fn resolve_host_port(
        &self,
        id: &ContainerId,
        container_port: u16,
    ) -> Result<u16, RuntimeError> {
        self.record("resolve_host_port", format!("{id}:{container_port}"))?;
        let state = self.state.lock();
        let entry = state
            .containers
            .get(id)
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))?;
        entry
            .container
            .ports
            .iter()
            .find(|mapping| mapping.container_port == container_port)
            .map(|mapping| mapping.host_port)
            .ok_or(RuntimeError::PortNotPublished {
                container: id.clone(),
                port: container_port,
            })
    }

    async fn list_containers(
        &self,
        status_filter: &[ContainerStatus],
    ) -> Result<Vec<Container>, RuntimeError> {
        self.record("list_containers", "")?;
        Ok(self
            .state
            .lock()
            .containers
            .values()
            .filter(|c| status_filter.is_empty() || status_filter.contains(&c.container.status))
            .map(|c| c.container.clone())
            .collect())
    }

    async fn image_digest(&self, canonical: &str) -> Result<Option<String>, RuntimeError> {
        self.record("image_digest", canonical)?;
        Ok(self.state.lock().images.get(canonical).cloned())
    }

    async fn pull_image(
        &self,
        image: &ImageRef,
        _registry: &ImageRegistry,
        _timeout: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        self.apply_delay("pull_image").await;
        self.record("pull_image", image.canonical())?;
        self.state
            .lock()
            .images
            .insert(image.canonical(), format!("sha256:pulled-{}", image.tag));
        Ok(())
    }

    async fn push_image(
        &self,
        image: &ImageRef,
        _registry: &ImageRegistry,
        _timeout: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        self.apply_delay("push_image").await;
        self.record("push_image", image.canonical())?;
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.record("create_network", name)?;
        self.state.lock().networks.push(name.to_string());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.record("remove_network", name)?;
        self.state.lock().networks.retain(|n| n != name);
        Ok(())
    }

    async fn connect_network(&self, id: &ContainerId, network: &str) -> Result<(), RuntimeError> {
        self.record("connect_network", format!("{id}:{network}"))?;
        let state = self.state.lock();
        if !state.networks.iter().any(|n| n == network) {
            return Err(RuntimeError::NetworkNotFound(network.to_string()));
        }
        if !state.containers.contains_key(id) {
            return Err(RuntimeError::NotFound(id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
