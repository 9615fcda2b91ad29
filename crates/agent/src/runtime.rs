// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container runtime abstraction.
//!
//! The lifecycle stages depend only on this interface; docker, containerd,
//! and k8s backends live behind it. The container spec is an opaque JSON
//! document assembled by deep-merging stage fragments.

use async_trait::async_trait;
use berth_core::{ContainerId, ImageRef, ImageRegistry, PortMapping};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Runtime operation errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(ContainerId),

    #[error("image missing locally: {0}")]
    ImageMissing(String),

    #[error("pull failed for {image}: {msg}")]
    PullFailed { image: String, msg: String },

    #[error("push failed for {image}: {msg}")]
    PushFailed { image: String, msg: String },

    #[error("exec failed in {container}: {msg}")]
    ExecFailed { container: ContainerId, msg: String },

    #[error("network not found: {0}")]
    NetworkNotFound(String),

    #[error("port {port} not published by container {container}")]
    PortNotPublished { container: ContainerId, port: u16 },

    #[error("runtime failure: {0}")]
    Other(String),
}

/// Observed state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
}

/// Containers the agent treats as live for occupancy and enumeration.
pub const ACTIVE_CONTAINER_STATUSES: &[ContainerStatus] = &[
    ContainerStatus::Running,
    ContainerStatus::Restarting,
    ContainerStatus::Paused,
];

/// The final opaque container spec, produced by deep-merging stage
/// fragments (resource args, network args, env, mounts, ports, labels).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerConfig(pub serde_json::Value);

impl ContainerConfig {
    /// Published port mappings declared by the config.
    pub fn port_mappings(&self) -> Vec<PortMapping> {
        self.0
            .get("ports")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// A container as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub ports: Vec<PortMapping>,
}

/// Output of an in-container command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The contract the lifecycle stages program against.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    async fn create_container(
        &self,
        name: &str,
        config: &ContainerConfig,
    ) -> Result<ContainerId, RuntimeError>;

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    async fn remove_container(
        &self,
        id: &ContainerId,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError>;

    async fn inspect_container(&self, id: &ContainerId) -> Result<Container, RuntimeError>;

    /// Wait until the container exits, returning its exit code.
    async fn wait_container(&self, id: &ContainerId) -> Result<i32, RuntimeError>;

    async fn exec_in_container(
        &self,
        id: &ContainerId,
        user: &str,
        command: &[String],
    ) -> Result<ExecResult, RuntimeError>;

    async fn container_logs(&self, id: &ContainerId) -> Result<Vec<String>, RuntimeError>;

    /// The host port a container port was published on.
    async fn resolve_host_port(
        &self,
        id: &ContainerId,
        container_port: u16,
    ) -> Result<u16, RuntimeError>;

    async fn list_containers(
        &self,
        status_filter: &[ContainerStatus],
    ) -> Result<Vec<Container>, RuntimeError>;

    /// Digest of the image if present locally.
    async fn image_digest(&self, canonical: &str) -> Result<Option<String>, RuntimeError>;

    async fn pull_image(
        &self,
        image: &ImageRef,
        registry: &ImageRegistry,
        timeout: Option<Duration>,
    ) -> Result<(), RuntimeError>;

    async fn push_image(
        &self,
        image: &ImageRef,
        registry: &ImageRegistry,
        timeout: Option<Duration>,
    ) -> Result<(), RuntimeError>;

    async fn create_network(&self, name: &str) -> Result<(), RuntimeError>;

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError>;

    async fn connect_network(&self, id: &ContainerId, network: &str) -> Result<(), RuntimeError>;
}

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
