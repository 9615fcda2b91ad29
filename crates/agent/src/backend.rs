// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent backend: composes the lifecycle pipeline and serves the
//! manager-facing kernel operations.

use crate::creation::{KernelCreationContext, KernelCreationResult, KernelCreationStage};
use crate::provision::ProvisionError;
use crate::runtime::{
    Container, ContainerConfig, ContainerRuntime, ContainerStatus, ACTIVE_CONTAINER_STATUSES,
};
use crate::stages::image_meta::DistroProber;
use async_trait::async_trait;
use berth_core::{
    ContainerId, Event, ImageRef, ImageRegistry, KernelCreationInfo, KernelId,
    KernelConnectionInfo, LifecycleReason,
};
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Backend operation errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("kernel creation failed at stage {}: {}", .cause.stage, .cause)]
    KernelCreationFailed {
        kernel_id: KernelId,
        #[source]
        cause: ProvisionError,
    },

    #[error("kernel not found: {0}")]
    KernelNotFound(KernelId),

    #[error("runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cgroup location of a container for direct resource-file access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CGroupInfo {
    pub path: PathBuf,
    pub version: u8,
}

/// One `Backend` instance per agent.
pub struct Backend {
    ctx: KernelCreationContext,
}

impl Backend {
    pub fn new(ctx: KernelCreationContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &KernelCreationContext {
        &self.ctx
    }

    async fn emit(&self, event: Event) {
        if let Err(err) = self.ctx.events.produce(event).await {
            tracing::warn!(error = %err, "backend event emission failed");
        }
    }

    /// Run the full creation pipeline for one kernel.
    ///
    /// `throttle_sema`, when given, bounds concurrent image pulls across
    /// kernel creations; every other stage runs unthrottled.
    pub async fn create_kernel(
        &self,
        info: &KernelCreationInfo,
        throttle_sema: Option<Arc<Semaphore>>,
    ) -> Result<KernelCreationResult, BackendError> {
        let stage = KernelCreationStage::new(self.ctx.clone());
        let result = stage.setup(info, throttle_sema).await.map_err(|cause| {
            BackendError::KernelCreationFailed {
                kernel_id: info.kernel_id().clone(),
                cause,
            }
        })?;
        self.emit(Event::KernelStarted {
            kernel_id: info.kernel_id().clone(),
            session_id: info.session_id().clone(),
            reason: LifecycleReason::Other("new".to_string()),
            connection: KernelConnectionInfo {
                kernel_host: result.kernel_host.clone(),
                repl_in_port: result.repl_in_port,
                repl_out_port: result.repl_out_port,
                service_ports: result.service_ports.clone(),
                container_id: result.container_id.to_string(),
            },
        })
        .await;
        Ok(result)
    }

    /// Stop and remove a kernel's container and release its resources.
    ///
    /// Destroying an unknown kernel logs and returns.
    pub async fn destroy_kernel(
        &self,
        kernel_id: &KernelId,
        reason: LifecycleReason,
    ) -> Result<(), BackendError> {
        let Some(kernel) = self.ctx.registry.remove(kernel_id) else {
            tracing::info!(kernel_id = %kernel_id, "destroy of unknown kernel ignored");
            return Ok(());
        };
        self.emit(Event::KernelTerminating {
            kernel_id: kernel_id.clone(),
            session_id: kernel.session_id.clone(),
            reason: reason.clone(),
        })
        .await;

        kernel.code_runner.close().await;
        if let Err(err) = self.ctx.runtime.stop_container(&kernel.container_id).await {
            tracing::debug!(container_id = %kernel.container_id, error = %err, "stop during destroy");
        }
        if let Err(err) = self
            .ctx
            .runtime
            .remove_container(&kernel.container_id, true, true)
            .await
        {
            tracing::warn!(container_id = %kernel.container_id, error = %err, "remove during destroy");
        }
        for allocation in kernel.resource_spec.allocations.iter().rev() {
            if let Some(plugin) = self.ctx.compute_plugins.get(&allocation.slot) {
                plugin.release(allocation).await;
            }
        }

        self.emit(Event::KernelTerminated {
            kernel_id: kernel_id.clone(),
            session_id: kernel.session_id.clone(),
            reason,
            exit_code: None,
        })
        .await;
        Ok(())
    }

    /// Post-termination cleanup, separated so the manager chooses when to
    /// reap scratch space.
    pub async fn clean_kernel(&self, kernel_id: &KernelId) -> Result<(), BackendError> {
        let scratch_dir = self
            .ctx
            .config
            .container
            .scratch_root
            .join(kernel_id.as_str());
        match tokio::fs::remove_dir_all(&scratch_dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let scratch_file = self
            .ctx
            .config
            .container
            .scratch_root
            .join(format!("{kernel_id}.img"));
        match tokio::fs::remove_file(&scratch_file).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Recreate a kernel's container in place, preserving its scratch tree
    /// and resource allocation.
    pub async fn restart_kernel(&self, kernel_id: &KernelId) -> Result<ContainerId, BackendError> {
        let kernel = self
            .ctx
            .registry
            .get(kernel_id)
            .ok_or_else(|| BackendError::KernelNotFound(kernel_id.clone()))?;

        if let Err(err) = self.ctx.runtime.stop_container(&kernel.container_id).await {
            tracing::debug!(container_id = %kernel.container_id, error = %err, "stop during restart");
        }
        self.ctx
            .runtime
            .remove_container(&kernel.container_id, true, false)
            .await?;

        let new_id = self
            .ctx
            .runtime
            .create_container(&kernel.container_name, &kernel.container_config)
            .await?;
        self.ctx.runtime.start_container(&new_id).await?;
        let sudoers = [
            "sh".to_string(),
            "-c".to_string(),
            "mkdir -p /etc/sudoers.d && echo \"work ALL=(ALL:ALL) NOPASSWD:ALL\" > /etc/sudoers.d/01-bai-work"
                .to_string(),
        ];
        self.ctx
            .runtime
            .exec_in_container(&new_id, "root", &sudoers)
            .await?;
        self.ctx.registry.update_container(kernel_id, new_id.clone());
        tracing::info!(kernel_id = %kernel_id, container_id = %new_id, "kernel restarted");
        Ok(new_id)
    }

    /// Scoped acquisition of a throwaway container running `image`.
    ///
    /// The container is stopped and removed on every exit path.
    pub async fn with_temp_container<T, F, Fut>(
        &self,
        image: &ImageRef,
        f: F,
    ) -> Result<T, BackendError>
    where
        F: FnOnce(Container) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let config = ContainerConfig(json!({
            "image": image.canonical(),
            "cmd": ["sleep", "infinity"],
            "labels": {"ai.backend.temp": "1"},
        }));
        let name = format!("tmp.{}.{}", image.short_name(), uuid::Uuid::new_v4());
        let container_id = self.ctx.runtime.create_container(&name, &config).await?;
        self.ctx.runtime.start_container(&container_id).await?;
        let container = self.ctx.runtime.inspect_container(&container_id).await?;

        let outcome = f(container).await;

        if let Err(err) = self.ctx.runtime.stop_container(&container_id).await {
            tracing::debug!(container_id = %container_id, error = %err, "temp container stop");
        }
        if let Err(err) = self
            .ctx
            .runtime
            .remove_container(&container_id, true, true)
            .await
        {
            tracing::warn!(container_id = %container_id, error = %err, "temp container removal");
        }
        outcome
    }

    pub async fn pull_image(
        &self,
        image: &ImageRef,
        registry_conf: &ImageRegistry,
        timeout: Option<Duration>,
    ) -> Result<(), BackendError> {
        Ok(self.ctx.runtime.pull_image(image, registry_conf, timeout).await?)
    }

    pub async fn push_image(
        &self,
        image: &ImageRef,
        registry_conf: &ImageRegistry,
        timeout: Option<Duration>,
    ) -> Result<(), BackendError> {
        Ok(self.ctx.runtime.push_image(image, registry_conf, timeout).await?)
    }

    /// Containers the agent considers its own.
    pub async fn get_managed_containers(
        &self,
        status_filter: Option<&[ContainerStatus]>,
    ) -> Result<Vec<Container>, BackendError> {
        Ok(self
            .ctx
            .runtime
            .list_containers(status_filter.unwrap_or(ACTIVE_CONTAINER_STATUSES))
            .await?)
    }

    pub async fn get_container_logs(
        &self,
        container_id: &ContainerId,
    ) -> Result<Vec<String>, BackendError> {
        Ok(self.ctx.runtime.container_logs(container_id).await?)
    }

    /// Resolve the cgroup path for a controller and container.
    pub fn get_cgroup_info(&self, container_id: &ContainerId, controller: &str) -> CGroupInfo {
        let cgroup_v2 = PathBuf::from("/sys/fs/cgroup/cgroup.controllers").exists();
        if cgroup_v2 {
            CGroupInfo {
                path: PathBuf::from(format!(
                    "/sys/fs/cgroup/system.slice/docker-{container_id}.scope"
                )),
                version: 2,
            }
        } else {
            CGroupInfo {
                path: PathBuf::from(format!("/sys/fs/cgroup/{controller}/docker/{container_id}")),
                version: 1,
            }
        }
    }
}

/// Distro prober that runs `ldd --version` in a throwaway container.
pub struct RuntimeDistroProber {
    runtime: Arc<dyn ContainerRuntime>,
}

impl RuntimeDistroProber {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl DistroProber for RuntimeDistroProber {
    async fn ldd_version_lines(&self, canonical: &str) -> Result<Vec<String>, ProvisionError> {
        let config = ContainerConfig(json!({
            "image": canonical,
            "cmd": ["ldd", "--version"],
        }));
        let name = format!("probe.{}", uuid::Uuid::new_v4());
        let to_stage_err =
            |err: crate::runtime::RuntimeError| ProvisionError::failed("image-metadata", err.to_string());
        let container_id = self
            .runtime
            .create_container(&name, &config)
            .await
            .map_err(to_stage_err)?;
        let result = async {
            self.runtime
                .start_container(&container_id)
                .await
                .map_err(to_stage_err)?;
            self.runtime
                .wait_container(&container_id)
                .await
                .map_err(to_stage_err)?;
            self.runtime
                .container_logs(&container_id)
                .await
                .map_err(to_stage_err)
        }
        .await;
        if let Err(err) = self.runtime.remove_container(&container_id, true, true).await {
            tracing::warn!(container_id = %container_id, error = %err, "probe container removal");
        }
        result
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
