// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container spec assembly, creation, start, and readiness check.

use crate::provision::{ProvisionError, Provisioner};
use crate::runtime::{ContainerConfig, ContainerRuntime, ContainerStatus};
use async_trait::async_trait;
use berth_core::{ContainerId, ImageRef, KernelId, Mount, PortMapping, ServicePort};
use indexmap::IndexMap;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const CONFIG_STAGE: &str = "container-config";
const CREATE_STAGE: &str = "container-create";
const START_STAGE: &str = "container-start";
const CHECK_STAGE: &str = "container-check";

/// Deep-merge `patch` into `target`: objects merge key-wise, arrays
/// concatenate, scalars overwrite.
pub(crate) fn merge_config(target: &mut serde_json::Value, patch: serde_json::Value) {
    use serde_json::Value;
    if patch.is_null() {
        return;
    }
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_config(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target_list), Value::Array(patch_list)) => {
            target_list.extend(patch_list);
        }
        (target, patch) => *target = patch,
    }
}

#[derive(Debug, Clone)]
pub struct ContainerConfigSpec {
    pub kernel_id: KernelId,
    pub image: ImageRef,
    pub image_labels: IndexMap<String, String>,
    pub environ: IndexMap<String, String>,
    pub cmdargs: Vec<String>,
    pub mounts: Vec<Mount>,
    pub port_mappings: Vec<PortMapping>,
    pub cluster_hostname: String,
    pub container_log_max_length: u64,
    pub resource_args: serde_json::Value,
    pub network_args: serde_json::Value,
    pub kernel_uid: Option<u32>,
    pub kernel_gid: Option<u32>,
    pub supplementary_gids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfigResult {
    pub config: ContainerConfig,
    pub container_name: String,
}

#[derive(Default)]
pub struct ContainerConfigProvisioner;

#[async_trait]
impl Provisioner for ContainerConfigProvisioner {
    type Spec = ContainerConfigSpec;
    type Resource = ContainerConfigResult;

    fn name(&self) -> &'static str {
        CONFIG_STAGE
    }

    async fn setup(
        &self,
        spec: &ContainerConfigSpec,
    ) -> Result<ContainerConfigResult, ProvisionError> {
        let env: Vec<String> = spec
            .environ
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        let mut config = json!({
            "image": spec.image.canonical(),
            "architecture": spec.image.architecture,
            "hostname": spec.cluster_hostname,
            "cmd": spec.cmdargs,
            "env": env,
            "labels": {
                "ai.backend.kernel-id": spec.kernel_id.as_str(),
                "ai.backend.owner": "agent",
            },
            "mounts": spec.mounts,
            "ports": spec.port_mappings,
            "log_limits": {"max_length": spec.container_log_max_length},
        });
        if let Some(uid) = spec.kernel_uid {
            merge_config(&mut config, json!({"user": {"uid": uid}}));
        }
        if let Some(gid) = spec.kernel_gid {
            merge_config(&mut config, json!({"user": {"gid": gid}}));
        }
        if !spec.supplementary_gids.is_empty() {
            merge_config(
                &mut config,
                json!({"user": {"supplementary_gids": spec.supplementary_gids}}),
            );
        }
        if let Some(labels) = config.get_mut("labels").and_then(|v| v.as_object_mut()) {
            for (label, value) in &spec.image_labels {
                labels
                    .entry(label.clone())
                    .or_insert_with(|| json!(value));
            }
        }
        merge_config(&mut config, spec.resource_args.clone());
        merge_config(&mut config, spec.network_args.clone());

        let container_name = format!(
            "kernel.{}.{}",
            spec.image.short_name(),
            spec.kernel_id
        );
        Ok(ContainerConfigResult {
            config: ContainerConfig(config),
            container_name,
        })
    }

    async fn teardown(
        &self,
        _resource: Option<&ContainerConfigResult>,
    ) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ContainerCreateSpec {
    pub config: ContainerConfig,
    pub container_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCreateResult {
    pub container_id: ContainerId,
}

pub struct ContainerCreateProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerCreateProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Provisioner for ContainerCreateProvisioner {
    type Spec = ContainerCreateSpec;
    type Resource = ContainerCreateResult;

    fn name(&self) -> &'static str {
        CREATE_STAGE
    }

    async fn setup(
        &self,
        spec: &ContainerCreateSpec,
    ) -> Result<ContainerCreateResult, ProvisionError> {
        let container_id = self
            .runtime
            .create_container(&spec.container_name, &spec.config)
            .await
            .map_err(|err| ProvisionError::failed(CREATE_STAGE, err.to_string()))?;
        tracing::info!(container_id = %container_id, name = %spec.container_name, "container created");
        Ok(ContainerCreateResult { container_id })
    }

    async fn teardown(
        &self,
        resource: Option<&ContainerCreateResult>,
    ) -> Result<(), ProvisionError> {
        if let Some(resource) = resource {
            if let Err(err) = self
                .runtime
                .remove_container(&resource.container_id, true, true)
                .await
            {
                tracing::warn!(container_id = %resource.container_id, error = %err, "container removal failed");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ContainerStartSpec {
    pub container_id: ContainerId,
    pub config_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStartResult {
    pub container_id: ContainerId,
}

pub struct ContainerStartProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerStartProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    async fn append_cid(&self, spec: &ContainerStartSpec) -> Result<(), ProvisionError> {
        let path = spec.config_dir.join("resource.txt");
        let existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        let appended = format!("{existing}CID={}\n", spec.container_id);
        tokio::fs::write(&path, appended)
            .await
            .map_err(|err| ProvisionError::failed(START_STAGE, format!("append CID: {err}")))
    }
}

#[async_trait]
impl Provisioner for ContainerStartProvisioner {
    type Spec = ContainerStartSpec;
    type Resource = ContainerStartResult;

    fn name(&self) -> &'static str {
        START_STAGE
    }

    async fn setup(
        &self,
        spec: &ContainerStartSpec,
    ) -> Result<ContainerStartResult, ProvisionError> {
        self.append_cid(spec).await?;
        self.runtime
            .start_container(&spec.container_id)
            .await
            .map_err(|err| ProvisionError::failed(START_STAGE, err.to_string()))?;
        // passwordless sudo for the work user, installed as root
        let command = [
            "sh".to_string(),
            "-c".to_string(),
            "mkdir -p /etc/sudoers.d && echo \"work ALL=(ALL:ALL) NOPASSWD:ALL\" > /etc/sudoers.d/01-bai-work"
                .to_string(),
        ];
        let exec = self
            .runtime
            .exec_in_container(&spec.container_id, "root", &command)
            .await
            .map_err(|err| ProvisionError::failed(START_STAGE, err.to_string()))?;
        if exec.exit_code != 0 {
            return Err(ProvisionError::failed(
                START_STAGE,
                format!(
                    "failed to set up sudo session in container {}: {}",
                    spec.container_id, exec.stderr
                ),
            ));
        }
        Ok(ContainerStartResult {
            container_id: spec.container_id.clone(),
        })
    }

    async fn teardown(
        &self,
        resource: Option<&ContainerStartResult>,
    ) -> Result<(), ProvisionError> {
        if let Some(resource) = resource {
            if let Err(err) = self.runtime.stop_container(&resource.container_id).await {
                tracing::warn!(container_id = %resource.container_id, error = %err, "container stop failed");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ContainerCheckSpec {
    pub container_id: ContainerId,
    pub service_ports: Vec<ServicePort>,
    pub init_polling_attempt: u32,
    pub init_polling_timeout: Duration,
    pub init_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCheckResult {
    pub attempts: u32,
}

pub struct ContainerCheckProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerCheckProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    async fn poll_until_running(
        &self,
        spec: &ContainerCheckSpec,
    ) -> Result<u32, ProvisionError> {
        let poll_interval = spec
            .init_polling_timeout
            .checked_div(spec.init_polling_attempt.max(1))
            .unwrap_or(Duration::from_secs(1));
        for attempt in 1..=spec.init_polling_attempt.max(1) {
            let container = self
                .runtime
                .inspect_container(&spec.container_id)
                .await
                .map_err(|err| ProvisionError::failed(CHECK_STAGE, err.to_string()))?;
            match container.status {
                ContainerStatus::Running => {
                    for service in &spec.service_ports {
                        for port in &service.container_ports {
                            if !service.host_ports.is_empty()
                                && self
                                    .runtime
                                    .resolve_host_port(&spec.container_id, *port)
                                    .await
                                    .is_err()
                            {
                                return Err(ProvisionError::failed(
                                    CHECK_STAGE,
                                    format!("service port {port} not reachable"),
                                ));
                            }
                        }
                    }
                    return Ok(attempt);
                }
                ContainerStatus::Exited | ContainerStatus::Dead => {
                    return Err(ProvisionError::failed(
                        CHECK_STAGE,
                        format!("container {} exited during startup", spec.container_id),
                    ));
                }
                _ => tokio::time::sleep(poll_interval).await,
            }
        }
        Err(ProvisionError::timeout(
            CHECK_STAGE,
            format!(
                "container {} not running after {} attempts",
                spec.container_id, spec.init_polling_attempt
            ),
        ))
    }
}

#[async_trait]
impl Provisioner for ContainerCheckProvisioner {
    type Spec = ContainerCheckSpec;
    type Resource = ContainerCheckResult;

    fn name(&self) -> &'static str {
        CHECK_STAGE
    }

    async fn setup(
        &self,
        spec: &ContainerCheckSpec,
    ) -> Result<ContainerCheckResult, ProvisionError> {
        let attempts = tokio::time::timeout(spec.init_timeout, self.poll_until_running(spec))
            .await
            .map_err(|_| {
                ProvisionError::timeout(
                    CHECK_STAGE,
                    format!(
                        "container {} readiness exceeded {:?}",
                        spec.container_id, spec.init_timeout
                    ),
                )
            })??;
        Ok(ContainerCheckResult { attempts })
    }

    async fn teardown(
        &self,
        _resource: Option<&ContainerCheckResult>,
    ) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;
