// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel object instantiation and registration.
//!
//! The last constructive stage: builds the in-process `KernelObject` with
//! its code runner and registers it so the backend can route REPL traffic.

use crate::provision::{ProvisionError, Provisioner};
use crate::registry::{KernelObject, KernelRegistry};
use crate::repl::CodeRunner;
use crate::resources::KernelResourceSpec;
use crate::runtime::ContainerConfig;
use async_trait::async_trait;
use berth_core::{ContainerId, ImageRef, KernelId, NetworkId, ServicePort, SessionId};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;

const STAGE: &str = "kernel-object";

#[derive(Clone)]
pub struct KernelObjectSpec {
    pub kernel_id: KernelId,
    pub session_id: SessionId,
    pub image: ImageRef,
    pub container_id: ContainerId,
    pub network_id: Option<NetworkId>,
    pub network_mode: String,
    pub kernel_host: String,
    pub repl_in_port: u16,
    pub repl_out_port: u16,
    pub service_ports: Vec<ServicePort>,
    pub resource_spec: KernelResourceSpec,
    pub environ: IndexMap<String, String>,
    pub scratch_dir: PathBuf,
    pub container_config: ContainerConfig,
    pub container_name: String,
}

#[derive(Clone)]
pub struct KernelObjectResult {
    pub kernel: KernelObject,
}

pub struct KernelObjectProvisioner {
    registry: KernelRegistry,
}

impl KernelObjectProvisioner {
    pub fn new(registry: KernelRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Provisioner for KernelObjectProvisioner {
    type Spec = KernelObjectSpec;
    type Resource = KernelObjectResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &KernelObjectSpec) -> Result<KernelObjectResult, ProvisionError> {
        // repl ports are always bound to the loopback of the agent host
        let code_runner = Arc::new(CodeRunner::new(
            "127.0.0.1",
            spec.repl_in_port,
            spec.repl_out_port,
        ));
        let kernel = KernelObject {
            kernel_id: spec.kernel_id.clone(),
            session_id: spec.session_id.clone(),
            image: spec.image.clone(),
            container_id: spec.container_id.clone(),
            network_id: spec.network_id.clone(),
            network_mode: spec.network_mode.clone(),
            kernel_host: spec.kernel_host.clone(),
            service_ports: spec.service_ports.clone(),
            resource_spec: spec.resource_spec.clone(),
            environ: spec.environ.clone(),
            scratch_dir: spec.scratch_dir.clone(),
            container_config: spec.container_config.clone(),
            container_name: spec.container_name.clone(),
            code_runner,
        };
        self.registry.insert(kernel.clone());
        Ok(KernelObjectResult { kernel })
    }

    async fn teardown(&self, resource: Option<&KernelObjectResult>) -> Result<(), ProvisionError> {
        if let Some(resource) = resource {
            resource.kernel.code_runner.close().await;
            self.registry.remove(&resource.kernel.kernel_id);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "kernel_object_tests.rs"]
mod tests;
