// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Network setup around container creation.
//!
//! Pre-setup resolves the network mode (bridge, host, or plugin-provided)
//! and collects container-config fragments. Post-setup runs after the
//! container starts: it resolves published host ports and extracts the two
//! intrinsic REPL ports.

use crate::provision::{ProvisionError, Provisioner};
use crate::runtime::ContainerRuntime;
use async_trait::async_trait;
use berth_core::{
    ContainerId, KernelCreationInfo, PortMapping, ServicePort, REPL_IN_PORT, REPL_OUT_PORT,
};
use indexmap::IndexMap;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

const PRE_STAGE: &str = "network-pre-setup";
const POST_STAGE: &str = "network-post-setup";

pub const BRIDGE_NETWORK_MODE: &str = "bridge";
pub const HOST_NETWORK_MODE: &str = "host";

/// Extra abilities a network plugin may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCapability {
    /// The plugin exposes ports itself and advertises the kernel host.
    Global,
}

/// Host/port advertisement from a GLOBAL-capable plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNetworkInfo {
    pub container_host: String,
    /// container port -> advertised host port
    pub port_map: IndexMap<u16, u16>,
}

/// A pluggable overlay/SDN network backend.
#[async_trait]
pub trait NetworkPlugin: Send + Sync + 'static {
    fn mode(&self) -> &str;

    async fn capabilities(&self) -> Vec<NetworkCapability>;

    /// Called before container creation; returns container-config fragments.
    async fn join_network(
        &self,
        info: &KernelCreationInfo,
    ) -> Result<serde_json::Value, ProvisionError>;

    /// Called after container start for GLOBAL-capable plugins.
    async fn expose_ports(
        &self,
        bind_host: &str,
        port_mappings: &[PortMapping],
    ) -> Result<ContainerNetworkInfo, ProvisionError>;

    async fn leave_network(&self, info: &KernelCreationInfo) -> Result<(), ProvisionError>;
}

#[derive(Clone)]
pub struct NetworkPreSpec {
    pub info: KernelCreationInfo,
    /// Requested mode; bridge when unset.
    pub network_mode: Option<String>,
    /// Named bridge network for single-node cluster sessions.
    pub network_name: Option<String>,
    pub alternative_bridge: Option<String>,
    pub plugins: IndexMap<String, Arc<dyn NetworkPlugin>>,
    /// Subnet of the swarm gateway bridge, excluded from MPI traffic.
    pub gwbridge_subnet: Option<String>,
}

#[derive(Clone)]
pub struct NetworkPreResult {
    pub mode: String,
    pub container_args: serde_json::Value,
    pub plugin: Option<Arc<dyn NetworkPlugin>>,
}

impl std::fmt::Debug for NetworkPreResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkPreResult")
            .field("mode", &self.mode)
            .field("container_args", &self.container_args)
            .field("plugin", &self.plugin.as_ref().map(|_| "<plugin>"))
            .finish()
    }
}

#[derive(Default)]
pub struct NetworkPreSetupProvisioner;

#[async_trait]
impl Provisioner for NetworkPreSetupProvisioner {
    type Spec = NetworkPreSpec;
    type Resource = NetworkPreResult;

    fn name(&self) -> &'static str {
        PRE_STAGE
    }

    async fn setup(&self, spec: &NetworkPreSpec) -> Result<NetworkPreResult, ProvisionError> {
        let mode = spec
            .network_mode
            .clone()
            .unwrap_or_else(|| BRIDGE_NETWORK_MODE.to_string());
        let mut fragments: Vec<serde_json::Value> = Vec::new();
        let mut plugin: Option<Arc<dyn NetworkPlugin>> = None;

        match mode.as_str() {
            BRIDGE_NETWORK_MODE => {
                if let Some(network_name) = &spec.network_name {
                    fragments.push(json!({
                        "network_mode": network_name,
                        "aliases": [spec.info.cluster.hostname],
                    }));
                }
            }
            HOST_NETWORK_MODE => {
                fragments.push(json!({"network_mode": "host"}));
            }
            other => {
                let found = spec.plugins.get(other).cloned().ok_or_else(|| {
                    ProvisionError::failed(PRE_STAGE, format!("network plugin {other:?} not loaded"))
                })?;
                fragments.push(found.join_network(&spec.info).await?);
                if let Some(subnet) = &spec.gwbridge_subnet {
                    fragments.push(json!({
                        "env": {"OMPI_MCA_btl_tcp_if_exclude": format!("127.0.0.1/32,{subnet}")},
                    }));
                }
                plugin = Some(found);
            }
        }

        if let Some(bridge) = &spec.alternative_bridge {
            fragments.push(json!({"extra_networks": [bridge]}));
        }
        // RDMA device passthrough when the host exposes verbs
        if Path::new("/dev/infiniband/uverbs0").exists() {
            fragments.push(json!({
                "device_passthrough": ["/dev/infiniband"],
            }));
        }

        let mut container_args = serde_json::Value::Null;
        for fragment in fragments {
            super::container::merge_config(&mut container_args, fragment);
        }

        Ok(NetworkPreResult {
            mode,
            container_args,
            plugin,
        })
    }

    async fn teardown(&self, _resource: Option<&NetworkPreResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct NetworkPostSpec {
    pub container_id: ContainerId,
    pub plugin: Option<Arc<dyn NetworkPlugin>>,
    pub bind_host: String,
    pub advertised_host: Option<String>,
    pub service_ports: Vec<ServicePort>,
    pub port_mappings: Vec<PortMapping>,
    /// Extra bridges to connect after start.
    pub additional_networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPostResult {
    pub kernel_host: String,
    pub repl_in_port: u16,
    pub repl_out_port: u16,
    pub service_ports: Vec<ServicePort>,
}

pub struct NetworkPostSetupProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl NetworkPostSetupProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    async fn port_map_from_plugin(
        &self,
        spec: &NetworkPostSpec,
    ) -> Result<Option<ContainerNetworkInfo>, ProvisionError> {
        let Some(plugin) = &spec.plugin else {
            return Ok(None);
        };
        if !plugin.capabilities().await.contains(&NetworkCapability::Global) {
            return Ok(None);
        }
        Ok(Some(
            plugin.expose_ports(&spec.bind_host, &spec.port_mappings).await?,
        ))
    }

    async fn port_map_from_runtime(
        &self,
        spec: &NetworkPostSpec,
    ) -> Result<ContainerNetworkInfo, ProvisionError> {
        let mut port_map = IndexMap::new();
        for mapping in &spec.port_mappings {
            let host_port = self
                .runtime
                .resolve_host_port(&spec.container_id, mapping.container_port)
                .await
                .map_err(|err| ProvisionError::failed(POST_STAGE, err.to_string()))?;
            if host_port != mapping.host_port {
                return Err(ProvisionError::failed(
                    POST_STAGE,
                    format!(
                        "container {} published port {} on {host_port}, expected {}",
                        spec.container_id, mapping.container_port, mapping.host_port
                    ),
                ));
            }
            port_map.insert(mapping.container_port, host_port);
        }
        let kernel_host = spec
            .advertised_host
            .clone()
            .unwrap_or_else(|| spec.bind_host.clone());
        Ok(ContainerNetworkInfo {
            container_host: kernel_host,
            port_map,
        })
    }
}

#[async_trait]
impl Provisioner for NetworkPostSetupProvisioner {
    type Spec = NetworkPostSpec;
    type Resource = NetworkPostResult;

    fn name(&self) -> &'static str {
        POST_STAGE
    }

    async fn setup(&self, spec: &NetworkPostSpec) -> Result<NetworkPostResult, ProvisionError> {
        for network in &spec.additional_networks {
            self.runtime
                .connect_network(&spec.container_id, network)
                .await
                .map_err(|err| ProvisionError::failed(POST_STAGE, err.to_string()))?;
        }

        let info = match self.port_map_from_plugin(spec).await? {
            Some(info) => info,
            None => self.port_map_from_runtime(spec).await?,
        };

        let repl_in_port = *info.port_map.get(&REPL_IN_PORT).ok_or_else(|| {
            ProvisionError::failed(POST_STAGE, "container does not expose the replin port")
        })?;
        let repl_out_port = *info.port_map.get(&REPL_OUT_PORT).ok_or_else(|| {
            ProvisionError::failed(POST_STAGE, "container does not expose the replout port")
        })?;

        let mut service_ports = spec.service_ports.clone();
        for service in &mut service_ports {
            let mut host_ports = Vec::with_capacity(service.container_ports.len());
            for container_port in &service.container_ports {
                match info.port_map.get(container_port) {
                    Some(host_port) => host_ports.push(*host_port),
                    None => {
                        host_ports.clear();
                        break;
                    }
                }
            }
            if !host_ports.is_empty() {
                service.host_ports = host_ports;
            }
        }

        Ok(NetworkPostResult {
            kernel_host: info.container_host,
            repl_in_port,
            repl_out_port,
            service_ports,
        })
    }

    async fn teardown(&self, _resource: Option<&NetworkPostResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "network_tests.rs"]
mod tests;
