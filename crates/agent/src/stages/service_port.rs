// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service port merge and host-port assignment.
//!
//! Merges image-declared service ports, user preopen ports, and the cluster
//! SSH port into one list, then assigns host ports from the manager's
//! pre-allocated pool. The two REPL ports always head the final port-mapping
//! list.

use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;
use berth_core::{
    ClusterSshPortMapping, PortMapping, PortProtocol, ServicePort, REPL_IN_PORT, REPL_OUT_PORT,
};
use indexmap::IndexMap;

const STAGE: &str = "service-port";

/// Container port of the in-kernel sshd used for cluster sessions.
pub const CLUSTER_SSH_PORT: u16 = 2200;

#[derive(Debug, Clone)]
pub struct ServicePortSpec {
    /// Value of the `ai.backend.service-ports` image label, if present.
    pub label: Option<String>,
    pub preopen_ports: Vec<u16>,
    pub cluster_size: u32,
    pub cluster_ssh_port_mapping: Option<ClusterSshPortMapping>,
    pub allocated_host_ports: Vec<u16>,
    pub block_service_ports: bool,
    pub bind_host: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortResult {
    pub service_ports: Vec<ServicePort>,
    /// Final container-port to host-port assignments, repl ports first.
    pub port_mappings: Vec<PortMapping>,
    pub bind_host: String,
}

#[derive(Default)]
pub struct ServicePortProvisioner;

/// Split the label at commas that are not inside a bracketed port list.
fn split_label_entries(label: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut depth = 0u32;
    for ch in label.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    entries.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        entries.push(current.trim().to_string());
    }
    entries
}

/// Parse one `name:protocol:ports` entry of the service-ports label.
/// Ports may be a single number or a bracketed comma list.
fn parse_label_entry(entry: &str) -> Result<ServicePort, ProvisionError> {
    let mut parts = entry.trim().splitn(3, ':');
    let (name, protocol, ports) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(protocol), Some(ports)) if !name.is_empty() => (name, protocol, ports),
        _ => {
            return Err(ProvisionError::failed(
                STAGE,
                format!("malformed service-ports entry {entry:?}"),
            ))
        }
    };
    let protocol = match protocol {
        "tcp" => PortProtocol::Tcp,
        "http" => PortProtocol::Http,
        "pty" => PortProtocol::Pty,
        "preopen" => PortProtocol::Preopen,
        other => {
            return Err(ProvisionError::failed(
                STAGE,
                format!("unknown service protocol {other:?} in {entry:?}"),
            ))
        }
    };
    let ports = ports.trim().trim_start_matches('[').trim_end_matches(']');
    let container_ports = ports
        .split(',')
        .map(|p| p.trim().parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| {
            ProvisionError::failed(STAGE, format!("malformed port list in {entry:?}"))
        })?;
    Ok(ServicePort {
        name: name.to_string(),
        protocol,
        container_ports,
        host_ports: Vec::new(),
        is_inference: false,
    })
}

#[async_trait]
impl Provisioner for ServicePortProvisioner {
    type Spec = ServicePortSpec;
    type Resource = ServicePortResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &ServicePortSpec) -> Result<ServicePortResult, ProvisionError> {
        let mut service_ports: Vec<ServicePort> = Vec::new();
        if let Some(label) = &spec.label {
            for entry in split_label_entries(label) {
                service_ports.push(parse_label_entry(&entry)?);
            }
        }
        for port in &spec.preopen_ports {
            service_ports.push(ServicePort {
                name: port.to_string(),
                protocol: PortProtocol::Preopen,
                container_ports: vec![*port],
                host_ports: Vec::new(),
                is_inference: false,
            });
        }
        if spec.cluster_size > 1 || spec.cluster_ssh_port_mapping.is_some() {
            service_ports.push(ServicePort {
                name: "sshd".to_string(),
                protocol: PortProtocol::Tcp,
                container_ports: vec![CLUSTER_SSH_PORT],
                host_ports: Vec::new(),
                is_inference: false,
            });
        }

        let mut seen: IndexMap<u16, &str> = IndexMap::new();
        for service in &service_ports {
            for port in &service.container_ports {
                if *port == REPL_IN_PORT || *port == REPL_OUT_PORT {
                    return Err(ProvisionError::failed(
                        STAGE,
                        format!("service {:?} claims intrinsic port {port}", service.name),
                    ));
                }
                if let Some(existing) = seen.insert(*port, &service.name) {
                    return Err(ProvisionError::failed(
                        STAGE,
                        format!(
                            "container port {port} claimed by both {existing:?} and {:?}",
                            service.name
                        ),
                    ));
                }
            }
        }

        let mut pool = spec.allocated_host_ports.iter().copied();
        let mut next_host_port = |container_port: u16| {
            pool.next().ok_or_else(|| {
                ProvisionError::failed(
                    STAGE,
                    format!("allocated host port pool exhausted at container port {container_port}"),
                )
            })
        };

        let mut port_mappings = vec![
            PortMapping {
                container_port: REPL_IN_PORT,
                host_port: next_host_port(REPL_IN_PORT)?,
            },
            PortMapping {
                container_port: REPL_OUT_PORT,
                host_port: next_host_port(REPL_OUT_PORT)?,
            },
        ];
        if !spec.block_service_ports {
            for service in &mut service_ports {
                let mut host_ports = Vec::with_capacity(service.container_ports.len());
                for container_port in service.container_ports.clone() {
                    let host_port = next_host_port(container_port)?;
                    host_ports.push(host_port);
                    port_mappings.push(PortMapping {
                        container_port,
                        host_port,
                    });
                }
                service.host_ports = host_ports;
            }
        }

        Ok(ServicePortResult {
            service_ports,
            port_mappings,
            bind_host: spec.bind_host.clone(),
        })
    }

    async fn teardown(&self, _resource: Option<&ServicePortResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "service_port_tests.rs"]
mod tests;
