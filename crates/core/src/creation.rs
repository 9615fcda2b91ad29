// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel creation inputs.
//!
//! `KernelCreationInfo` is the immutable bundle the manager hands to an agent
//! when it asks for a kernel. The agent's provisioning pipeline reads it and
//! nothing mutates it afterwards.

use crate::id::{AgentId, KernelId, NetworkId, SessionId};
use crate::image::{AutoPullPolicy, ImageRef};
use crate::mount::{DotfileInfo, VFolderMount};
use crate::slot::ResourceSlot;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Kind of workload a session runs. Inference sessions get special
/// replica-spreading treatment during agent selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Interactive,
    Batch,
    Inference,
}

/// Placement mode of a multi-kernel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterMode {
    /// All kernels of the session on one agent.
    SingleNode,
    /// Kernels placed independently across agents.
    MultiNode,
}

/// Role of a kernel within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    Main,
    Worker,
}

impl ClusterRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterRole::Main => "main",
            ClusterRole::Worker => "worker",
        }
    }
}

/// An SSH keypair in OpenSSH text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKeyPair {
    pub public_key: String,
    pub private_key: String,
}

/// Per-host SSH endpoints of a cluster, as written to `port-mapping.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSshPortMapping(pub IndexMap<String, (String, u16)>);

/// Registry endpoint and credentials for image pull/push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRegistry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Who owns a kernel and where it belongs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelOwnership {
    pub kernel_id: KernelId,
    pub session_id: SessionId,
    pub agent_id: AgentId,
    pub user_uuid: String,
    pub access_key: String,
    pub domain_name: String,
    pub group_id: String,
}

/// The kernel's position within its session cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub mode: ClusterMode,
    pub size: u32,
    pub role: ClusterRole,
    pub idx: u32,
    /// Hostname of this kernel inside the cluster network
    /// (conventionally `{role}{idx}`).
    pub hostname: String,
    /// Per-role kernel counts.
    pub replicas: IndexMap<String, u32>,
    /// Network mode; bridge when unset, otherwise a plugin name or `host`.
    pub network_mode: Option<String>,
    pub network_id: Option<NetworkId>,
    pub ssh_keypair: Option<SshKeyPair>,
    pub ssh_port_mapping: Option<ClusterSshPortMapping>,
}

impl ClusterInfo {
    /// The `role:count,role:count` encoding exported to kernels as
    /// `BACKENDAI_CLUSTER_REPLICAS`.
    pub fn replicas_env(&self) -> String {
        self.replicas
            .iter()
            .map(|(role, count)| format!("{role}:{count}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Everything the agent needs to create one kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelCreationInfo {
    pub ownership: KernelOwnership,

    pub image: ImageRef,
    pub image_labels: IndexMap<String, String>,
    pub image_registry: ImageRegistry,
    pub image_digest: String,
    pub auto_pull: AutoPullPolicy,

    pub uid_override: Option<u32>,
    pub gid_override: Option<u32>,
    pub supplementary_gids: Vec<u32>,

    pub vfolder_mounts: Vec<VFolderMount>,
    pub dotfiles: Vec<DotfileInfo>,

    pub cluster: ClusterInfo,
    pub resource_slots: ResourceSlot,
    pub resource_opts: IndexMap<String, serde_json::Value>,

    pub environ: IndexMap<String, String>,
    pub bootstrap_script: Option<String>,
    pub startup_command: Option<String>,
    pub preopen_ports: Vec<u16>,
    /// Host ports pre-allocated by the manager for this kernel's services.
    pub allocated_host_ports: Vec<u16>,
    pub block_service_ports: bool,

    pub docker_credentials: Option<serde_json::Value>,
    pub container_ssh_keypair: SshKeyPair,

    #[serde(default)]
    pub prevent_vfolder_mount: bool,
}

impl KernelCreationInfo {
    pub fn kernel_id(&self) -> &KernelId {
        &self.ownership.kernel_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.ownership.session_id
    }
}

#[cfg(test)]
#[path = "creation_tests.rs"]
mod tests;
