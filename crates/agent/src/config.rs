// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration.
//!
//! All options carry serde defaults so a partial TOML document (or an empty
//! one) yields a working configuration.

use berth_core::AgentId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage backend for per-kernel scratch space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScratchType {
    #[default]
    Hostdir,
    Memory,
    K8s,
}

/// Whether the container entrypoint is wrapped with the jail binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxType {
    #[default]
    Docker,
    Jail,
}

/// Device-locality preference for multi-device allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffinityPolicyConfig {
    #[default]
    Preferred,
    Interleaved,
}

/// Pool role of this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingGroupType {
    #[default]
    Compute,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSection {
    pub scratch_type: ScratchType,
    pub scratch_root: PathBuf,
    /// Cap for memory scratch, in bytes.
    pub scratch_size: u64,
    pub kernel_uid: Option<u32>,
    pub kernel_gid: Option<u32>,
    pub sandbox_type: SandboxType,
    pub jail_args: Vec<String>,
    /// Host address advertised for service ports.
    pub bind_host: String,
    /// Override for the kernel host advertised to clients.
    pub advertised_host: Option<String>,
    /// Optional extra bridge to attach containers to.
    pub alternative_bridge: Option<String>,
    /// distro prefix -> volume holding that distro's kernel runner.
    pub krunner_volumes: IndexMap<String, String>,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            scratch_type: ScratchType::Hostdir,
            scratch_root: PathBuf::from("/var/cache/scratches"),
            scratch_size: 64 * 1024 * 1024,
            kernel_uid: None,
            kernel_gid: None,
            sandbox_type: SandboxType::Docker,
            jail_args: Vec::new(),
            bind_host: "0.0.0.0".to_string(),
            advertised_host: None,
            alternative_bridge: None,
            krunner_volumes: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerLogsSection {
    /// Ring-buffer cap for collected container logs, in bytes.
    pub max_length: u64,
}

impl Default for ContainerLogsSection {
    fn default() -> Self {
        Self {
            max_length: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Image pull deadline in seconds; `None` waits indefinitely.
    pub pull_timeout_sec: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelLifecyclesSection {
    pub init_polling_attempt: u32,
    pub init_polling_timeout_sec: u64,
    pub init_timeout_sec: u64,
}

impl Default for KernelLifecyclesSection {
    fn default() -> Self {
        Self {
            init_polling_attempt: 10,
            init_polling_timeout_sec: 60,
            init_timeout_sec: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSection {
    pub affinity_policy: AffinityPolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreDumpSection {
    pub enabled: bool,
    pub path: PathBuf,
    pub core_path: PathBuf,
}

impl Default for CoreDumpSection {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("/var/crash/backend.ai"),
            core_path: PathBuf::from("/var/crash/backend.ai/core"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSection {
    pub enabled: bool,
    pub coredump: CoreDumpSection,
    pub kernel_runner: bool,
    pub log_events: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub id: AgentId,
    pub ipc_base_path: PathBuf,
    pub agent_sock_port: u16,
    pub scaling_group: String,
    pub scaling_group_type: ScalingGroupType,
    /// Seconds of TCP keepalive idle on the RPC listener.
    pub rpc_keepalive_timeout_sec: u64,
    /// Seconds to wait for the cluster-wide resource lock.
    pub lock_conn_timeout_sec: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            id: AgentId::new("i-agent"),
            ipc_base_path: PathBuf::from("/tmp/backend.ai/ipc"),
            agent_sock_port: 6007,
            scaling_group: "default".to_string(),
            scaling_group_type: ScalingGroupType::Compute,
            rpc_keepalive_timeout_sec: 60,
            lock_conn_timeout_sec: 30,
        }
    }
}

/// Root agent configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub container: ContainerSection,
    pub container_logs: ContainerLogsSection,
    pub api: ApiSection,
    pub kernel_lifecycles: KernelLifecyclesSection,
    pub resource: ResourceSection,
    pub debug: DebugSection,
}

impl AgentConfig {
    /// Parse from a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
