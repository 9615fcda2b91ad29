// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager configuration

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Which agent-selection strategy the scheduler uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorStrategy {
    #[default]
    Concentrated,
    Dispersed,
    Legacy,
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub strategy: SelectorStrategy,
    /// Strict ordering over slot names used for selection tiebreaks.
    pub resource_priority: Vec<String>,
    /// Concurrency caps per access key; `default_concurrency` applies to
    /// keys without an entry.
    pub concurrency_limits: IndexMap<String, u32>,
    pub default_concurrency: Option<u32>,
    pub enforce_spreading_endpoint_replica: bool,
    pub max_container_count: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: SelectorStrategy::Concentrated,
            resource_priority: vec![
                "cuda.shares".to_string(),
                "cpu".to_string(),
                "mem".to_string(),
            ],
            concurrency_limits: IndexMap::new(),
            default_concurrency: None,
            enforce_spreading_endpoint_replica: false,
            max_container_count: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub id: String,
    pub scheduler: SchedulerConfig,
    /// Seconds of TCP keepalive idle on agent RPC connections.
    pub rpc_keepalive_timeout_sec: u64,
    /// Seconds without a heartbeat before an agent is marked LOST.
    pub heartbeat_timeout_sec: u64,
    /// Per-status seconds after which a stuck session is force-terminated.
    pub session_hang_tolerance: IndexMap<String, u64>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            id: "manager".to_string(),
            scheduler: SchedulerConfig::default(),
            rpc_keepalive_timeout_sec: 60,
            heartbeat_timeout_sec: 30,
            session_hang_tolerance: IndexMap::new(),
        }
    }
}

impl ManagerConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
