// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for lifecycle tests

use crate::config::AgentConfig;
use crate::creation::KernelCreationContext;
use crate::provision::ProvisionError;
use crate::registry::KernelRegistry;
use crate::resources::{AffinityMap, ComputePlugin, CpuPlugin, MemPlugin};
use crate::runtime::fake::FakeRuntime;
use crate::stages::image_meta::{DistroProber, MemoryDistroCache};
use berth_bus::EventBus;
use berth_core::SlotName;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct FixedLddProber;

#[async_trait::async_trait]
impl DistroProber for FixedLddProber {
    async fn ldd_version_lines(&self, _canonical: &str) -> Result<Vec<String>, ProvisionError> {
        Ok(vec!["ldd (GNU libc) 2.35".to_string()])
    }
}

/// A creation context over the fake runtime with an 8-cpu/16G agent and a
/// ubuntu kernel-runner volume.
pub fn test_context(runtime: &FakeRuntime, scratch_root: &std::path::Path) -> KernelCreationContext {
    let mut config = AgentConfig::default();
    config.container.scratch_root = scratch_root.to_path_buf();
    config
        .container
        .krunner_volumes
        .insert("ubuntu".to_string(), "krunner-ubuntu".to_string());
    config.kernel_lifecycles.init_polling_timeout_sec = 1;
    config.kernel_lifecycles.init_timeout_sec = 5;

    let mut compute_plugins: IndexMap<SlotName, Arc<dyn ComputePlugin>> = IndexMap::new();
    compute_plugins.insert(
        SlotName::new("cpu"),
        Arc::new(CpuPlugin::new(Decimal::from(8))),
    );
    compute_plugins.insert(
        SlotName::new("mem"),
        Arc::new(MemPlugin::new(Decimal::from(16384))),
    );

    // the dispatcher side is dropped: lifecycle events are not observed here
    let (events, _dispatcher) = EventBus::new("i-ag01");
    KernelCreationContext {
        config: Arc::new(config),
        runtime: Arc::new(runtime.clone()),
        registry: KernelRegistry::new(),
        events,
        compute_plugins,
        network_plugins: IndexMap::new(),
        distro_cache: Arc::new(MemoryDistroCache::default()),
        distro_prober: Arc::new(FixedLddProber),
        resource_lock: Arc::new(tokio::sync::Mutex::new(())),
        affinity_map: AffinityMap::default(),
        gwbridge_subnet: None,
        agent_sock_path: None,
    }
}
