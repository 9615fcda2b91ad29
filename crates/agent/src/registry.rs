// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory kernel registry.
//!
//! One-way owning: the registry owns `KernelObject`s, each of which owns its
//! code runner. Mutated only by the lifecycle stages of this agent; never
//! shared across processes.

use crate::repl::CodeRunner;
use crate::resources::KernelResourceSpec;
use crate::runtime::ContainerConfig;
use berth_core::{ContainerId, ImageRef, KernelId, NetworkId, ServicePort, SessionId};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// A running kernel as the agent tracks it.
#[derive(Clone, Debug)]
pub struct KernelObject {
    pub kernel_id: KernelId,
    pub session_id: SessionId,
    pub image: ImageRef,
    pub container_id: ContainerId,
    pub network_id: Option<NetworkId>,
    pub network_mode: String,
    pub kernel_host: String,
    pub service_ports: Vec<ServicePort>,
    pub resource_spec: KernelResourceSpec,
    pub environ: IndexMap<String, String>,
    pub scratch_dir: PathBuf,
    /// The spec the container was created from; reused verbatim on restart.
    pub container_config: ContainerConfig,
    pub container_name: String,
    pub code_runner: Arc<CodeRunner>,
}

impl KernelRegistry {
    /// Swap the container id after a restart recreated the container.
    pub fn update_container(&self, kernel_id: &KernelId, container_id: ContainerId) {
        if let Some(kernel) = self.kernels.lock().get_mut(kernel_id) {
            kernel.container_id = container_id;
        }
    }
}

/// Process-wide map of live kernels on this agent.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: Arc<Mutex<IndexMap<KernelId, KernelObject>>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kernel: KernelObject) {
        self.kernels.lock().insert(kernel.kernel_id.clone(), kernel);
    }

    pub fn remove(&self, kernel_id: &KernelId) -> Option<KernelObject> {
        self.kernels.lock().shift_remove(kernel_id)
    }

    pub fn get(&self, kernel_id: &KernelId) -> Option<KernelObject> {
        self.kernels.lock().get(kernel_id).cloned()
    }

    pub fn contains(&self, kernel_id: &KernelId) -> bool {
        self.kernels.lock().contains_key(kernel_id)
    }

    pub fn kernel_ids(&self) -> Vec<KernelId> {
        self.kernels.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.kernels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
