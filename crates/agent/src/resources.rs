// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compute device plugins and per-kernel resource allocation.
//!
//! Each slot kind (cpu, mem, cuda.shares, ...) is served by one plugin that
//! tracks its free pool on this agent. The resource stage walks plugins in
//! allocation order under the cluster-wide lock and rolls partial
//! allocations back on failure.

use async_trait::async_trait;
use berth_core::{Mount, ResourceSlot, SlotName};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Allocation errors raised by plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("insufficient {slot}: requested {requested}, free {free}")]
    Insufficient {
        slot: SlotName,
        requested: Decimal,
        free: Decimal,
    },

    #[error("no plugin serves slot {0}")]
    UnknownSlot(SlotName),
}

/// Device-locality preference when claiming several discrete devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffinityPolicy {
    /// Fill devices from one locality group before spilling to the next.
    #[default]
    Preferred,
    /// Spread claimed devices evenly across locality groups.
    Interleaved,
}

/// Device id -> locality group (NUMA node) mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffinityMap(pub IndexMap<String, u32>);

impl AffinityMap {
    pub fn group_of(&self, device_id: &str) -> u32 {
        self.0.get(device_id).copied().unwrap_or(0)
    }
}

/// Physical devices claimed for one slot of one kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAllocation {
    pub slot: SlotName,
    pub quantity: Decimal,
    /// Device ids for discrete devices; empty for pooled slots (cpu, mem).
    pub device_ids: Vec<String>,
}

/// Everything the rest of the pipeline needs to know about claimed devices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KernelResourceSpec {
    pub slots: ResourceSlot,
    pub allocations: Vec<DeviceAllocation>,
    /// Container-config fragment contributed by the plugins
    /// (e.g. device passthrough arguments).
    pub container_args: serde_json::Value,
}

impl KernelResourceSpec {
    /// `KEY=VALUE` lines for `resource.txt`.
    pub fn to_resource_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .slots
            .iter()
            .map(|(name, quantity)| format!("{}={}", name.as_str().to_uppercase(), quantity))
            .collect();
        for allocation in &self.allocations {
            if !allocation.device_ids.is_empty() {
                lines.push(format!(
                    "{}_DEVICES={}",
                    allocation.slot.as_str().replace('.', "_").to_uppercase(),
                    allocation.device_ids.join(",")
                ));
            }
        }
        lines
    }
}

/// One slot kind's allocator on this agent.
#[async_trait]
pub trait ComputePlugin: Send + Sync + 'static {
    fn slot_name(&self) -> SlotName;

    /// Total capacity advertised to the manager.
    fn capacity(&self) -> Decimal;

    fn free(&self) -> Decimal;

    /// Claim `quantity` from the free pool.
    async fn allocate(
        &self,
        quantity: Decimal,
        affinity_map: &AffinityMap,
        policy: AffinityPolicy,
    ) -> Result<DeviceAllocation, PluginError>;

    /// Return a prior claim to the free pool. Must tolerate repeats.
    async fn release(&self, allocation: &DeviceAllocation);

    /// Container-config fragment for a claim (device passthrough etc.).
    fn container_args(&self, _allocation: &DeviceAllocation) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Volumes this plugin wants mounted into kernels using it.
    fn mounts(&self) -> Vec<Mount> {
        Vec::new()
    }
}

/// Pooled scalar allocator (cpu cores as fractional shares).
pub struct CpuPlugin {
    capacity: Decimal,
    free: Mutex<Decimal>,
}

impl CpuPlugin {
    pub fn new(cores: Decimal) -> Self {
        Self {
            capacity: cores,
            free: Mutex::new(cores),
        }
    }
}

#[async_trait]
impl ComputePlugin for CpuPlugin {
    fn slot_name(&self) -> SlotName {
        SlotName::new("cpu")
    }

    fn capacity(&self) -> Decimal {
        self.capacity
    }

    fn free(&self) -> Decimal {
        *self.free.lock()
    }

    async fn allocate(
        &self,
        quantity: Decimal,
        _affinity_map: &AffinityMap,
        _policy: AffinityPolicy,
    ) -> Result<DeviceAllocation, PluginError> {
        let mut free = self.free.lock();
        if quantity > *free {
            return Err(PluginError::Insufficient {
                slot: self.slot_name(),
                requested: quantity,
                free: *free,
            });
        }
        *free -= quantity;
        Ok(DeviceAllocation {
            slot: self.slot_name(),
            quantity,
            device_ids: Vec::new(),
        })
    }

    async fn release(&self, allocation: &DeviceAllocation) {
        let mut free = self.free.lock();
        *free = (*free + allocation.quantity).min(self.capacity);
    }

    fn container_args(&self, allocation: &DeviceAllocation) -> serde_json::Value {
        json!({"resources": {"cpu": allocation.quantity.to_string()}})
    }
}

/// Pooled byte allocator for memory.
pub struct MemPlugin {
    capacity: Decimal,
    free: Mutex<Decimal>,
}

impl MemPlugin {
    pub fn new(bytes: Decimal) -> Self {
        Self {
            capacity: bytes,
            free: Mutex::new(bytes),
        }
    }
}

#[async_trait]
impl ComputePlugin for MemPlugin {
    fn slot_name(&self) -> SlotName {
        SlotName::new("mem")
    }

    fn capacity(&self) -> Decimal {
        self.capacity
    }

    fn free(&self) -> Decimal {
        *self.free.lock()
    }

    async fn allocate(
        &self,
        quantity: Decimal,
        _affinity_map: &AffinityMap,
        _policy: AffinityPolicy,
    ) -> Result<DeviceAllocation, PluginError> {
        let mut free = self.free.lock();
        if quantity > *free {
            return Err(PluginError::Insufficient {
                slot: self.slot_name(),
                requested: quantity,
                free: *free,
            });
        }
        *free -= quantity;
        Ok(DeviceAllocation {
            slot: self.slot_name(),
            quantity,
            device_ids: Vec::new(),
        })
    }

    async fn release(&self, allocation: &DeviceAllocation) {
        let mut free = self.free.lock();
        *free = (*free + allocation.quantity).min(self.capacity);
    }

    fn container_args(&self, allocation: &DeviceAllocation) -> serde_json::Value {
        json!({"resources": {"mem": allocation.quantity.to_string()}})
    }
}

/// Discrete-device allocator (one unit of the slot per device), with
/// affinity-aware device picking.
pub struct DiscreteDevicePlugin {
    slot: SlotName,
    devices: Vec<String>,
    free_devices: Mutex<Vec<String>>,
    plugin_mounts: Vec<Mount>,
}

impl DiscreteDevicePlugin {
    pub fn new(slot: impl Into<SlotName>, devices: Vec<String>) -> Self {
        Self {
            slot: slot.into(),
            free_devices: Mutex::new(devices.clone()),
            devices,
            plugin_mounts: Vec::new(),
        }
    }

    pub fn with_mounts(mut self, mounts: Vec<Mount>) -> Self {
        self.plugin_mounts = mounts;
        self
    }

    fn pick(
        free: &[String],
        count: usize,
        affinity_map: &AffinityMap,
        policy: AffinityPolicy,
    ) -> Vec<String> {
        let mut by_group: IndexMap<u32, Vec<&String>> = IndexMap::new();
        for device in free {
            by_group
                .entry(affinity_map.group_of(device))
                .or_default()
                .push(device);
        }
        by_group.sort_keys();
        let mut picked: Vec<String> = Vec::with_capacity(count);
        match policy {
            AffinityPolicy::Preferred => {
                // largest group first, so a whole allocation lands on one node
                let mut groups: Vec<&Vec<&String>> = by_group.values().collect();
                groups.sort_by_key(|g| std::cmp::Reverse(g.len()));
                for group in groups {
                    for device in group {
                        if picked.len() == count {
                            return picked;
                        }
                        picked.push((*device).clone());
                    }
                }
            }
            AffinityPolicy::Interleaved => {
                let mut cursors: Vec<(usize, &Vec<&String>)> =
                    by_group.values().map(|g| (0usize, g)).collect();
                while picked.len() < count {
                    let mut advanced = false;
                    for (cursor, group) in cursors.iter_mut() {
                        if picked.len() == count {
                            break;
                        }
                        if *cursor < group.len() {
                            picked.push(group[*cursor].clone());
                            *cursor += 1;
                            advanced = true;
                        }
                    }
                    if !advanced {
                        break;
                    }
                }
            }
        }
        picked
    }
}

#[async_trait]
impl ComputePlugin for DiscreteDevicePlugin {
    fn slot_name(&self) -> SlotName {
        self.slot.clone()
    }

    fn capacity(&self) -> Decimal {
        Decimal::from(self.devices.len() as u64)
    }

    fn free(&self) -> Decimal {
        Decimal::from(self.free_devices.lock().len() as u64)
    }

    async fn allocate(
        &self,
        quantity: Decimal,
        affinity_map: &AffinityMap,
        policy: AffinityPolicy,
    ) -> Result<DeviceAllocation, PluginError> {
        let count = quantity.ceil().to_u64().unwrap_or(0) as usize;
        let mut free = self.free_devices.lock();
        if count > free.len() {
            return Err(PluginError::Insufficient {
                slot: self.slot.clone(),
                requested: quantity,
                free: Decimal::from(free.len() as u64),
            });
        }
        let picked = Self::pick(&free, count, affinity_map, policy);
        free.retain(|device| !picked.contains(device));
        Ok(DeviceAllocation {
            slot: self.slot.clone(),
            quantity,
            device_ids: picked,
        })
    }

    async fn release(&self, allocation: &DeviceAllocation) {
        let mut free = self.free_devices.lock();
        for device in &allocation.device_ids {
            if self.devices.contains(device) && !free.contains(device) {
                free.push(device.clone());
            }
        }
    }

    fn container_args(&self, allocation: &DeviceAllocation) -> serde_json::Value {
        json!({
            "devices": {
                self.slot.as_str(): allocation.device_ids,
            }
        })
    }

    fn mounts(&self) -> Vec<Mount> {
        self.plugin_mounts.clone()
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod tests;
