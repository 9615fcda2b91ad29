// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device allocation under the cluster-wide resource lock.
//!
//! The lock serialises allocation/commit across concurrent kernel creations
//! on this agent so two kernels can never claim the same device. Partial
//! allocations are rolled back before the error propagates.

use crate::provision::{ProvisionError, Provisioner};
use crate::resources::{
    AffinityMap, AffinityPolicy, ComputePlugin, DeviceAllocation, KernelResourceSpec,
};
use async_trait::async_trait;
use berth_core::{ResourceSlot, SlotName};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;

const STAGE: &str = "resource";

#[derive(Clone)]
pub struct ResourceSpec {
    pub requested_slots: ResourceSlot,
    /// Slot names in the order plugins are consulted; slots absent from the
    /// request are skipped.
    pub allocation_order: Vec<SlotName>,
    pub affinity_map: AffinityMap,
    pub affinity_policy: AffinityPolicy,
}

pub struct ResourceProvisioner {
    plugins: IndexMap<SlotName, Arc<dyn ComputePlugin>>,
    resource_lock: Arc<tokio::sync::Mutex<()>>,
    lock_timeout: Duration,
}

impl ResourceProvisioner {
    pub fn new(
        plugins: IndexMap<SlotName, Arc<dyn ComputePlugin>>,
        resource_lock: Arc<tokio::sync::Mutex<()>>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            plugins,
            resource_lock,
            lock_timeout,
        }
    }

    async fn release_all(&self, allocations: &[DeviceAllocation]) {
        for allocation in allocations.iter().rev() {
            if let Some(plugin) = self.plugins.get(&allocation.slot) {
                plugin.release(allocation).await;
            }
        }
    }
}

#[async_trait]
impl Provisioner for ResourceProvisioner {
    type Spec = ResourceSpec;
    type Resource = KernelResourceSpec;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &ResourceSpec) -> Result<KernelResourceSpec, ProvisionError> {
        let _lock = tokio::time::timeout(self.lock_timeout, self.resource_lock.lock())
            .await
            .map_err(|_| {
                ProvisionError::timeout(
                    STAGE,
                    format!("resource lock not acquired within {:?}", self.lock_timeout),
                )
            })?;

        let mut allocations: Vec<DeviceAllocation> = Vec::new();
        let mut container_args = serde_json::Value::Null;
        for slot in &spec.allocation_order {
            let quantity = spec.requested_slots.get(slot.as_str());
            if quantity.is_zero() {
                continue;
            }
            let plugin = match self.plugins.get(slot) {
                Some(plugin) => plugin,
                None => {
                    self.release_all(&allocations).await;
                    return Err(ProvisionError::failed(
                        STAGE,
                        format!("no compute plugin serves slot {slot}"),
                    ));
                }
            };
            match plugin
                .allocate(quantity, &spec.affinity_map, spec.affinity_policy)
                .await
            {
                Ok(allocation) => {
                    super::container::merge_config(
                        &mut container_args,
                        plugin.container_args(&allocation),
                    );
                    allocations.push(allocation);
                }
                Err(err) => {
                    self.release_all(&allocations).await;
                    return Err(ProvisionError::failed(STAGE, err.to_string()));
                }
            }
        }

        Ok(KernelResourceSpec {
            slots: spec.requested_slots.clone(),
            allocations,
            container_args,
        })
    }

    async fn teardown(&self, resource: Option<&KernelResourceSpec>) -> Result<(), ProvisionError> {
        if let Some(resource) = resource {
            self.release_all(&resource.allocations).await;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
