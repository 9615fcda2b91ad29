// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! berth-agent: The worker-side kernel lifecycle.
//!
//! An agent turns a `KernelCreationInfo` into a running container through a
//! strict sequence of provisioning stages, each an idempotent
//! `setup`/`teardown` pair. Failures tear completed stages down in reverse
//! order. The `Backend` composes the pipeline and serves the manager's RPC
//! surface.

pub mod backend;
pub mod config;
pub mod creation;
pub mod provision;
pub mod registry;
pub mod repl;
pub mod resources;
pub mod rpc;
pub mod runtime;
pub mod service_defs;
pub mod stages;

#[cfg(test)]
mod creation_tests_support;

pub use backend::{Backend, BackendError, CGroupInfo, RuntimeDistroProber};
pub use config::AgentConfig;
pub use creation::{KernelCreationContext, KernelCreationResult, KernelCreationStage};
pub use provision::{ProvisionError, ProvisionStage, Provisioner};
pub use registry::{KernelObject, KernelRegistry};
pub use repl::{CodeRunner, ReplChannel, ReplOp, ReplResponse};
pub use rpc::BackendRpcHandler;
pub use service_defs::ServiceDefinition;
pub use resources::{
    AffinityMap, AffinityPolicy, ComputePlugin, CpuPlugin, DeviceAllocation, DiscreteDevicePlugin,
    KernelResourceSpec, MemPlugin, PluginError,
};
pub use runtime::{
    Container, ContainerConfig, ContainerRuntime, ContainerStatus, ExecResult, RuntimeError,
    ACTIVE_CONTAINER_STATUSES,
};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use runtime::fake::{FakeRuntime, RuntimeCall};
