// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! berth-core: Domain model for the berth compute-session orchestrator

pub mod clock;
pub mod creation;
pub mod event;
pub mod id;
pub mod image;
pub mod mount;
pub mod ports;
pub mod reason;
pub mod slot;
pub mod status;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use creation::{
    ClusterInfo, ClusterMode, ClusterRole, ClusterSshPortMapping, ImageRegistry,
    KernelCreationInfo, KernelOwnership, SessionType, SshKeyPair,
};
pub use event::{AgentHeartbeatInfo, Event, EventDelivery, EventDomain, KernelConnectionInfo};
pub use id::{AgentId, ContainerId, IdGen, KernelId, NetworkId, SessionId, ShortId, UuidIdGen};
pub use image::{AutoPullPolicy, ImageRef, ImageRefError};
pub use mount::{DotfileInfo, Mount, MountPermission, MountType, VFolderMount};
pub use ports::{PortMapping, PortProtocol, ServicePort, REPL_IN_PORT, REPL_OUT_PORT};
pub use reason::LifecycleReason;
pub use slot::{ResourceSlot, SlotName};
pub use status::{
    derive_session_status, AgentStatus, KernelStatus, SessionStatus,
    AGENT_RESOURCE_OCCUPYING_STATUSES, DEAD_KERNEL_STATUSES,
};
