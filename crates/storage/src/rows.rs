// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session, kernel, and agent rows.
//!
//! `status_history` is append-only: exactly one entry per status ever
//! reached, keyed by status name, valued with the ISO-8601 transition time.

use berth_core::{
    AgentId, AgentStatus, ClusterMode, ClusterRole, ContainerId, ImageRef, KernelCreationInfo,
    KernelId, KernelStatus, LifecycleReason, ResourceSlot, ServicePort, SessionId, SessionStatus,
    SessionType, VFolderMount,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One kernel as persisted by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelRow {
    pub id: KernelId,
    pub session_id: SessionId,

    pub image: ImageRef,
    pub architecture: String,
    pub cluster_role: ClusterRole,
    pub cluster_idx: u32,
    pub cluster_hostname: String,
    pub scaling_group: String,

    /// Assigned agent; null until the kernel leaves PENDING.
    pub agent: Option<AgentId>,
    pub agent_addr: Option<String>,
    /// Runtime container; null until CREATING.
    pub container_id: Option<ContainerId>,

    pub requested_slots: ResourceSlot,
    pub occupied_slots: ResourceSlot,

    pub kernel_host: Option<String>,
    pub repl_in_port: Option<u16>,
    pub repl_out_port: Option<u16>,
    pub service_ports: Vec<ServicePort>,
    pub vfolder_mounts: Vec<VFolderMount>,

    /// Enqueue-time creation request, completed with the agent assignment
    /// when the kernel is dispatched.
    pub creation_template: Option<KernelCreationInfo>,

    pub status: KernelStatus,
    pub status_changed: Option<String>,
    pub status_info: Option<String>,
    pub status_data: Value,
    pub status_history: IndexMap<String, String>,
    /// Resource counters captured at termination.
    pub last_stat: Value,
    pub created_at: String,
    pub terminated_at: Option<String>,
}

impl KernelRow {
    pub fn new(
        id: KernelId,
        session_id: SessionId,
        image: ImageRef,
        requested_slots: ResourceSlot,
        scaling_group: impl Into<String>,
        cluster_role: ClusterRole,
        cluster_idx: u32,
        now_iso: &str,
    ) -> Self {
        let architecture = image.architecture.clone();
        let mut status_history = IndexMap::new();
        status_history.insert(KernelStatus::Pending.name().to_string(), now_iso.to_string());
        Self {
            id,
            session_id,
            image,
            architecture,
            cluster_hostname: format!("{}{}", cluster_role.as_str(), cluster_idx),
            cluster_role,
            cluster_idx,
            scaling_group: scaling_group.into(),
            agent: None,
            agent_addr: None,
            container_id: None,
            requested_slots,
            occupied_slots: ResourceSlot::new(),
            kernel_host: None,
            repl_in_port: None,
            repl_out_port: None,
            service_ports: Vec::new(),
            vfolder_mounts: Vec::new(),
            creation_template: None,
            status: KernelStatus::Pending,
            status_changed: Some(now_iso.to_string()),
            status_info: None,
            status_data: Value::Null,
            status_history,
            last_stat: Value::Null,
            created_at: now_iso.to_string(),
            terminated_at: None,
        }
    }

    pub fn is_main(&self) -> bool {
        self.cluster_role == ClusterRole::Main
    }

    /// Apply a status transition if the transition map allows it.
    ///
    /// Returns `false` (leaving the row untouched) for illegal edges; callers
    /// log the refusal.
    pub fn transit_status(
        &mut self,
        status: KernelStatus,
        status_info: Option<LifecycleReason>,
        status_data: Option<Value>,
        now_iso: &str,
    ) -> bool {
        if !self.status.can_transit(status) {
            return false;
        }
        self.set_status(status, status_info, status_data, now_iso);
        true
    }

    /// Unconditionally set the status, stamping history and terminal times.
    pub fn set_status(
        &mut self,
        status: KernelStatus,
        status_info: Option<LifecycleReason>,
        status_data: Option<Value>,
        now_iso: &str,
    ) {
        if status.is_terminal() {
            self.terminated_at = Some(now_iso.to_string());
        }
        self.status = status;
        self.status_changed = Some(now_iso.to_string());
        self.status_history
            .entry(status.name().to_string())
            .or_insert_with(|| now_iso.to_string());
        if let Some(info) = status_info {
            self.status_info = Some(info.as_str().to_string());
        }
        if let Some(data) = status_data {
            crate::json::json_merge(&mut self.status_data, &[], data);
        }
    }
}

/// One session as persisted by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub name: String,
    pub session_type: SessionType,
    /// Larger schedules first; FIFO within equal priorities.
    pub priority: i32,

    pub cluster_mode: ClusterMode,
    pub cluster_size: u32,

    pub domain_name: String,
    pub group_id: String,
    pub user_uuid: String,
    pub access_key: String,
    pub scaling_group: String,

    pub requested_slots: ResourceSlot,
    pub occupying_slots: ResourceSlot,
    pub vfolder_mounts: Vec<VFolderMount>,
    pub designated_agent: Option<AgentId>,

    pub status: SessionStatus,
    pub status_info: Option<String>,
    pub status_data: Value,
    pub status_history: IndexMap<String, String>,
    pub created_at: String,
    pub terminated_at: Option<String>,
}

impl SessionRow {
    /// Set a (derived) session status, stamping history once per status.
    pub fn apply_status(
        &mut self,
        status: SessionStatus,
        status_info: Option<LifecycleReason>,
        now_iso: &str,
    ) {
        if status == self.status {
            return;
        }
        if status.is_terminal() {
            self.terminated_at = Some(now_iso.to_string());
        }
        self.status = status;
        self.status_history
            .entry(status.name().to_string())
            .or_insert_with(|| now_iso.to_string());
        if let Some(info) = status_info {
            self.status_info = Some(info.as_str().to_string());
        }
    }
}

/// One worker agent as persisted by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRow {
    pub id: AgentId,
    pub addr: String,
    /// RPC auth key; unauthenticated peers when absent.
    pub public_key: Option<String>,
    pub architecture: String,
    pub scaling_group: String,
    pub available_slots: ResourceSlot,
    pub occupied_slots: ResourceSlot,
    pub container_count: u32,
    pub schedulable: bool,
    pub status: AgentStatus,
    pub first_contact: String,
    pub last_heartbeat_ms: u64,
}

impl AgentRow {
    /// Capacity not yet claimed by kernels.
    pub fn remaining_slots(&self) -> ResourceSlot {
        self.available_slots.sub(&self.occupied_slots)
    }
}

#[cfg(test)]
#[path = "rows_tests.rs"]
mod tests;
