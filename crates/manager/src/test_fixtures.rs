// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for manager tests

use berth_core::{
    AgentId, AgentStatus, ClusterMode, ClusterRole, ImageRef, KernelId, ResourceSlot, SessionId,
    SessionStatus, SessionType,
};
use berth_storage::{AgentRow, KernelRow, SessionRow};
use indexmap::IndexMap;
use rust_decimal::Decimal;

pub fn slots(pairs: &[(&str, i64)]) -> ResourceSlot {
    ResourceSlot::from_pairs(pairs.iter().map(|(k, v)| (*k, Decimal::from(*v))))
}

pub fn image() -> ImageRef {
    ImageRef::new("cr.backend.ai", "stable", "python", "3.9-ubuntu22.04", "x86_64")
}

pub fn session_row(id: &str, access_key: &str, status: SessionStatus) -> SessionRow {
    SessionRow {
        id: SessionId::new(id),
        name: format!("sess-{id}"),
        session_type: SessionType::Interactive,
        priority: 0,
        cluster_mode: ClusterMode::SingleNode,
        cluster_size: 1,
        domain_name: "default".to_string(),
        group_id: "g-1".to_string(),
        user_uuid: "u-1".to_string(),
        access_key: access_key.to_string(),
        scaling_group: "default".to_string(),
        requested_slots: slots(&[("cpu", 2), ("mem", 4096)]),
        occupying_slots: ResourceSlot::new(),
        vfolder_mounts: vec![],
        designated_agent: None,
        status,
        status_info: None,
        status_data: serde_json::Value::Null,
        status_history: IndexMap::new(),
        created_at: "2026-01-01T00:00:00+00:00".to_string(),
        terminated_at: None,
    }
}

pub fn kernel_row(id: &str, session_id: &str) -> KernelRow {
    KernelRow::new(
        KernelId::new(id),
        SessionId::new(session_id),
        image(),
        slots(&[("cpu", 2), ("mem", 4096)]),
        "default",
        ClusterRole::Main,
        0,
        "2026-01-01T00:00:00+00:00",
    )
}

pub fn agent_row(id: &str, available: &[(&str, i64)]) -> AgentRow {
    AgentRow {
        id: AgentId::new(id),
        addr: format!("{id}:6011"),
        public_key: None,
        architecture: "x86_64".to_string(),
        scaling_group: "default".to_string(),
        available_slots: slots(available),
        occupied_slots: ResourceSlot::new(),
        container_count: 0,
        schedulable: true,
        status: AgentStatus::Alive,
        first_contact: "2026-01-01T00:00:00+00:00".to_string(),
        last_heartbeat_ms: 0,
    }
}
