// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use berth_core::{FakeClock, Clock};
use rust_decimal::Decimal;

fn test_kernel() -> KernelRow {
    let clock = FakeClock::new();
    KernelRow::new(
        KernelId::new("k-1"),
        SessionId::new("s-1"),
        ImageRef::new("cr.backend.ai", "stable", "python", "latest", "x86_64"),
        ResourceSlot::from_pairs([("cpu", Decimal::from(2)), ("mem", Decimal::from(4096))]),
        "default",
        ClusterRole::Main,
        0,
        &clock.now_iso8601(),
    )
}

#[test]
fn new_kernel_is_pending_with_history() {
    let kernel = test_kernel();
    assert_eq!(kernel.status, KernelStatus::Pending);
    assert!(kernel.agent.is_none());
    assert!(kernel.container_id.is_none());
    assert_eq!(kernel.status_history.len(), 1);
    assert!(kernel.status_history.contains_key("PENDING"));
    assert_eq!(kernel.cluster_hostname, "main0");
}

#[test]
fn legal_transition_updates_row() {
    let mut kernel = test_kernel();
    let ok = kernel.transit_status(KernelStatus::Scheduled, None, None, "t1");
    assert!(ok);
    assert_eq!(kernel.status, KernelStatus::Scheduled);
    assert_eq!(kernel.status_history.get("SCHEDULED").map(String::as_str), Some("t1"));
}

#[test]
fn illegal_transition_is_a_no_op() {
    let mut kernel = test_kernel();
    let before = kernel.clone();
    let ok = kernel.transit_status(KernelStatus::Running, None, None, "t1");
    assert!(!ok);
    assert_eq!(kernel, before);
}

#[test]
fn terminal_entry_sets_terminated_at() {
    let mut kernel = test_kernel();
    assert!(kernel.transit_status(KernelStatus::Cancelled, Some(LifecycleReason::UserRequested), None, "t9"));
    assert_eq!(kernel.terminated_at.as_deref(), Some("t9"));
    assert_eq!(kernel.status_info.as_deref(), Some("user-requested"));
}

#[test]
fn history_is_append_only_per_status() {
    let mut kernel = test_kernel();
    kernel.transit_status(KernelStatus::Scheduled, None, None, "t1");
    kernel.transit_status(KernelStatus::Preparing, None, None, "t2");
    kernel.transit_status(KernelStatus::Pulling, None, None, "t3");
    kernel.transit_status(KernelStatus::Prepared, None, None, "t4");
    assert_eq!(
        kernel.status_history.keys().collect::<Vec<_>>(),
        vec!["PENDING", "SCHEDULED", "PREPARING", "PULLING", "PREPARED"]
    );
}

#[test]
fn status_data_merges_instead_of_replacing() {
    let mut kernel = test_kernel();
    kernel.set_status(
        KernelStatus::Scheduled,
        None,
        Some(serde_json::json!({"scheduler": {"retries": 1}})),
        "t1",
    );
    kernel.set_status(
        KernelStatus::Preparing,
        None,
        Some(serde_json::json!({"scheduler": {"last_try": "t1"}})),
        "t2",
    );
    assert_eq!(kernel.status_data["scheduler"]["retries"], 1);
    assert_eq!(kernel.status_data["scheduler"]["last_try"], "t1");
}

#[test]
fn session_status_history_stamps_once() {
    let clock = FakeClock::new();
    let mut session = SessionRow {
        id: SessionId::new("s-1"),
        name: "sess".to_string(),
        session_type: SessionType::Interactive,
        priority: 0,
        cluster_mode: ClusterMode::SingleNode,
        cluster_size: 1,
        domain_name: "default".to_string(),
        group_id: "g-1".to_string(),
        user_uuid: "u-1".to_string(),
        access_key: "AKIA".to_string(),
        scaling_group: "default".to_string(),
        requested_slots: ResourceSlot::new(),
        occupying_slots: ResourceSlot::new(),
        vfolder_mounts: vec![],
        designated_agent: None,
        status: SessionStatus::Pending,
        status_info: None,
        status_data: serde_json::Value::Null,
        status_history: IndexMap::new(),
        created_at: clock.now_iso8601(),
        terminated_at: None,
    };
    session.apply_status(SessionStatus::Scheduled, None, "t1");
    session.apply_status(SessionStatus::Scheduled, None, "t2");
    assert_eq!(session.status_history.get("SCHEDULED").map(String::as_str), Some("t1"));
}

#[test]
fn agent_remaining_slots() {
    let agent = AgentRow {
        id: AgentId::new("i-ag01"),
        addr: "10.0.0.5:6011".to_string(),
        public_key: None,
        architecture: "x86_64".to_string(),
        scaling_group: "default".to_string(),
        available_slots: ResourceSlot::from_pairs([("cpu", Decimal::from(8))]),
        occupied_slots: ResourceSlot::from_pairs([("cpu", Decimal::from(3))]),
        container_count: 3,
        schedulable: true,
        status: AgentStatus::Alive,
        first_contact: "t0".to_string(),
        last_heartbeat_ms: 0,
    };
    assert_eq!(agent.remaining_slots().get("cpu"), Decimal::from(5));
}
