//! Termination mirrors creation: running kernels stop, slots free up,
//! scratch is reaped on clean.

use crate::prelude::*;
use berth_core::{
    AgentId, ClusterMode, KernelId, KernelStatus, LifecycleReason, SessionId, SessionStatus,
};
use berth_manager::AgentClient;
use rust_decimal::Decimal;

async fn running_session(cluster: &TestCluster, session_id: &str) {
    let request = cluster.enqueue_request(
        session_id,
        "AKIA1",
        &[("cpu", 2), ("mem", 4096)],
        1,
        ClusterMode::SingleNode,
    );
    cluster.coordinator.enqueue_session(request).await.unwrap();
    cluster.coordinator.schedule_tick().await.unwrap();
    let session_id = SessionId::new(session_id);
    cluster
        .wait_for("session running", |data| {
            data.sessions[&session_id].status == SessionStatus::Running
        })
        .await;
}

#[tokio::test]
async fn destroy_session_stops_kernels_and_frees_slots() {
    let cluster = TestCluster::new(Default::default(), &[("i-a", 8, 16384)]).await;
    running_session(&cluster, "s-1").await;
    let agent = &cluster.agents[0];
    assert_eq!(agent.runtime.container_count(), 1);
    assert_eq!(agent.cpu_free(), Decimal::from(6));

    cluster
        .registry
        .destroy_session(
            &SessionId::new("s-1"),
            LifecycleReason::UserRequested,
            false,
        )
        .await
        .unwrap();

    cluster
        .wait_for("session terminated", |data| {
            data.sessions[&SessionId::new("s-1")].status == SessionStatus::Terminated
        })
        .await;
    cluster.store.read(|data| {
        let kernel = &data.kernels[&KernelId::new("s-1-k0")];
        assert_eq!(kernel.status, KernelStatus::Terminated);
        assert_eq!(kernel.status_info.as_deref(), Some("user-requested"));
        assert!(kernel.terminated_at.is_some());
        assert!(data.agents[&AgentId::new("i-a")].occupied_slots.is_zero());
    });
    assert_eq!(agent.runtime.container_count(), 0);
    assert_eq!(agent.cpu_free(), Decimal::from(8));
    assert!(agent.backend.context().registry.is_empty());
}

#[tokio::test]
async fn terminated_kernels_free_capacity_for_the_next_session() {
    // capacity for exactly one session at a time
    let cluster = TestCluster::new(Default::default(), &[("i-a", 2, 4096)]).await;
    running_session(&cluster, "s-1").await;

    let request = cluster.enqueue_request(
        "s-2",
        "AKIA2",
        &[("cpu", 2), ("mem", 4096)],
        1,
        ClusterMode::SingleNode,
    );
    cluster.coordinator.enqueue_session(request).await.unwrap();
    cluster.coordinator.schedule_tick().await.unwrap();
    assert_eq!(cluster.session_status("s-2"), SessionStatus::Pending);

    cluster
        .registry
        .destroy_session(
            &SessionId::new("s-1"),
            LifecycleReason::UserRequested,
            false,
        )
        .await
        .unwrap();
    cluster
        .wait_for("first terminated", |data| {
            data.sessions[&SessionId::new("s-1")].status == SessionStatus::Terminated
        })
        .await;

    cluster.coordinator.schedule_tick().await.unwrap();
    cluster
        .wait_for("second running", |data| {
            data.sessions[&SessionId::new("s-2")].status == SessionStatus::Running
        })
        .await;
}

#[tokio::test]
async fn clean_kernel_reaps_scratch_after_termination() {
    let cluster = TestCluster::new(Default::default(), &[("i-a", 8, 16384)]).await;
    running_session(&cluster, "s-1").await;
    let agent = &cluster.agents[0];
    let scratch_root = agent.backend.context().config.container.scratch_root.clone();
    assert!(scratch_root.join("s-1-k0").exists());

    cluster
        .registry
        .destroy_session(
            &SessionId::new("s-1"),
            LifecycleReason::UserRequested,
            false,
        )
        .await
        .unwrap();
    cluster
        .wait_for("terminated", |data| {
            data.sessions[&SessionId::new("s-1")].status == SessionStatus::Terminated
        })
        .await;
    // scratch survives until the manager chooses to reap
    assert!(scratch_root.join("s-1-k0").exists());

    cluster
        .client
        .clean_kernel(&AgentId::new("i-a"), &KernelId::new("s-1-k0"))
        .await
        .unwrap();
    assert!(!scratch_root.join("s-1-k0").exists());
}
