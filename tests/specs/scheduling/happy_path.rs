//! S1: single-kernel session from enqueue to RUNNING.

use crate::prelude::*;
use berth_core::{AgentId, ClusterMode, KernelId, KernelStatus, SessionId, SessionStatus};

#[tokio::test]
async fn single_kernel_session_reaches_running() {
    let cluster = TestCluster::new(Default::default(), &[("i-a", 8, 16384)]).await;
    let recorded = record_events(
        cluster.dispatcher(),
        &[
            "kernel.preparing",
            "kernel.pulling",
            "kernel.creating",
            "kernel.started",
        ],
    );

    let request = cluster.enqueue_request(
        "s-1",
        "AKIA1",
        &[("cpu", 2), ("mem", 4096)],
        1,
        ClusterMode::SingleNode,
    );
    cluster.coordinator.enqueue_session(request).await.unwrap();
    let stats = cluster.coordinator.schedule_tick().await.unwrap();
    assert_eq!(stats.scheduled, vec![SessionId::new("s-1")]);

    // the scheduler committed the assignment and occupancy
    cluster.store.read(|data| {
        let kernel = &data.kernels[&KernelId::new("s-1-k0")];
        assert_eq!(kernel.agent, Some(AgentId::new("i-a")));
        assert!(matches!(
            kernel.status,
            KernelStatus::Scheduled
                | KernelStatus::Preparing
                | KernelStatus::Pulling
                | KernelStatus::Creating
                | KernelStatus::Running
        ));
        let agent = &data.agents[&AgentId::new("i-a")];
        assert_eq!(agent.occupied_slots, slots(&[("cpu", 2), ("mem", 4096)]));
    });

    // the dispatched lifecycle completes
    cluster
        .wait_for("kernel running", |data| {
            data.kernels[&KernelId::new("s-1-k0")].status == KernelStatus::Running
        })
        .await;
    cluster
        .wait_for("session running", |data| {
            data.sessions[&SessionId::new("s-1")].status == SessionStatus::Running
        })
        .await;

    // lifecycle events arrived in pipeline order
    for _ in 0..100 {
        if recorded.lock().len() >= 4 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(
        recorded.lock().clone(),
        vec![
            "kernel.preparing",
            "kernel.pulling",
            "kernel.creating",
            "kernel.started",
        ]
    );

    // status history covers every reached status, stamped in order
    cluster.store.read(|data| {
        let kernel = &data.kernels[&KernelId::new("s-1-k0")];
        let names: Vec<&str> = kernel.status_history.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec![
                "PENDING",
                "SCHEDULED",
                "PREPARING",
                "PULLING",
                "PREPARED",
                "CREATING",
                "RUNNING"
            ]
        );
        let stamps: Vec<&String> = kernel.status_history.values().collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted, "history timestamps must ascend");
        assert!(kernel.container_id.is_some());
        assert_eq!(kernel.repl_in_port, Some(31000));
        assert_eq!(kernel.repl_out_port, Some(31001));
    });

    // the agent really runs the container
    assert_eq!(cluster.agents[0].runtime.container_count(), 1);
}
