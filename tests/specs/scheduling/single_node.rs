//! S5: SINGLE_NODE multi-kernel sessions need one agent that fits the
//! aggregate requirement.

use crate::prelude::*;
use berth_core::{AgentId, ClusterMode, SessionId};

#[tokio::test]
async fn aggregate_requirement_picks_the_big_agent() {
    let cluster = TestCluster::new(
        Default::default(),
        &[("i-a", 2, 2048), ("i-b", 8, 8192)],
    )
    .await;

    let request = cluster.enqueue_request(
        "s-1",
        "AKIA1",
        &[("cpu", 1), ("mem", 1024)],
        3,
        ClusterMode::SingleNode,
    );
    cluster.coordinator.enqueue_session(request).await.unwrap();
    let stats = cluster.coordinator.schedule_tick().await.unwrap();
    assert_eq!(stats.scheduled, vec![SessionId::new("s-1")]);

    cluster.store.read(|data| {
        // aggregate {cpu:3, mem:3072} fits B, not A
        for kernel in data.session_kernels(&SessionId::new("s-1")) {
            assert_eq!(kernel.agent, Some(AgentId::new("i-b")));
        }
        let b = &data.agents[&AgentId::new("i-b")];
        assert_eq!(b.occupied_slots, slots(&[("cpu", 3), ("mem", 3072)]));
        let a = &data.agents[&AgentId::new("i-a")];
        assert!(a.occupied_slots.is_zero());
    });

    // all three kernels come up on agent B
    cluster
        .wait_for("all kernels running", |data| {
            data.session_kernels(&SessionId::new("s-1"))
                .iter()
                .all(|kernel| kernel.status == berth_core::KernelStatus::Running)
        })
        .await;
    let b_agent = cluster
        .agents
        .iter()
        .find(|agent| agent.id == AgentId::new("i-b"))
        .unwrap();
    assert_eq!(b_agent.runtime.container_count(), 3);
}
