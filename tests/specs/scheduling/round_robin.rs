//! S6: round-robin selection is deterministic over the sorted agent list.

use crate::prelude::*;
use berth_core::{ClusterMode, KernelId, SessionId};
use berth_manager::{ManagerConfig, SelectorStrategy};

fn round_robin_config() -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.scheduler.strategy = SelectorStrategy::RoundRobin;
    config
}

#[tokio::test]
async fn four_sessions_wrap_around_three_agents() {
    let cluster = TestCluster::new(
        round_robin_config(),
        &[("i-a2", 64, 65536), ("i-a1", 64, 65536), ("i-a3", 64, 65536)],
    )
    .await;

    let mut assigned = Vec::new();
    for n in 0..4 {
        let session_id = format!("s-{n}");
        let request = cluster.enqueue_request(
            &session_id,
            "AKIA1",
            &[("cpu", 1), ("mem", 1024)],
            1,
            ClusterMode::SingleNode,
        );
        cluster.coordinator.enqueue_session(request).await.unwrap();
        let stats = cluster.coordinator.schedule_tick().await.unwrap();
        assert!(stats.scheduled.contains(&SessionId::new(session_id.as_str())));
        let agent = cluster.store.read(|data| {
            data.kernels[&KernelId::new(format!("s-{n}-k0"))]
                .agent
                .clone()
                .unwrap()
                .to_string()
        });
        assigned.push(agent);
    }

    // lexicographic order with wraparound, regardless of registration order
    assert_eq!(assigned, vec!["i-a1", "i-a2", "i-a3", "i-a1"]);
}
