//! S3: no agent fits, then capacity arrives.

use crate::prelude::*;
use berth_core::{AgentId, ClusterMode, KernelId, SessionId, SessionStatus};

#[tokio::test]
async fn waits_for_an_agent_that_fits() {
    let cluster = TestCluster::new(Default::default(), &[("i-small", 1, 16384)]).await;

    let request = cluster.enqueue_request(
        "s-1",
        "AKIA1",
        &[("cpu", 4), ("mem", 4096)],
        1,
        ClusterMode::SingleNode,
    );
    cluster.coordinator.enqueue_session(request).await.unwrap();
    let stats = cluster.coordinator.schedule_tick().await.unwrap();
    assert_eq!(stats.postponed, vec![SessionId::new("s-1")]);

    cluster.store.read(|data| {
        let session = &data.sessions[&SessionId::new("s-1")];
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.status_info.as_deref(), Some("no-available-instances"));
        assert_eq!(session.status_data["scheduler"]["retries"], 1);
    });

    // a big agent joins via heartbeat
    let big = TestAgent::new("i-big", cluster.producer.clone(), 8, 16384);
    cluster
        .client
        .attach(big.id.clone(), std::sync::Arc::clone(&big.backend));
    cluster
        .registry
        .handle_heartbeat(&big.id, &big.heartbeat_info())
        .await
        .unwrap();

    let stats = cluster.coordinator.schedule_tick().await.unwrap();
    assert_eq!(stats.scheduled, vec![SessionId::new("s-1")]);
    cluster.store.read(|data| {
        assert_eq!(
            data.kernels[&KernelId::new("s-1-k0")].agent,
            Some(AgentId::new("i-big"))
        );
    });
}
