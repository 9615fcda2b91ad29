//! S2: predicate failure keeps the session pending; it schedules once the
//! blocking session ends, and the retry counter keeps counting.

use crate::prelude::*;
use berth_core::{ClusterMode, KernelStatus, LifecycleReason, SessionId, SessionStatus};
use berth_manager::ManagerConfig;

fn config_with_concurrency_one() -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.scheduler.default_concurrency = Some(1);
    config
}

#[tokio::test]
async fn concurrency_predicate_then_success() {
    let cluster =
        TestCluster::new(config_with_concurrency_one(), &[("i-a", 16, 32768)]).await;

    // first session occupies the user's single concurrency slot
    let first = cluster.enqueue_request(
        "s-first",
        "AKIA1",
        &[("cpu", 2), ("mem", 4096)],
        1,
        ClusterMode::SingleNode,
    );
    cluster.coordinator.enqueue_session(first).await.unwrap();
    cluster.coordinator.schedule_tick().await.unwrap();
    cluster
        .wait_for("first session running", |data| {
            data.sessions[&SessionId::new("s-first")].status == SessionStatus::Running
        })
        .await;

    // the second session trips the concurrency predicate
    let second = cluster.enqueue_request(
        "s-second",
        "AKIA1",
        &[("cpu", 2), ("mem", 4096)],
        1,
        ClusterMode::SingleNode,
    );
    cluster.coordinator.enqueue_session(second).await.unwrap();
    cluster.coordinator.schedule_tick().await.unwrap();

    cluster.store.read(|data| {
        let session = &data.sessions[&SessionId::new("s-second")];
        assert_eq!(session.status, SessionStatus::Pending);
        let scheduler = &session.status_data["scheduler"];
        assert_eq!(scheduler["retries"], 1);
        assert_eq!(scheduler["failed_predicates"][0]["name"], "concurrency");
        assert!(scheduler["failed_predicates"][0]["msg"]
            .as_str()
            .unwrap()
            .contains("concurrent sessions"));
    });

    // terminate the first session, freeing the slot
    cluster
        .registry
        .destroy_session(
            &SessionId::new("s-first"),
            LifecycleReason::UserRequested,
            false,
        )
        .await
        .unwrap();
    cluster
        .wait_for("first session terminated", |data| {
            data.sessions[&SessionId::new("s-first")].status == SessionStatus::Terminated
        })
        .await;

    // the next tick schedules; the final attempt still increments retries
    cluster.coordinator.schedule_tick().await.unwrap();
    cluster
        .wait_for("second session running", |data| {
            data.kernels
                .values()
                .any(|k| k.session_id.as_str() == "s-second" && k.status == KernelStatus::Running)
        })
        .await;
    cluster.store.read(|data| {
        let scheduler = &data.sessions[&SessionId::new("s-second")].status_data["scheduler"];
        assert_eq!(scheduler["retries"], 2);
        assert_eq!(scheduler["failed_predicates"], serde_json::json!([]));
    });
}
