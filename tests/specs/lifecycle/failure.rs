//! S4: a mid-pipeline failure tears the kernel creation down and marks the
//! kernel (and its session) ERROR with the stage-local error details.

use crate::prelude::*;
use berth_core::{AutoPullPolicy, ClusterMode, KernelId, KernelStatus, SessionId, SessionStatus};
use rust_decimal::Decimal;
use std::time::Duration;

#[tokio::test]
async fn pull_timeout_rolls_back_and_errors() {
    let cluster = TestCluster::new(Default::default(), &[("i-a", 8, 16384)]).await;
    let agent = &cluster.agents[0];
    // the pull outlives the agent's 1s pull deadline
    agent.runtime.delay_on("pull_image", Duration::from_secs(3));

    let mut request = cluster.enqueue_request(
        "s-1",
        "AKIA1",
        &[("cpu", 2), ("mem", 4096)],
        1,
        ClusterMode::SingleNode,
    );
    for kernel in &mut request.kernels {
        kernel.creation_template.auto_pull = AutoPullPolicy::Always;
    }
    cluster.coordinator.enqueue_session(request).await.unwrap();
    cluster.coordinator.schedule_tick().await.unwrap();

    cluster
        .wait_for("kernel errored", |data| {
            data.kernels[&KernelId::new("s-1-k0")].status == KernelStatus::Error
        })
        .await;

    cluster.store.read(|data| {
        let kernel = &data.kernels[&KernelId::new("s-1-k0")];
        // a stage-local timeout that never left the agent process
        let error = &kernel.status_data["error"];
        assert_eq!(error["src"], "other");
        assert_eq!(error["name"], "TimeoutError");
        assert!(error["traceback"].as_str().unwrap().contains("image-pull"));
        assert_eq!(kernel.status_info.as_deref(), Some("operation-timeout"));
        assert_eq!(
            data.sessions[&SessionId::new("s-1")].status,
            SessionStatus::Error
        );
    });

    // the agent tore everything down: no container, no allocation, no scratch
    assert_eq!(agent.runtime.container_count(), 0);
    assert_eq!(agent.cpu_free(), Decimal::from(8));
    assert!(agent.backend.context().registry.is_empty());
}

#[tokio::test]
async fn generic_stage_failure_is_also_stage_local() {
    let cluster = TestCluster::new(Default::default(), &[("i-a", 8, 16384)]).await;
    let agent = &cluster.agents[0];
    agent.runtime.fail_on("pull_image", "registry refused the manifest");

    let mut request = cluster.enqueue_request(
        "s-1",
        "AKIA1",
        &[("cpu", 2), ("mem", 4096)],
        1,
        ClusterMode::SingleNode,
    );
    for kernel in &mut request.kernels {
        kernel.creation_template.auto_pull = AutoPullPolicy::Always;
    }
    cluster.coordinator.enqueue_session(request).await.unwrap();
    cluster.coordinator.schedule_tick().await.unwrap();

    cluster
        .wait_for("kernel errored", |data| {
            data.kernels[&KernelId::new("s-1-k0")].status == KernelStatus::Error
        })
        .await;

    cluster.store.read(|data| {
        let error = &data.kernels[&KernelId::new("s-1-k0")].status_data["error"];
        assert_eq!(error["src"], "other");
        assert_eq!(error["name"], "ProvisionError");
        assert!(error["repr"]
            .as_str()
            .unwrap()
            .contains("registry refused the manifest"));
    });
    assert_eq!(agent.cpu_free(), Decimal::from(8));
}
