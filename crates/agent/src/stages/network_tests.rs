// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::runtime::fake::FakeRuntime;
use crate::runtime::ContainerConfig;
use berth_core::test_support::sample_creation_info;
use berth_core::PortProtocol;
use serde_json::json;

fn pre_spec() -> NetworkPreSpec {
    NetworkPreSpec {
        info: sample_creation_info("k-1", "s-1"),
        network_mode: None,
        network_name: None,
        alternative_bridge: None,
        plugins: IndexMap::new(),
        gwbridge_subnet: None,
    }
}

#[tokio::test]
async fn default_mode_is_bridge() {
    let result = NetworkPreSetupProvisioner.setup(&pre_spec()).await.unwrap();
    assert_eq!(result.mode, BRIDGE_NETWORK_MODE);
    assert!(result.plugin.is_none());
}

#[tokio::test]
async fn named_bridge_sets_cluster_alias() {
    let mut spec = pre_spec();
    spec.network_name = Some("bai-net-s1".to_string());
    let result = NetworkPreSetupProvisioner.setup(&spec).await.unwrap();
    assert_eq!(result.container_args["network_mode"], "bai-net-s1");
    assert_eq!(result.container_args["aliases"], json!(["main0"]));
}

#[tokio::test]
async fn host_mode_passes_through() {
    let mut spec = pre_spec();
    spec.network_mode = Some(HOST_NETWORK_MODE.to_string());
    let result = NetworkPreSetupProvisioner.setup(&spec).await.unwrap();
    assert_eq!(result.container_args["network_mode"], "host");
}

#[tokio::test]
async fn alternative_bridge_is_appended() {
    let mut spec = pre_spec();
    spec.alternative_bridge = Some("br-storage".to_string());
    let result = NetworkPreSetupProvisioner.setup(&spec).await.unwrap();
    assert_eq!(result.container_args["extra_networks"], json!(["br-storage"]));
}

#[tokio::test]
async fn unknown_plugin_mode_fails() {
    let mut spec = pre_spec();
    spec.network_mode = Some("overlay".to_string());
    let err = NetworkPreSetupProvisioner.setup(&spec).await.unwrap_err();
    assert!(err.cause.contains("not loaded"));
}

struct GlobalPlugin;

#[async_trait]
impl NetworkPlugin for GlobalPlugin {
    fn mode(&self) -> &str {
        "overlay"
    }

    async fn capabilities(&self) -> Vec<NetworkCapability> {
        vec![NetworkCapability::Global]
    }

    async fn join_network(
        &self,
        _info: &KernelCreationInfo,
    ) -> Result<serde_json::Value, ProvisionError> {
        Ok(json!({"network_mode": "overlay-net"}))
    }

    async fn expose_ports(
        &self,
        _bind_host: &str,
        port_mappings: &[PortMapping],
    ) -> Result<ContainerNetworkInfo, ProvisionError> {
        let mut port_map = IndexMap::new();
        for mapping in port_mappings {
            port_map.insert(mapping.container_port, mapping.host_port + 1000);
        }
        Ok(ContainerNetworkInfo {
            container_host: "edge.example.com".to_string(),
            port_map,
        })
    }

    async fn leave_network(&self, _info: &KernelCreationInfo) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[tokio::test]
async fn plugin_mode_joins_and_merges_fragments() {
    let mut spec = pre_spec();
    spec.network_mode = Some("overlay".to_string());
    spec.gwbridge_subnet = Some("172.18.0.0/16".to_string());
    spec.plugins
        .insert("overlay".to_string(), Arc::new(GlobalPlugin));
    let result = NetworkPreSetupProvisioner.setup(&spec).await.unwrap();
    assert_eq!(result.container_args["network_mode"], "overlay-net");
    assert_eq!(
        result.container_args["env"]["OMPI_MCA_btl_tcp_if_exclude"],
        "127.0.0.1/32,172.18.0.0/16"
    );
    assert!(result.plugin.is_some());
}

fn mappings() -> Vec<PortMapping> {
    vec![
        PortMapping { container_port: 2000, host_port: 30000 },
        PortMapping { container_port: 2001, host_port: 30001 },
        PortMapping { container_port: 8090, host_port: 30002 },
    ]
}

fn service_ports() -> Vec<ServicePort> {
    vec![ServicePort {
        name: "jupyter".to_string(),
        protocol: PortProtocol::Http,
        container_ports: vec![8090],
        host_ports: vec![30002],
        is_inference: false,
    }]
}

async fn running_container(runtime: &FakeRuntime) -> ContainerId {
    let id = runtime
        .create_container(
            "kernel.python.k-1",
            &ContainerConfig(json!({
                "ports": [
                    {"container_port": 2000, "host_port": 30000},
                    {"container_port": 2001, "host_port": 30001},
                    {"container_port": 8090, "host_port": 30002},
                ],
            })),
        )
        .await
        .unwrap();
    runtime.start_container(&id).await.unwrap();
    id
}

#[tokio::test]
async fn post_setup_reads_runtime_ports() {
    let runtime = FakeRuntime::new();
    let id = running_container(&runtime).await;
    let provisioner = NetworkPostSetupProvisioner::new(Arc::new(runtime));
    let result = provisioner
        .setup(&NetworkPostSpec {
            container_id: id,
            plugin: None,
            bind_host: "10.0.0.5".to_string(),
            advertised_host: None,
            service_ports: service_ports(),
            port_mappings: mappings(),
            additional_networks: vec![],
        })
        .await
        .unwrap();
    assert_eq!(result.kernel_host, "10.0.0.5");
    assert_eq!(result.repl_in_port, 30000);
    assert_eq!(result.repl_out_port, 30001);
    assert_eq!(result.service_ports[0].host_ports, vec![30002]);
}

#[tokio::test]
async fn advertised_host_overrides_bind_host() {
    let runtime = FakeRuntime::new();
    let id = running_container(&runtime).await;
    let provisioner = NetworkPostSetupProvisioner::new(Arc::new(runtime));
    let result = provisioner
        .setup(&NetworkPostSpec {
            container_id: id,
            plugin: None,
            bind_host: "0.0.0.0".to_string(),
            advertised_host: Some("gpu01.cluster".to_string()),
            service_ports: vec![],
            port_mappings: mappings(),
            additional_networks: vec![],
        })
        .await
        .unwrap();
    assert_eq!(result.kernel_host, "gpu01.cluster");
}

#[tokio::test]
async fn global_plugin_advertises_ports() {
    let runtime = FakeRuntime::new();
    let id = running_container(&runtime).await;
    let provisioner = NetworkPostSetupProvisioner::new(Arc::new(runtime));
    let result = provisioner
        .setup(&NetworkPostSpec {
            container_id: id,
            plugin: Some(Arc::new(GlobalPlugin)),
            bind_host: "10.0.0.5".to_string(),
            advertised_host: None,
            service_ports: service_ports(),
            port_mappings: mappings(),
            additional_networks: vec![],
        })
        .await
        .unwrap();
    assert_eq!(result.kernel_host, "edge.example.com");
    assert_eq!(result.repl_in_port, 31000);
    assert_eq!(result.service_ports[0].host_ports, vec![31002]);
}

#[tokio::test]
async fn missing_repl_port_is_fatal() {
    let runtime = FakeRuntime::new();
    let id = runtime
        .create_container(
            "kernel.python.k-1",
            &ContainerConfig(json!({
                "ports": [{"container_port": 2000, "host_port": 30000}],
            })),
        )
        .await
        .unwrap();
    runtime.start_container(&id).await.unwrap();
    let provisioner = NetworkPostSetupProvisioner::new(Arc::new(runtime));
    let err = provisioner
        .setup(&NetworkPostSpec {
            container_id: id,
            plugin: None,
            bind_host: "10.0.0.5".to_string(),
            advertised_host: None,
            service_ports: vec![],
            port_mappings: vec![PortMapping { container_port: 2000, host_port: 30000 }],
            additional_networks: vec![],
        })
        .await
        .unwrap_err();
    assert!(err.cause.contains("replout"));
}

#[tokio::test]
async fn mismatched_published_port_is_fatal() {
    let runtime = FakeRuntime::new();
    let id = running_container(&runtime).await;
    let provisioner = NetworkPostSetupProvisioner::new(Arc::new(runtime));
    let mut wrong = mappings();
    wrong[0].host_port = 39999;
    let err = provisioner
        .setup(&NetworkPostSpec {
            container_id: id,
            plugin: None,
            bind_host: "10.0.0.5".to_string(),
            advertised_host: None,
            service_ports: vec![],
            port_mappings: wrong,
            additional_networks: vec![],
        })
        .await
        .unwrap_err();
    assert!(err.cause.contains("expected 39999"));
}
