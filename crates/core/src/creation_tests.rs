// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn replicas_env_encoding() {
    let mut replicas = IndexMap::new();
    replicas.insert("main".to_string(), 1u32);
    replicas.insert("worker".to_string(), 3u32);
    let cluster = ClusterInfo {
        mode: ClusterMode::MultiNode,
        size: 4,
        role: ClusterRole::Worker,
        idx: 2,
        hostname: "worker2".to_string(),
        replicas,
        network_mode: None,
        network_id: Some(NetworkId::new("net-1")),
        ssh_keypair: None,
        ssh_port_mapping: None,
    };
    assert_eq!(cluster.replicas_env(), "main:1,worker:3");
}

#[test]
fn cluster_mode_serde_matches_wire_names() {
    assert_eq!(
        serde_json::to_string(&ClusterMode::SingleNode).unwrap(),
        "\"SINGLE_NODE\""
    );
    let parsed: ClusterMode = serde_json::from_str("\"MULTI_NODE\"").unwrap();
    assert_eq!(parsed, ClusterMode::MultiNode);
}

#[test]
fn cluster_role_lowercase() {
    assert_eq!(ClusterRole::Main.as_str(), "main");
    assert_eq!(
        serde_json::to_string(&ClusterRole::Worker).unwrap(),
        "\"worker\""
    );
}

#[test]
fn ssh_port_mapping_serde_is_transparent() {
    let mut map = IndexMap::new();
    map.insert("main1".to_string(), ("10.0.0.5".to_string(), 2210u16));
    let mapping = ClusterSshPortMapping(map);
    let json = serde_json::to_string(&mapping).unwrap();
    assert_eq!(json, r#"{"main1":["10.0.0.5",2210]}"#);
}
