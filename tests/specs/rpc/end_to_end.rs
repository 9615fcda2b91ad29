//! Manager-to-agent RPC over real TCP: the peer cache, the auth handshake,
//! the msgpack wire, and the agent's RPC handler.

use crate::prelude::*;
use berth_agent::BackendRpcHandler;
use berth_core::{AgentId, KernelId, LifecycleReason};
use berth_manager::{AgentClient, RpcAgentClient};
use berth_rpc::{AddrResolver, AgentRpcCache, AuthKey, RpcServer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct StaticResolver(HashMap<AgentId, (String, Option<String>)>);

#[async_trait::async_trait]
impl AddrResolver for StaticResolver {
    async fn resolve(&self, agent_id: &AgentId) -> Option<(String, Option<String>)> {
        self.0.get(agent_id).cloned()
    }
}

async fn serve_agent(agent: &TestAgent, auth_key: Option<&str>) -> RpcServer {
    let handler = BackendRpcHandler::new(Arc::clone(&agent.backend));
    RpcServer::bind("127.0.0.1:0", auth_key.map(AuthKey::new), Arc::new(handler))
        .await
        .expect("bind agent rpc")
}

fn rpc_client(agent_id: &str, addr: String, key: Option<&str>) -> RpcAgentClient {
    let mut known = HashMap::new();
    known.insert(
        AgentId::new(agent_id),
        (addr, key.map(str::to_string)),
    );
    let cache = AgentRpcCache::new(
        Arc::new(StaticResolver(known)),
        "manager",
        Duration::from_secs(60),
    );
    RpcAgentClient::new(Arc::new(cache), Some(Duration::from_secs(10)))
}

#[tokio::test]
async fn create_and_destroy_over_the_wire() {
    let (producer, _dispatcher) = berth_bus::EventBus::new("manager");
    let agent = TestAgent::new("i-rpc", producer, 8, 16384);
    let server = serve_agent(&agent, Some("agent-psk")).await;
    let client = rpc_client("i-rpc", server.local_addr().to_string(), Some("agent-psk"));

    client.ping(&AgentId::new("i-rpc")).await.unwrap();

    let mut info = berth_core::test_support::sample_creation_info("k-1", "s-1");
    info.allocated_host_ports = vec![31000, 31001, 31002, 31003];
    client
        .create_kernel(&AgentId::new("i-rpc"), &info)
        .await
        .unwrap();
    assert_eq!(agent.runtime.container_count(), 1);

    let logs = {
        let kernel = agent
            .backend
            .context()
            .registry
            .get(&KernelId::new("k-1"))
            .unwrap();
        agent.runtime.append_log(&kernel.container_id, "kernel says hi");
        client
            .get_container_logs(&AgentId::new("i-rpc"), &kernel.container_id)
            .await
            .unwrap()
    };
    assert_eq!(logs, vec!["kernel says hi"]);

    client
        .destroy_kernel(
            &AgentId::new("i-rpc"),
            &KernelId::new("k-1"),
            &LifecycleReason::UserRequested,
        )
        .await
        .unwrap();
    assert_eq!(agent.runtime.container_count(), 0);
}

#[tokio::test]
async fn agent_side_failure_carries_the_stage() {
    let (producer, _dispatcher) = berth_bus::EventBus::new("manager");
    let agent = TestAgent::new("i-rpc", producer, 8, 16384);
    agent.runtime.fail_on("create_container", "no space left");
    let server = serve_agent(&agent, None).await;
    let client = rpc_client("i-rpc", server.local_addr().to_string(), None);

    let mut info = berth_core::test_support::sample_creation_info("k-1", "s-1");
    info.allocated_host_ports = vec![31000, 31001, 31002, 31003];
    let err = client
        .create_kernel(&AgentId::new("i-rpc"), &info)
        .await
        .unwrap_err();
    let berth_rpc::CallError::Agent(agent_err) = err else {
        panic!("expected agent error, got {err:?}");
    };
    assert_eq!(agent_err.exc_name, "KernelCreationFailed");
    assert_eq!(agent_err.exc_tb.as_deref(), Some("stage: container-create"));
    assert!(agent_err.exc_repr.contains("no space left"));
}

#[tokio::test]
async fn wrong_key_cannot_reach_the_agent() {
    let (producer, _dispatcher) = berth_bus::EventBus::new("manager");
    let agent = TestAgent::new("i-rpc", producer, 8, 16384);
    let server = serve_agent(&agent, Some("right-key")).await;
    let client = rpc_client("i-rpc", server.local_addr().to_string(), Some("wrong-key"));

    let err = client.ping(&AgentId::new("i-rpc")).await.unwrap_err();
    let berth_rpc::CallError::Rpc(rpc_err) = err else {
        panic!("expected rpc error, got {err:?}");
    };
    assert!(rpc_err.detail.contains("authentication"));
}
