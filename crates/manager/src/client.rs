// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager-side view of an agent's RPC surface.
//!
//! `AgentClient` is the seam between the scheduler/registry and the wire:
//! production uses [`RpcAgentClient`] over the peer cache; tests drive an
//! in-process agent backend behind the same trait.

use async_trait::async_trait;
use berth_core::{AgentId, ContainerId, KernelCreationInfo, KernelId, LifecycleReason};
use berth_rpc::{AgentRpcCache, CallError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// The agent operations the manager invokes.
#[async_trait]
pub trait AgentClient: Send + Sync + 'static {
    async fn ping(&self, agent_id: &AgentId) -> Result<(), CallError>;

    async fn create_kernel(
        &self,
        agent_id: &AgentId,
        info: &KernelCreationInfo,
    ) -> Result<(), CallError>;

    async fn destroy_kernel(
        &self,
        agent_id: &AgentId,
        kernel_id: &KernelId,
        reason: &LifecycleReason,
    ) -> Result<(), CallError>;

    async fn clean_kernel(&self, agent_id: &AgentId, kernel_id: &KernelId)
        -> Result<(), CallError>;

    async fn restart_kernel(
        &self,
        agent_id: &AgentId,
        kernel_id: &KernelId,
    ) -> Result<(), CallError>;

    async fn get_container_logs(
        &self,
        agent_id: &AgentId,
        container_id: &ContainerId,
    ) -> Result<Vec<String>, CallError>;
}

/// Production [`AgentClient`] over the authenticated peer cache.
///
/// Calls touching one kernel share that kernel's id as `order_key`, so all
/// operations on a kernel execute in submission order.
pub struct RpcAgentClient {
    cache: Arc<AgentRpcCache>,
    invoke_timeout: Option<Duration>,
}

impl RpcAgentClient {
    pub fn new(cache: Arc<AgentRpcCache>, invoke_timeout: Option<Duration>) -> Self {
        Self {
            cache,
            invoke_timeout,
        }
    }

    fn to_value<T: serde::Serialize>(
        agent_id: &AgentId,
        value: &T,
    ) -> Result<rmpv::Value, CallError> {
        rmpv::ext::to_value(value).map_err(|err| {
            CallError::Rpc(berth_rpc::RpcError {
                agent_id: agent_id.clone(),
                addr: String::new(),
                detail: format!("argument encoding failed: {err}"),
            })
        })
    }

    async fn call(
        &self,
        agent_id: &AgentId,
        method: &str,
        args: Vec<rmpv::Value>,
        order_key: Option<String>,
    ) -> Result<rmpv::Value, CallError> {
        let handle = self
            .cache
            .rpc_context(agent_id, self.invoke_timeout, order_key)
            .await
            .map_err(CallError::Rpc)?;
        handle.call(method, args, BTreeMap::new()).await
    }
}

#[async_trait]
impl AgentClient for RpcAgentClient {
    async fn ping(&self, agent_id: &AgentId) -> Result<(), CallError> {
        self.call(agent_id, "ping", vec![], None).await.map(|_| ())
    }

    async fn create_kernel(
        &self,
        agent_id: &AgentId,
        info: &KernelCreationInfo,
    ) -> Result<(), CallError> {
        let arg = Self::to_value(agent_id, info)?;
        self.call(
            agent_id,
            "create_kernel",
            vec![arg],
            Some(info.kernel_id().to_string()),
        )
        .await
        .map(|_| ())
    }

    async fn destroy_kernel(
        &self,
        agent_id: &AgentId,
        kernel_id: &KernelId,
        reason: &LifecycleReason,
    ) -> Result<(), CallError> {
        self.call(
            agent_id,
            "destroy_kernel",
            vec![
                rmpv::Value::from(kernel_id.as_str()),
                rmpv::Value::from(reason.as_str()),
            ],
            Some(kernel_id.to_string()),
        )
        .await
        .map(|_| ())
    }

    async fn clean_kernel(
        &self,
        agent_id: &AgentId,
        kernel_id: &KernelId,
    ) -> Result<(), CallError> {
        self.call(
            agent_id,
            "clean_kernel",
            vec![rmpv::Value::from(kernel_id.as_str())],
            Some(kernel_id.to_string()),
        )
        .await
        .map(|_| ())
    }

    async fn restart_kernel(
        &self,
        agent_id: &AgentId,
        kernel_id: &KernelId,
    ) -> Result<(), CallError> {
        self.call(
            agent_id,
            "restart_kernel",
            vec![rmpv::Value::from(kernel_id.as_str())],
            Some(kernel_id.to_string()),
        )
        .await
        .map(|_| ())
    }

    async fn get_container_logs(
        &self,
        agent_id: &AgentId,
        container_id: &ContainerId,
    ) -> Result<Vec<String>, CallError> {
        let value = self
            .call(
                agent_id,
                "get_container_logs",
                vec![rmpv::Value::from(container_id.as_str())],
                None,
            )
            .await?;
        rmpv::ext::from_value(value).map_err(|err| {
            CallError::Rpc(berth_rpc::RpcError {
                agent_id: agent_id.clone(),
                addr: String::new(),
                detail: format!("reply decoding failed: {err}"),
            })
        })
    }
}
