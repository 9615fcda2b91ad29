// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent RPC peer cache.
//!
//! Maps `AgentId -> (addr, auth key) -> Peer`, fetching the address from the
//! persistent store on first use and reusing the live connection afterwards.
//! Entry lifecycle is driven by heartbeats (`update`) and terminations
//! (`discard`).

use crate::auth::AuthKey;
use crate::peer::{Peer, PeerConfig, PeerError};
use crate::wire::ErrorRecord;
use async_trait::async_trait;
use berth_core::AgentId;
use parking_lot::Mutex;
use rmpv::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// RPC connection / authentication failure. The agent is flagged for
/// health-check by the caller.
#[derive(Debug, Error)]
#[error("RPC failure for agent {agent_id} at {addr}: {detail}")]
pub struct RpcError {
    pub agent_id: AgentId,
    pub addr: String,
    pub detail: String,
}

/// Agent-side exception re-raised in the manager's domain with the remote
/// traceback preserved.
#[derive(Debug, Error)]
#[error("agent {agent_id} raised {exc_repr}")]
pub struct AgentError {
    pub agent_id: AgentId,
    pub exc_name: String,
    pub exc_repr: String,
    pub exc_args: Vec<String>,
    pub exc_tb: Option<String>,
}

impl AgentError {
    pub fn from_record(agent_id: AgentId, record: ErrorRecord) -> Self {
        Self {
            agent_id,
            exc_name: record.exc_name,
            exc_repr: record.exc_repr,
            exc_args: record.exc_args,
            exc_tb: record.exc_tb,
        }
    }
}

/// What an RPC invocation can fail with.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Resolves an agent's `(addr, auth key)` from the persistent store.
#[async_trait]
pub trait AddrResolver: Send + Sync + 'static {
    async fn resolve(&self, agent_id: &AgentId) -> Option<(String, Option<String>)>;
}

/// Process-wide cache of authenticated agent peers.
pub struct AgentRpcCache {
    resolver: Arc<dyn AddrResolver>,
    manager_id: String,
    rpc_keepalive_timeout: Duration,
    entries: Mutex<HashMap<AgentId, (String, Option<String>)>>,
    peers: Mutex<HashMap<AgentId, Peer>>,
}

impl AgentRpcCache {
    pub fn new(
        resolver: Arc<dyn AddrResolver>,
        manager_id: impl Into<String>,
        rpc_keepalive_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            manager_id: manager_id.into(),
            rpc_keepalive_timeout,
            entries: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Record an agent's RPC endpoint (heartbeat-driven).
    pub fn update(&self, agent_id: AgentId, addr: String, public_key: Option<String>) {
        let stale = {
            let mut entries = self.entries.lock();
            let changed = entries.get(&agent_id).map(|e| e != &(addr.clone(), public_key.clone()))
                .unwrap_or(false);
            entries.insert(agent_id.clone(), (addr, public_key));
            changed
        };
        if stale {
            // endpoint moved: the cached connection is useless now
            if let Some(peer) = self.peers.lock().remove(&agent_id) {
                peer.close();
            }
        }
    }

    /// Forget an agent entirely (termination-driven).
    pub fn discard(&self, agent_id: &AgentId) {
        self.entries.lock().remove(agent_id);
        if let Some(peer) = self.peers.lock().remove(agent_id) {
            peer.close();
        }
    }

    async fn rpc_args(&self, agent_id: &AgentId) -> Result<(String, Option<String>), RpcError> {
        if let Some(entry) = self.entries.lock().get(agent_id) {
            return Ok(entry.clone());
        }
        let resolved = self.resolver.resolve(agent_id).await.ok_or_else(|| RpcError {
            agent_id: agent_id.clone(),
            addr: String::new(),
            detail: "agent endpoint unknown".to_string(),
        })?;
        self.entries
            .lock()
            .insert(agent_id.clone(), resolved.clone());
        Ok(resolved)
    }

    /// Obtain a scoped handle to the agent's peer, connecting if necessary.
    ///
    /// The peer stays cached after the handle is dropped; connection and
    /// auth failures surface as [`RpcError`].
    pub async fn rpc_context(
        &self,
        agent_id: &AgentId,
        invoke_timeout: Option<Duration>,
        order_key: Option<String>,
    ) -> Result<PeerHandle, RpcError> {
        let (addr, public_key) = self.rpc_args(agent_id).await?;
        if let Some(peer) = self.peers.lock().get(agent_id) {
            return Ok(PeerHandle {
                agent_id: agent_id.clone(),
                peer: peer.clone(),
                invoke_timeout,
                order_key,
            });
        }
        tracing::debug!(agent_id = %agent_id, addr = %addr, authenticated = public_key.is_some(), "rpc connect");
        let config = PeerConfig {
            client_id: self.manager_id.clone(),
            auth_key: public_key.map(AuthKey::new),
            keepalive_timeout: self.rpc_keepalive_timeout,
        };
        let peer = Peer::connect(&addr, config).await.map_err(|err| RpcError {
            agent_id: agent_id.clone(),
            addr: addr.clone(),
            detail: err.to_string(),
        })?;
        self.peers.lock().insert(agent_id.clone(), peer.clone());
        Ok(PeerHandle {
            agent_id: agent_id.clone(),
            peer,
            invoke_timeout,
            order_key,
        })
    }
}

/// A cached peer scoped to one logical RPC exchange.
pub struct PeerHandle {
    agent_id: AgentId,
    peer: Peer,
    invoke_timeout: Option<Duration>,
    order_key: Option<String>,
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("agent_id", &self.agent_id)
            .field("invoke_timeout", &self.invoke_timeout)
            .field("order_key", &self.order_key)
            .finish_non_exhaustive()
    }
}

impl PeerHandle {
    /// Invoke a remote method, translating wire errors into the manager's
    /// error domain.
    pub async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, CallError> {
        let outcome = self
            .peer
            .call(
                method,
                args,
                kwargs,
                self.order_key.as_deref(),
                self.invoke_timeout,
            )
            .await;
        match outcome {
            Ok(value) => Ok(value),
            Err(PeerError::Remote(record)) => {
                Err(AgentError::from_record(self.agent_id.clone(), record).into())
            }
            Err(err) => Err(RpcError {
                agent_id: self.agent_id.clone(),
                addr: String::new(),
                detail: err.to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
