// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry: heartbeats and kernel lifecycle transitions.
//!
//! Every status change flows through one retried transaction that applies
//! the kernel transition, recomputes the session status from its kernels,
//! and adjusts the owning agent's `occupied_slots` when the kernel enters or
//! leaves the occupying status set. Illegal transitions are no-ops, logged.

use crate::client::AgentClient;
use berth_bus::EventProducer;
use berth_core::{
    derive_session_status, AgentHeartbeatInfo, AgentId, AgentStatus, Clock, ContainerId, Event,
    KernelConnectionInfo, KernelId, KernelStatus, LifecycleReason, SessionId, SessionStatus,
};
use berth_rpc::{AgentRpcCache, CallError};
use berth_storage::{json_merge, StateStore, StoreData, StoreError};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Call(#[from] CallError),
}

/// Drives manager-side state for agents and their kernels.
pub struct AgentRegistry<C: Clock> {
    store: StateStore,
    events: EventProducer,
    client: Arc<dyn AgentClient>,
    rpc_cache: Option<Arc<AgentRpcCache>>,
    clock: C,
}

impl<C: Clock> AgentRegistry<C> {
    pub fn new(
        store: StateStore,
        events: EventProducer,
        client: Arc<dyn AgentClient>,
        rpc_cache: Option<Arc<AgentRpcCache>>,
        clock: C,
    ) -> Self {
        Self {
            store,
            events,
            client,
            rpc_cache,
            clock,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    async fn emit(&self, event: Event) {
        if let Err(err) = self.events.produce(event).await {
            tracing::warn!(error = %err, "registry event emission failed");
        }
    }

    /// Register or refresh an agent from its heartbeat. First contact
    /// registers; a heartbeat from a LOST agent resurrects it.
    pub async fn handle_heartbeat(
        &self,
        agent_id: &AgentId,
        info: &AgentHeartbeatInfo,
    ) -> Result<(), RegistryError> {
        let now_iso = self.clock.now_iso8601();
        let now_ms = self.clock.epoch_ms();
        let agent_id_outer = agent_id.clone();
        let info_outer = info.clone();
        let agent_id = agent_id.clone();
        let info = info.clone();
        let freed = self
            .store
            .execute_with_retry(move |data| {
                let entry = data.agents.get_mut(&agent_id);
                match entry {
                    Some(agent) => {
                        let resurrected = agent.status != AgentStatus::Alive;
                        agent.addr = info.addr.clone();
                        agent.public_key = info.public_key.clone();
                        agent.architecture = info.architecture.clone();
                        agent.scaling_group = info.scaling_group.clone();
                        agent.available_slots = info.available_slots.clone();
                        agent.container_count = info.container_count;
                        agent.schedulable = info.schedulable;
                        agent.status = AgentStatus::Alive;
                        agent.last_heartbeat_ms = now_ms;
                        Ok(resurrected)
                    }
                    None => {
                        data.agents.insert(
                            agent_id.clone(),
                            berth_storage::AgentRow {
                                id: agent_id.clone(),
                                addr: info.addr.clone(),
                                public_key: info.public_key.clone(),
                                architecture: info.architecture.clone(),
                                scaling_group: info.scaling_group.clone(),
                                available_slots: info.available_slots.clone(),
                                occupied_slots: berth_core::ResourceSlot::new(),
                                container_count: info.container_count,
                                schedulable: info.schedulable,
                                status: AgentStatus::Alive,
                                first_contact: now_iso.clone(),
                                last_heartbeat_ms: now_ms,
                            },
                        );
                        Ok(true)
                    }
                }
            })
            .await?;
        if let Some(cache) = &self.rpc_cache {
            cache.update(
                agent_id_outer.clone(),
                info_outer.addr.clone(),
                info_outer.public_key.clone(),
            );
        }
        if freed {
            tracing::info!(agent_id = %agent_id_outer, "agent registered");
            // fresh capacity: revisit pending sessions
            self.emit(Event::DoSchedule { scaling_group: None }).await;
        }
        Ok(())
    }

    /// Mark agents without a recent heartbeat LOST.
    pub async fn sweep_lost_agents(
        &self,
        heartbeat_timeout_ms: u64,
    ) -> Result<Vec<AgentId>, RegistryError> {
        let now_ms = self.clock.epoch_ms();
        let lost = self
            .store
            .execute_with_retry(move |data| {
                let mut lost = Vec::new();
                for agent in data.agents.values_mut() {
                    if agent.status == AgentStatus::Alive
                        && now_ms.saturating_sub(agent.last_heartbeat_ms) > heartbeat_timeout_ms
                    {
                        agent.status = AgentStatus::Lost;
                        lost.push(agent.id.clone());
                    }
                }
                Ok(lost)
            })
            .await?;
        for agent_id in &lost {
            tracing::warn!(agent_id = %agent_id, "agent lost (missed heartbeats)");
            if let Some(cache) = &self.rpc_cache {
                cache.discard(agent_id);
            }
        }
        Ok(lost)
    }

    pub async fn mark_kernel_preparing(
        &self,
        kernel_id: &KernelId,
        reason: LifecycleReason,
    ) -> Result<bool, RegistryError> {
        self.update_kernel_status(kernel_id, KernelStatus::Preparing, Some(reason), None, None)
            .await
    }

    pub async fn mark_kernel_pulling(
        &self,
        kernel_id: &KernelId,
        reason: LifecycleReason,
    ) -> Result<bool, RegistryError> {
        self.update_kernel_status(kernel_id, KernelStatus::Pulling, Some(reason), None, None)
            .await
    }

    pub async fn mark_kernel_creating(
        &self,
        kernel_id: &KernelId,
        reason: LifecycleReason,
    ) -> Result<bool, RegistryError> {
        self.update_kernel_status(kernel_id, KernelStatus::Creating, Some(reason), None, None)
            .await
    }

    pub async fn mark_kernel_running(
        &self,
        kernel_id: &KernelId,
        reason: LifecycleReason,
        connection: &KernelConnectionInfo,
    ) -> Result<bool, RegistryError> {
        self.update_kernel_status(
            kernel_id,
            KernelStatus::Running,
            Some(reason),
            None,
            Some(connection.clone()),
        )
        .await
    }

    pub async fn mark_kernel_terminated(
        &self,
        kernel_id: &KernelId,
        reason: LifecycleReason,
        exit_code: Option<i32>,
    ) -> Result<bool, RegistryError> {
        let status_data = json!({"kernel": {"exit_code": exit_code}});
        let accepted = self
            .update_kernel_status(
                kernel_id,
                KernelStatus::Terminated,
                Some(reason),
                Some(status_data),
                None,
            )
            .await?;
        if accepted {
            // released capacity: revisit pending sessions
            self.emit(Event::DoSchedule { scaling_group: None }).await;
        }
        Ok(accepted)
    }

    pub async fn mark_kernel_cancelled(
        &self,
        kernel_id: &KernelId,
        reason: LifecycleReason,
    ) -> Result<bool, RegistryError> {
        self.update_kernel_status(kernel_id, KernelStatus::Cancelled, Some(reason), None, None)
            .await
    }

    /// Record a creation or agent failure against a kernel.
    pub async fn mark_kernel_error(
        &self,
        kernel_id: &KernelId,
        src: &str,
        name: &str,
        repr: &str,
        traceback: Option<&str>,
    ) -> Result<bool, RegistryError> {
        let status_data = json!({
            "error": {
                "src": src,
                "name": name,
                "repr": repr,
                "traceback": traceback,
            }
        });
        let reason = if name == "TimeoutError" {
            LifecycleReason::OperationTimeout
        } else {
            LifecycleReason::Other(format!("{src}-error ({name})"))
        };
        self.update_kernel_status(
            kernel_id,
            KernelStatus::Error,
            Some(reason),
            Some(status_data),
            None,
        )
        .await
    }

    /// The single write path for kernel status changes.
    async fn update_kernel_status(
        &self,
        kernel_id: &KernelId,
        new_status: KernelStatus,
        reason: Option<LifecycleReason>,
        status_data: Option<serde_json::Value>,
        connection: Option<KernelConnectionInfo>,
    ) -> Result<bool, RegistryError> {
        let now_iso = self.clock.now_iso8601();
        let kernel_id_outer = kernel_id.clone();
        let kernel_id = kernel_id.clone();
        let outcome = self
            .store
            .execute_with_retry(move |data| {
                let kernel = data.kernel_mut(&kernel_id)?;
                let session_id = kernel.session_id.clone();
                let was_occupying = kernel.status.occupies_agent_resources();
                // CREATING is only reachable via PREPARED; a kernel reported
                // as creating straight from the pull path passes through it
                if new_status == KernelStatus::Creating
                    && !kernel.status.can_transit(KernelStatus::Creating)
                    && kernel.status.can_transit(KernelStatus::Prepared)
                {
                    kernel.transit_status(KernelStatus::Prepared, None, None, &now_iso);
                }
                if !kernel.transit_status(
                    new_status,
                    reason.clone(),
                    status_data.clone(),
                    &now_iso,
                ) {
                    return Ok(None);
                }
                if let Some(connection) = &connection {
                    kernel.kernel_host = Some(connection.kernel_host.clone());
                    kernel.repl_in_port = Some(connection.repl_in_port);
                    kernel.repl_out_port = Some(connection.repl_out_port);
                    kernel.service_ports = connection.service_ports.clone();
                    kernel.container_id =
                        Some(ContainerId::new(connection.container_id.clone()));
                }
                let now_occupying = new_status.occupies_agent_resources();
                let agent = kernel.agent.clone();
                let occupied = kernel.occupied_slots.clone();
                if was_occupying != now_occupying {
                    if let Some(agent_id) = agent {
                        if let Ok(agent_row) = data.agent_mut(&agent_id) {
                            agent_row.occupied_slots = if now_occupying {
                                agent_row.occupied_slots.add(&occupied)
                            } else {
                                agent_row.occupied_slots.sub(&occupied)
                            };
                        }
                    }
                }
                let session_change = recompute_session_status(data, &session_id, &now_iso);
                let session_status = data.session(&session_id)?.status;
                Ok(Some((session_id, session_change, session_status)))
            })
            .await?;

        let Some((session_id, session_change, session_status)) = outcome else {
            tracing::warn!(
                kernel_id = %kernel_id_outer,
                status = %new_status,
                "illegal kernel status transition ignored"
            );
            return Ok(false);
        };
        self.emit(Event::SchedulingUpdate {
            session_id: session_id.clone(),
            status: session_status,
            reason: None,
        })
        .await;
        if let Some(new_session_status) = session_change {
            self.emit_session_event(&session_id, new_session_status).await;
        }
        Ok(true)
    }

    async fn emit_session_event(&self, session_id: &SessionId, status: SessionStatus) {
        let event = match status {
            SessionStatus::Running => Event::SessionStarted {
                session_id: session_id.clone(),
            },
            SessionStatus::Terminating => Event::SessionTerminating {
                session_id: session_id.clone(),
                reason: LifecycleReason::Other("kernel-terminated".to_string()),
            },
            SessionStatus::Terminated => Event::SessionTerminated {
                session_id: session_id.clone(),
                reason: LifecycleReason::Other("all-kernels-terminated".to_string()),
            },
            SessionStatus::Cancelled => Event::SessionCancelled {
                session_id: session_id.clone(),
                reason: LifecycleReason::Other("all-kernels-cancelled".to_string()),
            },
            SessionStatus::Error => Event::SessionFailure {
                session_id: session_id.clone(),
                reason: LifecycleReason::FailedToStart,
            },
            _ => return,
        };
        self.emit(event).await;
    }

    /// Dispatch `create_kernel` RPCs for a freshly scheduled session.
    ///
    /// An RPC failure marks the kernel ERROR with the agent's exception
    /// details and triggers collective termination of the session.
    pub async fn start_session(&self, session_id: &SessionId) -> Result<(), RegistryError> {
        let kernels: Vec<(KernelId, Option<AgentId>, Option<berth_core::KernelCreationInfo>)> =
            self.store.read(|data| {
                data.session_kernels(session_id)
                    .into_iter()
                    .map(|kernel| {
                        (
                            kernel.id.clone(),
                            kernel.agent.clone(),
                            kernel.creation_template.clone(),
                        )
                    })
                    .collect()
            });

        for (kernel_id, agent, template) in kernels {
            let (Some(agent_id), Some(mut info)) = (agent, template) else {
                tracing::warn!(kernel_id = %kernel_id, "kernel missing agent or creation template");
                continue;
            };
            info.ownership.agent_id = agent_id.clone();
            match self.client.create_kernel(&agent_id, &info).await {
                Ok(()) => {}
                Err(CallError::Agent(err)) => {
                    tracing::error!(kernel_id = %kernel_id, agent_id = %agent_id, error = %err, "create_kernel failed on agent");
                    let (src, name) = classify_creation_failure(&err);
                    self.mark_kernel_error(
                        &kernel_id,
                        src,
                        &name,
                        &err.exc_repr,
                        err.exc_tb.as_deref(),
                    )
                    .await?;
                    self.destroy_session(session_id, LifecycleReason::FailedToStart, true)
                        .await?;
                    return Err(CallError::Agent(err).into());
                }
                Err(CallError::Rpc(err)) => {
                    tracing::error!(kernel_id = %kernel_id, agent_id = %agent_id, error = %err, "create_kernel rpc failed");
                    self.mark_kernel_error(&kernel_id, "rpc", "RPCError", &err.detail, None)
                        .await?;
                    self.destroy_session(session_id, LifecycleReason::FailedToStart, true)
                        .await?;
                    return Err(CallError::Rpc(err).into());
                }
            }
        }
        Ok(())
    }

    /// Terminate a session: cancel pending kernels, move live ones to
    /// TERMINATING, and ask their agents to destroy them.
    pub async fn destroy_session(
        &self,
        session_id: &SessionId,
        reason: LifecycleReason,
        forced: bool,
    ) -> Result<(), RegistryError> {
        let now_iso = self.clock.now_iso8601();
        let session_id_arg = session_id.clone();
        let reason_arg = reason.clone();
        let to_destroy = self
            .store
            .execute_with_retry(move |data| {
                let kernel_ids: Vec<KernelId> = data
                    .session_kernels(&session_id_arg)
                    .into_iter()
                    .map(|kernel| kernel.id.clone())
                    .collect();
                let mut rpc_targets = Vec::new();
                for kernel_id in kernel_ids {
                    let kernel = data.kernel_mut(&kernel_id)?;
                    let was_occupying = kernel.status.occupies_agent_resources();
                    match kernel.status {
                        KernelStatus::Pending => {
                            kernel.set_status(
                                KernelStatus::Cancelled,
                                Some(reason_arg.clone()),
                                None,
                                &now_iso,
                            );
                        }
                        // ERROR kernels keep their error state; reaping them
                        // is an explicit separate step
                        KernelStatus::Terminating
                        | KernelStatus::Terminated
                        | KernelStatus::Cancelled
                        | KernelStatus::Error => {}
                        _ => {
                            if kernel.status.can_transit(KernelStatus::Terminating) {
                                kernel.set_status(
                                    KernelStatus::Terminating,
                                    Some(reason_arg.clone()),
                                    None,
                                    &now_iso,
                                );
                                if let Some(agent_id) = kernel.agent.clone() {
                                    rpc_targets.push((kernel.id.clone(), agent_id));
                                }
                            } else if kernel.status.can_transit(KernelStatus::Cancelled) {
                                // not yet running: cancel, but still ask the
                                // agent to reap any in-flight creation
                                kernel.set_status(
                                    KernelStatus::Cancelled,
                                    Some(reason_arg.clone()),
                                    None,
                                    &now_iso,
                                );
                                if let Some(agent_id) = kernel.agent.clone() {
                                    rpc_targets.push((kernel.id.clone(), agent_id));
                                }
                            }
                        }
                    }
                    let kernel = data.kernel(&kernel_id)?;
                    let now_occupying = kernel.status.occupies_agent_resources();
                    if was_occupying && !now_occupying {
                        let agent = kernel.agent.clone();
                        let occupied = kernel.occupied_slots.clone();
                        if let Some(agent_id) = agent {
                            if let Ok(agent_row) = data.agent_mut(&agent_id) {
                                agent_row.occupied_slots =
                                    agent_row.occupied_slots.sub(&occupied);
                            }
                        }
                    }
                }
                recompute_session_status(data, &session_id_arg, &now_iso);
                Ok(rpc_targets)
            })
            .await?;

        for (kernel_id, agent_id) in to_destroy {
            match self
                .client
                .destroy_kernel(&agent_id, &kernel_id, &reason)
                .await
            {
                Ok(()) => {
                    if forced {
                        // do not wait for the agent's terminated event; the
                        // agent may not know the kernel any more
                        self.mark_kernel_terminated(&kernel_id, reason.clone(), None)
                            .await?;
                    }
                }
                Err(err) if forced => {
                    tracing::warn!(kernel_id = %kernel_id, error = %err, "forced destroy despite rpc failure");
                    self.mark_kernel_terminated(&kernel_id, reason.clone(), None)
                        .await?;
                }
                Err(err) => {
                    tracing::error!(kernel_id = %kernel_id, error = %err, "destroy_kernel rpc failed");
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Record scheduler bookkeeping on a session row
    /// (`status_data.scheduler`): retry count, last attempt, predicate
    /// failures.
    pub async fn note_scheduling_attempt(
        &self,
        session_id: &SessionId,
        failed_predicates: serde_json::Value,
        status_info: Option<LifecycleReason>,
    ) -> Result<(), RegistryError> {
        let now_iso = self.clock.now_iso8601();
        let session_id = session_id.clone();
        self.store
            .execute_with_retry(move |data| {
                let session = data.session_mut(&session_id)?;
                let retries = session.status_data["scheduler"]["retries"]
                    .as_u64()
                    .unwrap_or(0);
                json_merge(
                    &mut session.status_data,
                    &["scheduler"],
                    json!({
                        "retries": retries + 1,
                        "last_try": now_iso,
                        "failed_predicates": failed_predicates,
                    }),
                );
                if let Some(info) = &status_info {
                    session.status_info = Some(info.as_str().to_string());
                }
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Split agent-reported creation failures into the spec's error kinds.
///
/// A `KernelCreationFailed` envelope is a stage-local provisioner failure on
/// a healthy agent: `src = "other"`, named by the inner cause the agent put
/// first in the args (`TimeoutError` for stage timeouts). Any other
/// exception name is a true agent-side exception: `src = "agent"`.
fn classify_creation_failure(err: &berth_rpc::AgentError) -> (&'static str, String) {
    if err.exc_name == "KernelCreationFailed" {
        let name = err
            .exc_args
            .first()
            .cloned()
            .unwrap_or_else(|| "Exception".to_string());
        ("other", name)
    } else {
        ("agent", err.exc_name.clone())
    }
}

/// Re-derive a session's status from its kernels. Returns the new status
/// when it changed.
pub fn recompute_session_status(
    data: &mut StoreData,
    session_id: &SessionId,
    now_iso: &str,
) -> Option<SessionStatus> {
    let statuses: Vec<KernelStatus> = data
        .session_kernels(session_id)
        .into_iter()
        .map(|kernel| kernel.status)
        .collect();
    let derived = derive_session_status(&statuses);
    let session = data.sessions.get_mut(session_id)?;
    if session.status == derived {
        return None;
    }
    session.apply_status(derived, None, now_iso);
    // occupancy follows the kernels that are still claiming resources
    let occupying = data
        .session_kernels(session_id)
        .into_iter()
        .filter(|kernel| kernel.status.occupies_agent_resources())
        .fold(berth_core::ResourceSlot::new(), |acc, kernel| {
            acc.add(&kernel.occupied_slots)
        });
    if let Some(session) = data.sessions.get_mut(session_id) {
        session.occupying_slots = occupying;
    }
    Some(derived)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
