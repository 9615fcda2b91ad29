// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The sokovan scheduler.
//!
//! A tick runs under the cluster scheduling advisory lock: pending sessions
//! are visited in priority-then-FIFO order, predicates are re-checked, an
//! agent is chosen per kernel (one shared agent for SINGLE_NODE sessions),
//! and the assignment is committed transactionally together with the
//! agents' occupancy. Dispatch happens via an anycast
//! `schedule.do-start-session` event.

pub mod predicates;
pub mod selectors;

use crate::config::{SchedulerConfig, SelectorStrategy};
use crate::registry::recompute_session_status;
use berth_bus::EventProducer;
use berth_core::{
    AgentId, Clock, ClusterMode, ClusterRole, Event, ImageRef, KernelCreationInfo, KernelId,
    KernelStatus, LifecycleReason, ResourceSlot, SessionId, SessionStatus, SessionType,
    VFolderMount,
};
use berth_storage::{json_merge, KernelRow, SessionRow, StateStore, StoreError};
use indexmap::IndexMap;
use predicates::{check_predicates, SchedulingPredicate};
use selectors::{
    filter_candidates, AgentCandidate, AgentSelectionConfig, AgentSelectionCriteria,
    AgentSelector, ConcentratedAgentSelector, DispersedAgentSelector, LegacyAgentSelector,
    RoundRobinAgentSelector, SelectionError,
};
use serde_json::json;
use thiserror::Error;

/// Name of the advisory lock serialising scheduling ticks across replicas.
const SCHEDULE_LOCK: &str = "schedule";

/// Scheduling errors
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
}

/// One kernel of an enqueue request.
#[derive(Debug, Clone)]
pub struct KernelEnqueueSpec {
    pub kernel_id: KernelId,
    pub image: ImageRef,
    pub requested_slots: ResourceSlot,
    pub cluster_role: ClusterRole,
    pub cluster_idx: u32,
    pub creation_template: KernelCreationInfo,
}

/// A session enqueue accepted from the API layer.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub session_id: SessionId,
    pub name: String,
    pub session_type: SessionType,
    pub priority: i32,
    pub cluster_mode: ClusterMode,
    pub domain_name: String,
    pub group_id: String,
    pub user_uuid: String,
    pub access_key: String,
    pub scaling_group: String,
    pub vfolder_mounts: Vec<VFolderMount>,
    pub designated_agent: Option<AgentId>,
    pub kernels: Vec<KernelEnqueueSpec>,
}

/// Outcome of one scheduling tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleStats {
    pub scheduled: Vec<SessionId>,
    pub postponed: Vec<SessionId>,
}

/// The scheduler proper: one logical instance per cluster.
pub struct ScheduleCoordinator<C: Clock> {
    store: StateStore,
    events: EventProducer,
    config: SchedulerConfig,
    selector: Box<dyn AgentSelector>,
    predicates: Vec<Box<dyn SchedulingPredicate>>,
    clock: C,
}

impl<C: Clock> ScheduleCoordinator<C> {
    pub fn new(
        store: StateStore,
        events: EventProducer,
        config: SchedulerConfig,
        clock: C,
    ) -> Self {
        let selector = make_selector(&config);
        let predicates: Vec<Box<dyn SchedulingPredicate>> = vec![Box::new(
            predicates::ConcurrencyPredicate::from_config(&config),
        )];
        Self {
            store,
            events,
            config,
            selector,
            predicates,
            clock,
        }
    }

    pub fn with_predicates(mut self, predicates: Vec<Box<dyn SchedulingPredicate>>) -> Self {
        self.predicates = predicates;
        self
    }

    async fn emit(&self, event: Event) {
        if let Err(err) = self.events.produce(event).await {
            tracing::warn!(error = %err, "scheduler event emission failed");
        }
    }

    /// Accept a session: create PENDING rows and kick a scheduling tick.
    pub async fn enqueue_session(
        &self,
        request: EnqueueRequest,
    ) -> Result<SessionId, SchedulingError> {
        let now_iso = self.clock.now_iso8601();
        let session_id = request.session_id.clone();
        let request_arg = request.clone();
        self.store
            .execute_with_retry(move |data| {
                let requested: ResourceSlot = request_arg
                    .kernels
                    .iter()
                    .fold(ResourceSlot::new(), |acc, k| acc.add(&k.requested_slots));
                let mut status_history = IndexMap::new();
                status_history
                    .insert(SessionStatus::Pending.name().to_string(), now_iso.clone());
                data.sessions.insert(
                    request_arg.session_id.clone(),
                    SessionRow {
                        id: request_arg.session_id.clone(),
                        name: request_arg.name.clone(),
                        session_type: request_arg.session_type,
                        priority: request_arg.priority,
                        cluster_mode: request_arg.cluster_mode,
                        cluster_size: request_arg.kernels.len() as u32,
                        domain_name: request_arg.domain_name.clone(),
                        group_id: request_arg.group_id.clone(),
                        user_uuid: request_arg.user_uuid.clone(),
                        access_key: request_arg.access_key.clone(),
                        scaling_group: request_arg.scaling_group.clone(),
                        requested_slots: requested,
                        occupying_slots: ResourceSlot::new(),
                        vfolder_mounts: request_arg.vfolder_mounts.clone(),
                        designated_agent: request_arg.designated_agent.clone(),
                        status: SessionStatus::Pending,
                        status_info: None,
                        status_data: serde_json::Value::Null,
                        status_history,
                        created_at: now_iso.clone(),
                        terminated_at: None,
                    },
                );
                for spec in &request_arg.kernels {
                    let mut kernel = KernelRow::new(
                        spec.kernel_id.clone(),
                        request_arg.session_id.clone(),
                        spec.image.clone(),
                        spec.requested_slots.clone(),
                        request_arg.scaling_group.clone(),
                        spec.cluster_role,
                        spec.cluster_idx,
                        &now_iso,
                    );
                    kernel.creation_template = Some(spec.creation_template.clone());
                    data.kernels.insert(kernel.id.clone(), kernel);
                }
                Ok(())
            })
            .await?;
        tracing::info!(session_id = %session_id, kernels = request.kernels.len(), "session enqueued");
        self.emit(Event::SessionEnqueued {
            session_id: session_id.clone(),
        })
        .await;
        self.emit(Event::DoSchedule { scaling_group: None }).await;
        Ok(session_id)
    }

    /// Run one scheduling pass over all pending sessions.
    pub async fn schedule_tick(&self) -> Result<ScheduleStats, SchedulingError> {
        // only one replica schedules at a time
        let _lock = self.store.advisory_lock(SCHEDULE_LOCK).await;
        let now_iso = self.clock.now_iso8601();

        let mut pending: Vec<(SessionId, i32, String)> = self.store.read(|data| {
            data.sessions
                .values()
                .filter(|session| session.status == SessionStatus::Pending)
                .map(|session| (session.id.clone(), session.priority, session.created_at.clone()))
                .collect()
        });
        pending.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.2.cmp(&b.2)));

        let mut stats = ScheduleStats::default();
        for (session_id, _, _) in pending {
            match self.try_schedule_session(&session_id, &now_iso).await? {
                true => stats.scheduled.push(session_id),
                false => stats.postponed.push(session_id),
            }
        }

        for session_id in &stats.scheduled {
            self.emit(Event::SessionScheduled {
                session_id: session_id.clone(),
            })
            .await;
            self.emit(Event::DoStartSession {
                session_id: session_id.clone(),
            })
            .await;
        }
        Ok(stats)
    }

    async fn try_schedule_session(
        &self,
        session_id: &SessionId,
        now_iso: &str,
    ) -> Result<bool, SchedulingError> {
        // predicate re-check against the committed state
        let failures = self.store.read(|data| {
            data.session(session_id)
                .map(|session| check_predicates(&self.predicates, data, session))
        })?;
        if !failures.is_empty() {
            tracing::info!(
                session_id = %session_id,
                failed = ?failures.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
                "scheduling postponed by predicates"
            );
            self.record_attempt(
                session_id,
                json!(failures),
                Some(LifecycleReason::PredicateChecksFailed),
                now_iso,
            )
            .await?;
            return Ok(false);
        }

        let placed = self.place_session(session_id, now_iso).await?;
        if !placed {
            self.record_attempt(
                session_id,
                json!([]),
                Some(LifecycleReason::NoAvailableInstances),
                now_iso,
            )
            .await?;
        }
        Ok(placed)
    }

    /// Select agents and commit the assignment in one transaction.
    async fn place_session(
        &self,
        session_id: &SessionId,
        now_iso: &str,
    ) -> Result<bool, SchedulingError> {
        let selection_config = AgentSelectionConfig {
            max_container_count: self.config.max_container_count,
        };
        let session_id_arg = session_id.clone();
        let now_iso = now_iso.to_string();
        let selector = &self.selector;
        let enforce_spreading = self.config.enforce_spreading_endpoint_replica;
        let outcome = self.store.execute_with_retry(move |data| {
            let session = data.session(&session_id_arg)?.clone();
            let kernels: Vec<KernelRow> = data
                .session_kernels(&session_id_arg)
                .into_iter()
                .cloned()
                .collect();

            // in-tick occupancy accrues on these working copies
            let mut candidates: IndexMap<AgentId, AgentCandidate> = data
                .agents
                .values()
                .filter(|agent| agent.status == berth_core::AgentStatus::Alive)
                .map(|agent| (agent.id.clone(), AgentCandidate::from_row(agent)))
                .collect();

            let mut assignments: Vec<(KernelId, AgentId)> = Vec::new();
            let mut placed_agents: Vec<AgentId> = Vec::new();
            match session.cluster_mode {
                ClusterMode::SingleNode => {
                    // the one agent must satisfy the aggregate requirement
                    let criteria =
                        criteria_for(&session, &session.requested_slots, &kernels, enforce_spreading);
                    let pool: Vec<AgentCandidate> = candidates.values().cloned().collect();
                    let filtered =
                        match filter_candidates(&pool, &criteria, &selection_config) {
                            Ok(filtered) => filtered,
                            Err(SelectionError::DesignatedAgentIncompatible(agent)) => {
                                tracing::warn!(session_id = %session_id_arg, agent_id = %agent, "designated agent incompatible");
                                return Ok(None);
                            }
                            Err(SelectionError::NoneAvailable) => return Ok(None),
                        };
                    let Some(chosen) = selector.select(&filtered, &criteria, &selection_config)
                    else {
                        return Ok(None);
                    };
                    for kernel in &kernels {
                        assignments.push((kernel.id.clone(), chosen.clone()));
                    }
                    placed_agents.push(chosen);
                }
                ClusterMode::MultiNode => {
                    for kernel in &kernels {
                        let criteria = criteria_for(
                            &session,
                            &kernel.requested_slots,
                            &kernels,
                            enforce_spreading,
                        );
                        let pool: Vec<AgentCandidate> =
                            candidates.values().cloned().collect();
                        let filtered =
                            match filter_candidates(&pool, &criteria, &selection_config) {
                                Ok(filtered) => filtered,
                                Err(_) => return Ok(None),
                            };
                        let Some(chosen) =
                            selector.select(&filtered, &criteria, &selection_config)
                        else {
                            return Ok(None);
                        };
                        if let Some(candidate) = candidates.get_mut(&chosen) {
                            candidate.occupied_slots =
                                candidate.occupied_slots.add(&kernel.requested_slots);
                            candidate.container_count += 1;
                        }
                        assignments.push((kernel.id.clone(), chosen.clone()));
                        placed_agents.push(chosen);
                    }
                }
            }

            // commit: kernels -> SCHEDULED, agents -> occupied
            for (kernel_id, agent_id) in &assignments {
                let addr = data.agent(agent_id)?.addr.clone();
                let kernel = data.kernel_mut(kernel_id)?;
                if !kernel.transit_status(KernelStatus::Scheduled, None, None, &now_iso) {
                    // raced out of PENDING since the snapshot; leave untouched
                    return Ok(None);
                }
                kernel.agent = Some(agent_id.clone());
                kernel.agent_addr = Some(addr);
                kernel.occupied_slots = kernel.requested_slots.clone();
                let occupied = kernel.occupied_slots.clone();
                let agent_row = data.agent_mut(agent_id)?;
                agent_row.occupied_slots = agent_row.occupied_slots.add(&occupied);
                agent_row.container_count += 1;
            }
            {
                let session_row = data.session_mut(&session_id_arg)?;
                let retries = session_row.status_data["scheduler"]["retries"]
                    .as_u64()
                    .unwrap_or(0);
                json_merge(
                    &mut session_row.status_data,
                    &["scheduler"],
                    json!({
                        "retries": retries + 1,
                        "last_try": now_iso,
                        "failed_predicates": [],
                    }),
                );
                session_row.status_info = None;
            }
            recompute_session_status(data, &session_id_arg, &now_iso);
            Ok(Some(placed_agents))
        });

        match outcome.await? {
            Some(placed_agents) => {
                for agent in placed_agents {
                    self.selector.note_placement(&agent);
                }
                tracing::info!(session_id = %session_id, "session scheduled");
                Ok(true)
            }
            None => {
                tracing::info!(session_id = %session_id, "no available agent");
                Ok(false)
            }
        }
    }

    async fn record_attempt(
        &self,
        session_id: &SessionId,
        failed_predicates: serde_json::Value,
        status_info: Option<LifecycleReason>,
        now_iso: &str,
    ) -> Result<(), SchedulingError> {
        let session_id = session_id.clone();
        let now_iso = now_iso.to_string();
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

fn criteria_for(
    session: &SessionRow,
    requested_slots: &ResourceSlot,
    kernels: &[KernelRow],
    enforce_spreading_endpoint_replica: bool,
) -> AgentSelectionCriteria {
    let architecture = kernels
        .first()
        .map(|kernel| kernel.architecture.clone())
        .unwrap_or_else(|| "x86_64".to_string());
    AgentSelectionCriteria {
        requested_slots: requested_slots.clone(),
        required_architecture: architecture,
        scaling_group: session.scaling_group.clone(),
        session_type: session.session_type,
        designated_agent: session.designated_agent.clone(),
        enforce_spreading_endpoint_replica,
        kernel_counts_at_endpoint: None,
    }
}

fn make_selector(config: &SchedulerConfig) -> Box<dyn AgentSelector> {
    match config.strategy {
        SelectorStrategy::Concentrated => Box::new(ConcentratedAgentSelector::new(
            config.resource_priority.clone(),
        )),
        SelectorStrategy::Dispersed => Box::new(DispersedAgentSelector::new(
            config.resource_priority.clone(),
        )),
        SelectorStrategy::Legacy => {
            Box::new(LegacyAgentSelector::new(config.resource_priority.clone()))
        }
        SelectorStrategy::RoundRobin => Box::new(RoundRobinAgentSelector::default()),
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
