// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent selection strategies.
//!
//! The universal filter (architecture, component-wise fit, container count,
//! schedulable flag, designated agent) runs before any strategy sees the
//! candidate list. Strategies only rank the survivors.

mod concentrated;
mod dispersed;
mod legacy;
mod roundrobin;

pub use concentrated::ConcentratedAgentSelector;
pub use dispersed::DispersedAgentSelector;
pub use legacy::LegacyAgentSelector;
pub use roundrobin::RoundRobinAgentSelector;

use berth_core::{AgentId, ResourceSlot, SessionType};
use berth_storage::AgentRow;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use thiserror::Error;

/// Selection errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no available agent satisfies the request")]
    NoneAvailable,

    #[error("designated agent {0} does not satisfy the request")]
    DesignatedAgentIncompatible(AgentId),
}

/// A schedulable agent as the strategies see it.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCandidate {
    pub id: AgentId,
    pub architecture: String,
    pub scaling_group: String,
    pub available_slots: ResourceSlot,
    pub occupied_slots: ResourceSlot,
    pub container_count: u32,
    pub schedulable: bool,
}

impl AgentCandidate {
    pub fn from_row(row: &AgentRow) -> Self {
        Self {
            id: row.id.clone(),
            architecture: row.architecture.clone(),
            scaling_group: row.scaling_group.clone(),
            available_slots: row.available_slots.clone(),
            occupied_slots: row.occupied_slots.clone(),
            container_count: row.container_count,
            schedulable: row.schedulable,
        }
    }

    pub fn remaining_slots(&self) -> ResourceSlot {
        self.available_slots.sub(&self.occupied_slots)
    }
}

/// What one placement asks of an agent.
#[derive(Debug, Clone)]
pub struct AgentSelectionCriteria {
    pub requested_slots: ResourceSlot,
    pub required_architecture: String,
    pub scaling_group: String,
    pub session_type: SessionType,
    pub designated_agent: Option<AgentId>,
    pub enforce_spreading_endpoint_replica: bool,
    /// Per-agent kernel counts of the target inference endpoint.
    pub kernel_counts_at_endpoint: Option<IndexMap<AgentId, u32>>,
}

/// Deployment-wide selection limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentSelectionConfig {
    pub max_container_count: Option<u32>,
}

/// A pluggable placement strategy.
pub trait AgentSelector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rank already-filtered candidates and pick one.
    fn select(
        &self,
        agents: &[AgentCandidate],
        criteria: &AgentSelectionCriteria,
        config: &AgentSelectionConfig,
    ) -> Option<AgentId>;

    /// Called after a successful placement on the returned agent.
    fn note_placement(&self, _agent: &AgentId) {}
}

/// Universal filtering applied before any strategy consults the list.
pub fn filter_candidates(
    agents: &[AgentCandidate],
    criteria: &AgentSelectionCriteria,
    config: &AgentSelectionConfig,
) -> Result<Vec<AgentCandidate>, SelectionError> {
    let survives = |agent: &AgentCandidate| {
        agent.schedulable
            && agent.architecture == criteria.required_architecture
            && agent.scaling_group == criteria.scaling_group
            && criteria.requested_slots.fits_in(&agent.remaining_slots())
            && config
                .max_container_count
                .map(|max| agent.container_count < max)
                .unwrap_or(true)
    };
    if let Some(designated) = &criteria.designated_agent {
        let agent = agents
            .iter()
            .find(|agent| &agent.id == designated)
            .filter(|agent| survives(agent))
            .ok_or_else(|| SelectionError::DesignatedAgentIncompatible(designated.clone()))?;
        return Ok(vec![agent.clone()]);
    }
    Ok(agents.iter().filter(|a| survives(a)).cloned().collect())
}

/// Number of resource kinds the agent exposes (with capacity) that the
/// request does not use. Fewer means a better fit for small requests.
pub(crate) fn count_unutilized_capabilities(
    agent: &AgentCandidate,
    requested: &ResourceSlot,
) -> usize {
    agent
        .available_slots
        .iter()
        .filter(|(name, capacity)| {
            !capacity.is_zero() && requested.get(name.as_str()).is_zero()
        })
        .count()
}

/// Residual capacities in `resource_priority` order. Priority entries the
/// agent does not expose read as zero; entries outside the priority list are
/// ignored.
pub(crate) fn prioritized_residuals(
    agent: &AgentCandidate,
    resource_priority: &[String],
) -> Vec<Decimal> {
    let remaining = agent.remaining_slots();
    resource_priority
        .iter()
        .map(|name| remaining.get(name))
        .collect()
}

#[cfg(test)]
#[path = "selectors_tests.rs"]
mod tests;
