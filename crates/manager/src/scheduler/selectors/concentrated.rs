// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concentrated placement: pack kernels onto the fullest agent that fits.

use super::{
    count_unutilized_capabilities, prioritized_residuals, AgentCandidate, AgentSelectionConfig,
    AgentSelectionCriteria, AgentSelector,
};
use berth_core::{AgentId, SessionType};

/// Picks the agent with the least residual capacity (compared in
/// `resource_priority` order) that still fits, tie-broken by fewer
/// unutilized capability kinds. Inference sessions with replica spreading
/// enforced are pre-filtered to agents with the fewest endpoint kernels.
pub struct ConcentratedAgentSelector {
    resource_priority: Vec<String>,
}

impl ConcentratedAgentSelector {
    pub fn new(resource_priority: Vec<String>) -> Self {
        Self { resource_priority }
    }
}

impl AgentSelector for ConcentratedAgentSelector {
    fn name(&self) -> &'static str {
        "concentrated"
    }

    fn select(
        &self,
        agents: &[AgentCandidate],
        criteria: &AgentSelectionCriteria,
        _config: &AgentSelectionConfig,
    ) -> Option<AgentId> {
        let mut pool: Vec<&AgentCandidate> = agents.iter().collect();
        if criteria.session_type == SessionType::Inference
            && criteria.enforce_spreading_endpoint_replica
        {
            if let Some(counts) = &criteria.kernel_counts_at_endpoint {
                let min_count = pool
                    .iter()
                    .map(|agent| counts.get(&agent.id).copied().unwrap_or(0))
                    .min()?;
                pool.retain(|agent| counts.get(&agent.id).copied().unwrap_or(0) == min_count);
            }
        }
        pool.into_iter()
            .min_by_key(|agent| {
                (
                    prioritized_residuals(agent, &self.resource_priority),
                    count_unutilized_capabilities(agent, &criteria.requested_slots),
                )
            })
            .map(|agent| agent.id.clone())
    }
}
