// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispersed placement: spread kernels onto the emptiest agent.

use super::{
    count_unutilized_capabilities, prioritized_residuals, AgentCandidate, AgentSelectionConfig,
    AgentSelectionCriteria, AgentSelector,
};
use berth_core::AgentId;
use std::cmp::Ordering;

/// Picks the agent with the most residual capacity, tie-broken by fewer
/// unutilized capability kinds, residuals compared in `resource_priority`
/// order.
pub struct DispersedAgentSelector {
    resource_priority: Vec<String>,
}

impl DispersedAgentSelector {
    pub fn new(resource_priority: Vec<String>) -> Self {
        Self { resource_priority }
    }
}

impl AgentSelector for DispersedAgentSelector {
    fn name(&self) -> &'static str {
        "dispersed"
    }

    fn select(
        &self,
        agents: &[AgentCandidate],
        criteria: &AgentSelectionCriteria,
        _config: &AgentSelectionConfig,
    ) -> Option<AgentId> {
        agents
            .iter()
            .max_by(|a, b| {
                let res_a = prioritized_residuals(a, &self.resource_priority);
                let res_b = prioritized_residuals(b, &self.resource_priority);
                match res_a.cmp(&res_b) {
                    // larger residual wins; on ties fewer unutilized kinds win
                    Ordering::Equal => {
                        count_unutilized_capabilities(b, &criteria.requested_slots).cmp(
                            &count_unutilized_capabilities(a, &criteria.requested_slots),
                        )
                    }
                    other => other,
                }
            })
            .map(|agent| agent.id.clone())
    }
}
