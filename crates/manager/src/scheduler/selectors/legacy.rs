// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Legacy placement strategy, kept for clusters tuned around it.

use super::{
    count_unutilized_capabilities, prioritized_residuals, AgentCandidate, AgentSelectionConfig,
    AgentSelectionCriteria, AgentSelector,
};
use berth_core::AgentId;
use std::cmp::Ordering;

/// First minimises unutilized capability kinds, then prefers more residual
/// capacity in `resource_priority` order.
pub struct LegacyAgentSelector {
    resource_priority: Vec<String>,
}

impl LegacyAgentSelector {
    pub fn new(resource_priority: Vec<String>) -> Self {
        Self { resource_priority }
    }
}

impl AgentSelector for LegacyAgentSelector {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn select(
        &self,
        agents: &[AgentCandidate],
        criteria: &AgentSelectionCriteria,
        _config: &AgentSelectionConfig,
    ) -> Option<AgentId> {
        agents
            .iter()
            .min_by(|a, b| {
                let unutilized_a = count_unutilized_capabilities(a, &criteria.requested_slots);
                let unutilized_b = count_unutilized_capabilities(b, &criteria.requested_slots);
                match unutilized_a.cmp(&unutilized_b) {
                    Ordering::Equal => {
                        // more residual capacity wins within equal fit
                        let res_a = prioritized_residuals(a, &self.resource_priority);
                        let res_b = prioritized_residuals(b, &self.resource_priority);
                        res_b.cmp(&res_a)
                    }
                    other => other,
                }
            })
            .map(|agent| agent.id.clone())
    }
}
