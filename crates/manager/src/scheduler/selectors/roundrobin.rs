// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Round-robin placement: deterministic and resource-agnostic.

use super::{AgentCandidate, AgentSelectionConfig, AgentSelectionCriteria, AgentSelector};
use berth_core::AgentId;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Sorts candidates lexicographically by id and returns
/// `agents[next_index mod len]`. The index advances only on successful
/// placements, so failed attempts retry the same agent.
pub struct RoundRobinAgentSelector {
    next_index: AtomicUsize,
}

impl RoundRobinAgentSelector {
    pub fn new(start_index: usize) -> Self {
        Self {
            next_index: AtomicUsize::new(start_index),
        }
    }

    pub fn next_index(&self) -> usize {
        self.next_index.load(Ordering::SeqCst)
    }
}

impl Default for RoundRobinAgentSelector {
    fn default() -> Self {
        Self::new(0)
    }
}

impl AgentSelector for RoundRobinAgentSelector {
    fn name(&self) -> &'static str {
        "roundrobin"
    }

    fn select(
        &self,
        agents: &[AgentCandidate],
        _criteria: &AgentSelectionCriteria,
        _config: &AgentSelectionConfig,
    ) -> Option<AgentId> {
        if agents.is_empty() {
            return None;
        }
        let mut sorted: Vec<&AgentCandidate> = agents.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let index = self.next_index.load(Ordering::SeqCst) % sorted.len();
        Some(sorted[index].id.clone())
    }

    fn note_placement(&self, _agent: &AgentId) {
        self.next_index.fetch_add(1, Ordering::SeqCst);
    }
}
