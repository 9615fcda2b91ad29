// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use berth_core::SessionType;
use proptest::prelude::*;

fn candidate(id: &str, slots: &[(&str, i64, i64)]) -> AgentCandidate {
    AgentCandidate {
        id: AgentId::new(id),
        architecture: "x86_64".to_string(),
        scaling_group: "default".to_string(),
        available_slots: ResourceSlot::from_pairs(
            slots.iter().map(|(k, cap, _)| (*k, Decimal::from(*cap))),
        ),
        occupied_slots: ResourceSlot::from_pairs(
            slots.iter().map(|(k, _, occ)| (*k, Decimal::from(*occ))),
        ),
        container_count: 0,
        schedulable: true,
    }
}

fn criteria(slots: &[(&str, i64)]) -> AgentSelectionCriteria {
    AgentSelectionCriteria {
        requested_slots: ResourceSlot::from_pairs(
            slots.iter().map(|(k, v)| (*k, Decimal::from(*v))),
        ),
        required_architecture: "x86_64".to_string(),
        scaling_group: "default".to_string(),
        session_type: SessionType::Interactive,
        designated_agent: None,
        enforce_spreading_endpoint_replica: false,
        kernel_counts_at_endpoint: None,
    }
}

fn priority() -> Vec<String> {
    vec!["cpu".to_string(), "mem".to_string()]
}

// -- universal filter --

#[test]
fn filter_rejects_wrong_architecture() {
    let mut arm = candidate("arm-1", &[("cpu", 8, 0)]);
    arm.architecture = "aarch64".to_string();
    let agents = vec![arm, candidate("x86-1", &[("cpu", 8, 0)])];
    let result = filter_candidates(&agents, &criteria(&[("cpu", 1)]), &AgentSelectionConfig::default())
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, "x86-1");
}

#[test]
fn filter_rejects_insufficient_capacity() {
    let agents = vec![
        candidate("small", &[("cpu", 1, 0)]),
        candidate("big", &[("cpu", 8, 0)]),
    ];
    let result = filter_candidates(&agents, &criteria(&[("cpu", 4)]), &AgentSelectionConfig::default())
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, "big");
}

#[test]
fn filter_applies_container_count_cap() {
    let mut full = candidate("full", &[("cpu", 8, 0)]);
    full.container_count = 4;
    let agents = vec![full, candidate("free", &[("cpu", 8, 0)])];
    let config = AgentSelectionConfig {
        max_container_count: Some(4),
    };
    let result = filter_candidates(&agents, &criteria(&[("cpu", 1)]), &config).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, "free");
}

#[test]
fn filter_skips_unschedulable_agents() {
    let mut drained = candidate("drained", &[("cpu", 8, 0)]);
    drained.schedulable = false;
    let agents = vec![drained, candidate("live", &[("cpu", 8, 0)])];
    let result = filter_candidates(&agents, &criteria(&[("cpu", 1)]), &AgentSelectionConfig::default())
        .unwrap();
    assert_eq!(result[0].id, "live");
}

#[test]
fn designated_agent_wins_when_compatible() {
    let agents = vec![
        candidate("a1", &[("cpu", 8, 0)]),
        candidate("a2", &[("cpu", 8, 0)]),
    ];
    let mut criteria = criteria(&[("cpu", 1)]);
    criteria.designated_agent = Some(AgentId::new("a2"));
    let result = filter_candidates(&agents, &criteria, &AgentSelectionConfig::default()).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, "a2");
}

#[test]
fn incompatible_designated_agent_errors() {
    let agents = vec![candidate("a1", &[("cpu", 1, 0)])];
    let mut criteria = criteria(&[("cpu", 4)]);
    criteria.designated_agent = Some(AgentId::new("a1"));
    let err = filter_candidates(&agents, &criteria, &AgentSelectionConfig::default()).unwrap_err();
    assert_eq!(err, SelectionError::DesignatedAgentIncompatible(AgentId::new("a1")));
}

// -- concentrated --

#[test]
fn concentrated_picks_least_residual() {
    let selector = ConcentratedAgentSelector::new(priority());
    let agents = vec![
        candidate("agent-high", &[("cpu", 8, 2), ("mem", 16384, 4096)]),
        candidate("agent-low", &[("cpu", 8, 6), ("mem", 16384, 12288)]),
        candidate("agent-medium", &[("cpu", 8, 4), ("mem", 16384, 8192)]),
    ];
    let chosen = selector
        .select(&agents, &criteria(&[("cpu", 1), ("mem", 2048)]), &AgentSelectionConfig::default())
        .unwrap();
    assert_eq!(chosen, "agent-low");
}

#[test]
fn concentrated_prefers_fewer_unutilized_kinds() {
    let selector = ConcentratedAgentSelector::new(priority());
    let agents = vec![
        candidate(
            "agent-gpu",
            &[("cpu", 8, 4), ("mem", 16384, 8192), ("cuda.shares", 4, 0)],
        ),
        candidate("agent-cpu-only", &[("cpu", 8, 4), ("mem", 16384, 8192)]),
    ];
    let chosen = selector
        .select(
            &agents,
            &criteria(&[("cpu", 2), ("mem", 4096), ("cuda.shares", 0)]),
            &AgentSelectionConfig::default(),
        )
        .unwrap();
    assert_eq!(chosen, "agent-cpu-only");
}

#[test]
fn concentrated_residual_is_the_primary_key() {
    let selector = ConcentratedAgentSelector::new(priority());
    let agents = vec![
        // huge residual, no unutilized kinds
        candidate("roomy-plain", &[("cpu", 100, 0), ("mem", 100, 0)]),
        // tiny residual, but an idle gpu the request does not use
        candidate(
            "packed-gpu",
            &[("cpu", 2, 1), ("mem", 2, 1), ("cuda.shares", 4, 0)],
        ),
    ];
    let chosen = selector
        .select(&agents, &criteria(&[("cpu", 1), ("mem", 1)]), &AgentSelectionConfig::default())
        .unwrap();
    // bin-packing wins: the smaller residual beats the cleaner capability fit
    assert_eq!(chosen, "packed-gpu");
}

#[test]
fn concentrated_respects_priority_order() {
    let selector = ConcentratedAgentSelector::new(vec!["mem".to_string(), "cpu".to_string()]);
    let agents = vec![
        candidate("low-mem-high-cpu", &[("cpu", 16, 2), ("mem", 8192, 6144)]),
        candidate("high-mem-low-cpu", &[("cpu", 8, 6), ("mem", 16384, 4096)]),
    ];
    let chosen = selector
        .select(&agents, &criteria(&[("cpu", 1), ("mem", 1024)]), &AgentSelectionConfig::default())
        .unwrap();
    assert_eq!(chosen, "low-mem-high-cpu");
}

#[test]
fn concentrated_spreads_inference_replicas() {
    let selector = ConcentratedAgentSelector::new(priority());
    let agents = vec![
        candidate("agent-1", &[("cpu", 8, 4)]),
        candidate("agent-2", &[("cpu", 8, 4)]),
        candidate("agent-3", &[("cpu", 8, 4)]),
    ];
    let mut criteria = criteria(&[("cpu", 1)]);
    criteria.session_type = SessionType::Inference;
    criteria.enforce_spreading_endpoint_replica = true;
    let mut counts = IndexMap::new();
    counts.insert(AgentId::new("agent-1"), 5u32);
    counts.insert(AgentId::new("agent-2"), 2);
    counts.insert(AgentId::new("agent-3"), 0);
    criteria.kernel_counts_at_endpoint = Some(counts);
    let chosen = selector
        .select(&agents, &criteria, &AgentSelectionConfig::default())
        .unwrap();
    assert_eq!(chosen, "agent-3");
}

// -- dispersed --

#[test]
fn dispersed_picks_most_residual() {
    let selector = DispersedAgentSelector::new(priority());
    let agents = vec![
        candidate("packed", &[("cpu", 8, 6), ("mem", 16384, 12288)]),
        candidate("empty", &[("cpu", 8, 0), ("mem", 16384, 0)]),
    ];
    let chosen = selector
        .select(&agents, &criteria(&[("cpu", 1), ("mem", 1024)]), &AgentSelectionConfig::default())
        .unwrap();
    assert_eq!(chosen, "empty");
}

#[test]
fn dispersed_breaks_ties_by_fewer_unutilized() {
    let selector = DispersedAgentSelector::new(priority());
    let agents = vec![
        candidate("gpu", &[("cpu", 8, 4), ("mem", 16384, 8192), ("cuda.shares", 4, 0)]),
        candidate("plain", &[("cpu", 8, 4), ("mem", 16384, 8192)]),
    ];
    let chosen = selector
        .select(&agents, &criteria(&[("cpu", 1), ("mem", 1024)]), &AgentSelectionConfig::default())
        .unwrap();
    assert_eq!(chosen, "plain");
}

// -- legacy --

#[test]
fn legacy_minimises_unutilized_then_prefers_capacity() {
    let selector = LegacyAgentSelector::new(priority());
    let agents = vec![
        candidate("gpu-big", &[("cpu", 32, 0), ("mem", 65536, 0), ("cuda.shares", 8, 0)]),
        candidate("plain-small", &[("cpu", 4, 0), ("mem", 8192, 0)]),
        candidate("plain-big", &[("cpu", 16, 0), ("mem", 32768, 0)]),
    ];
    let chosen = selector
        .select(&agents, &criteria(&[("cpu", 1), ("mem", 1024)]), &AgentSelectionConfig::default())
        .unwrap();
    // gpu-big loses on unutilized cuda; plain-big beats plain-small on capacity
    assert_eq!(chosen, "plain-big");
}

// -- round robin --

#[test]
fn roundrobin_walks_sorted_ids() {
    let selector = RoundRobinAgentSelector::default();
    let agents = vec![
        candidate("a3", &[("cpu", 8, 0)]),
        candidate("a1", &[("cpu", 8, 0)]),
        candidate("a2", &[("cpu", 8, 0)]),
    ];
    let criteria = criteria(&[("cpu", 1)]);
    let config = AgentSelectionConfig::default();
    let mut picks = Vec::new();
    for _ in 0..4 {
        let chosen = selector.select(&agents, &criteria, &config).unwrap();
        selector.note_placement(&chosen);
        picks.push(chosen.to_string());
    }
    assert_eq!(picks, vec!["a1", "a2", "a3", "a1"]);
}

#[test]
fn roundrobin_starting_offset() {
    let selector = RoundRobinAgentSelector::new(2);
    let agents = vec![
        candidate("a1", &[("cpu", 8, 0)]),
        candidate("a2", &[("cpu", 8, 0)]),
        candidate("a3", &[("cpu", 8, 0)]),
    ];
    let chosen = selector
        .select(&agents, &criteria(&[("cpu", 1)]), &AgentSelectionConfig::default())
        .unwrap();
    assert_eq!(chosen, "a3");
}

#[test]
fn roundrobin_index_only_advances_on_placement() {
    let selector = RoundRobinAgentSelector::default();
    let agents = vec![candidate("a1", &[("cpu", 8, 0)])];
    let criteria = criteria(&[("cpu", 1)]);
    let config = AgentSelectionConfig::default();
    selector.select(&agents, &criteria, &config).unwrap();
    selector.select(&agents, &criteria, &config).unwrap();
    assert_eq!(selector.next_index(), 0);
    selector.note_placement(&AgentId::new("a1"));
    assert_eq!(selector.next_index(), 1);
}

// -- filter monotonicity (P5) --

fn arb_candidates() -> impl Strategy<Value = Vec<AgentCandidate>> {
    proptest::collection::vec((0i64..16, 0i64..8), 1..8).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(n, (cap, occ))| {
                candidate(&format!("agent-{n:02}"), &[("cpu", cap, occ.min(cap))])
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn removing_a_non_selected_agent_preserves_the_filter_outcome(
        agents in arb_candidates(),
        remove_at in 0usize..8,
    ) {
        let criteria = criteria(&[("cpu", 2)]);
        let config = AgentSelectionConfig::default();
        let full = filter_candidates(&agents, &criteria, &config).unwrap_or_default();
        if agents.len() < 2 {
            return Ok(());
        }
        let remove_at = remove_at % agents.len();
        let removed_id = agents[remove_at].id.clone();
        let mut reduced_input = agents.clone();
        reduced_input.remove(remove_at);
        let reduced = filter_candidates(&reduced_input, &criteria, &config).unwrap_or_default();
        // the filter decides per agent: survivors are unchanged minus the removed one
        let expected: Vec<&AgentCandidate> =
            full.iter().filter(|a| a.id != removed_id).collect();
        prop_assert_eq!(reduced.iter().collect::<Vec<_>>(), expected);
    }
}
