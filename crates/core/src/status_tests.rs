// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use yare::parameterized;

#[test]
fn terminal_statuses_have_no_edges() {
    assert!(KernelStatus::Terminated.allowed_targets().is_empty());
    assert!(KernelStatus::Cancelled.allowed_targets().is_empty());
}

#[parameterized(
    pending_to_scheduled = { KernelStatus::Pending, KernelStatus::Scheduled, true },
    pending_to_running = { KernelStatus::Pending, KernelStatus::Running, false },
    scheduled_to_preparing = { KernelStatus::Scheduled, KernelStatus::Preparing, true },
    scheduled_skips_to_prepared = { KernelStatus::Scheduled, KernelStatus::Prepared, true },
    preparing_to_pulling = { KernelStatus::Preparing, KernelStatus::Pulling, true },
    pulling_to_prepared = { KernelStatus::Pulling, KernelStatus::Prepared, true },
    pulling_to_creating = { KernelStatus::Pulling, KernelStatus::Creating, false },
    prepared_to_creating = { KernelStatus::Prepared, KernelStatus::Creating, true },
    creating_to_running = { KernelStatus::Creating, KernelStatus::Running, true },
    running_to_terminating = { KernelStatus::Running, KernelStatus::Terminating, true },
    running_to_cancelled = { KernelStatus::Running, KernelStatus::Cancelled, false },
    terminating_to_terminated = { KernelStatus::Terminating, KernelStatus::Terminated, true },
    terminating_to_running = { KernelStatus::Terminating, KernelStatus::Running, false },
    error_to_terminated = { KernelStatus::Error, KernelStatus::Terminated, true },
    error_to_running = { KernelStatus::Error, KernelStatus::Running, false },
    restarting_back_to_pending = { KernelStatus::Restarting, KernelStatus::Pending, false },
    restarting_to_creating = { KernelStatus::Restarting, KernelStatus::Creating, true },
    restarting_to_terminated = { KernelStatus::Restarting, KernelStatus::Terminated, false },
)]
fn transition_edges(from: KernelStatus, to: KernelStatus, legal: bool) {
    assert_eq!(from.can_transit(to), legal);
}

#[test]
fn no_status_transitions_to_itself() {
    for status in KernelStatus::ALL {
        assert!(
            !status.can_transit(*status),
            "{status} must not self-transition"
        );
    }
}

#[test]
fn occupancy_excludes_pending_and_dead() {
    assert!(!KernelStatus::Pending.occupies_agent_resources());
    assert!(!KernelStatus::Cancelled.occupies_agent_resources());
    assert!(!KernelStatus::Terminated.occupies_agent_resources());
    assert!(KernelStatus::Scheduled.occupies_agent_resources());
    assert!(KernelStatus::Running.occupies_agent_resources());
    assert!(KernelStatus::Error.occupies_agent_resources());
}

#[test]
fn serde_uses_screaming_snake_case() {
    let json = serde_json::to_string(&KernelStatus::Terminating).unwrap();
    assert_eq!(json, "\"TERMINATING\"");
    let parsed: KernelStatus = serde_json::from_str("\"PULLING\"").unwrap();
    assert_eq!(parsed, KernelStatus::Pulling);
}

#[parameterized(
    empty = { &[], SessionStatus::Pending },
    single_running = { &[KernelStatus::Running], SessionStatus::Running },
    all_running = { &[KernelStatus::Running, KernelStatus::Running], SessionStatus::Running },
    least_advanced_wins = { &[KernelStatus::Running, KernelStatus::Pulling], SessionStatus::Pulling },
    any_error = { &[KernelStatus::Running, KernelStatus::Error], SessionStatus::Error },
    terminating_with_live = { &[KernelStatus::Terminating, KernelStatus::Running], SessionStatus::Terminating },
    dead_with_live = { &[KernelStatus::Terminated, KernelStatus::Running], SessionStatus::Terminating },
    all_terminated = { &[KernelStatus::Terminated, KernelStatus::Terminated], SessionStatus::Terminated },
    all_cancelled = { &[KernelStatus::Cancelled, KernelStatus::Cancelled], SessionStatus::Cancelled },
    mixed_dead = { &[KernelStatus::Cancelled, KernelStatus::Terminated], SessionStatus::Terminated },
    restarting = { &[KernelStatus::Restarting, KernelStatus::Running], SessionStatus::Restarting },
    all_pending = { &[KernelStatus::Pending, KernelStatus::Pending], SessionStatus::Pending },
    scheduled_and_pending = { &[KernelStatus::Scheduled, KernelStatus::Pending], SessionStatus::Pending },
)]
fn session_derivation(kernels: &[KernelStatus], expected: SessionStatus) {
    assert_eq!(derive_session_status(kernels), expected);
}

fn arb_status() -> impl Strategy<Value = KernelStatus> {
    proptest::sample::select(KernelStatus::ALL)
}

proptest! {
    // Derivation is a pure function of the multiset of statuses: the arrival
    // order of status updates must not matter.
    #[test]
    fn derivation_is_order_insensitive(
        mut kernels in proptest::collection::vec(arb_status(), 1..6),
        seed in 0u64..1000,
    ) {
        let base = derive_session_status(&kernels);
        // cheap deterministic shuffle
        let len = kernels.len();
        for i in 0..len {
            let j = ((seed as usize) + i * 7) % len;
            kernels.swap(i, j);
        }
        prop_assert_eq!(derive_session_status(&kernels), base);
    }

    // Walking random paths through the transition map only ever reaches
    // statuses the map allows, and an illegal target never changes state.
    #[test]
    fn random_walks_stay_inside_the_map(
        targets in proptest::collection::vec(arb_status(), 1..30),
    ) {
        let mut current = KernelStatus::Pending;
        let mut reached = vec![current];
        for to in targets {
            if current.can_transit(to) {
                current = to;
                reached.push(to);
            } else {
                // no-op: state unchanged
                prop_assert!(reached.last() == Some(&current));
            }
        }
        for window in reached.windows(2) {
            prop_assert!(window[0].can_transit(window[1]));
        }
    }
}
