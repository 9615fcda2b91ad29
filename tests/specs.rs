//! Behavioral specifications for the berth orchestrator.
//!
//! These tests wire a real manager (store, scheduler, registry, event
//! handlers) to in-process agents running the full lifecycle pipeline over
//! the fake container runtime, and verify end-to-end behavior.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/prelude.rs"]
mod prelude;

// scheduling/
#[path = "specs/scheduling/happy_path.rs"]
mod scheduling_happy_path;
#[path = "specs/scheduling/predicates.rs"]
mod scheduling_predicates;
#[path = "specs/scheduling/capacity.rs"]
mod scheduling_capacity;
#[path = "specs/scheduling/single_node.rs"]
mod scheduling_single_node;
#[path = "specs/scheduling/round_robin.rs"]
mod scheduling_round_robin;

// lifecycle/
#[path = "specs/lifecycle/failure.rs"]
mod lifecycle_failure;
#[path = "specs/lifecycle/termination.rs"]
mod lifecycle_termination;

// rpc/
#[path = "specs/rpc/end_to_end.rs"]
mod rpc_end_to_end;
