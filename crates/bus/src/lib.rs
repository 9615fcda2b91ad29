// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! berth-bus: Typed event bus between the manager and agents.
//!
//! Anycast events reach exactly one consumer of each group; broadcast events
//! reach every subscriber. Events for the same domain_id arrive in order
//! within a single consumer; no cross-domain ordering is promised.

pub mod dispatcher;
pub mod envelope;

pub use dispatcher::{CoalescingOptions, DispatchError, EventBus, EventDispatcher, EventProducer};
pub use envelope::EventEnvelope;
