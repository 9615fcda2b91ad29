// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! berth-storage: Manager-side state store.
//!
//! Holds the session/kernel/agent rows the scheduler and state machine read
//! and write. Transactions are serializable: a commit that raced a
//! conflicting commit fails with [`StoreError::SerializationConflict`] and is
//! retried by [`StateStore::execute_with_retry`] with the standard backoff.

pub mod json;
pub mod rows;
pub mod store;

pub use json::json_merge;
pub use rows::{AgentRow, KernelRow, SessionRow};
pub use store::{AdvisoryLockGuard, StateStore, StoreData, StoreError, Transaction};
