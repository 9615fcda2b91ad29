// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kebab-case lifecycle reason strings recorded in `status_info`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a kernel or session changed state.
///
/// Serialized as the kebab-case string stored in `status_info` and carried in
/// lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleReason {
    UserRequested,
    SelfTerminated,
    FailedToStart,
    AgentError,
    HangTimeout,
    NoAvailableInstances,
    PredicateChecksFailed,
    OperationTimeout,
    AgentLost,
    Restarting,
    #[serde(untagged)]
    Other(String),
}

impl LifecycleReason {
    pub fn as_str(&self) -> &str {
        match self {
            LifecycleReason::UserRequested => "user-requested",
            LifecycleReason::SelfTerminated => "self-terminated",
            LifecycleReason::FailedToStart => "failed-to-start",
            LifecycleReason::AgentError => "agent-error",
            LifecycleReason::HangTimeout => "hang-timeout",
            LifecycleReason::NoAvailableInstances => "no-available-instances",
            LifecycleReason::PredicateChecksFailed => "predicate-checks-failed",
            LifecycleReason::OperationTimeout => "operation-timeout",
            LifecycleReason::AgentLost => "agent-lost",
            LifecycleReason::Restarting => "restarting",
            LifecycleReason::Other(s) => s,
        }
    }
}

impl fmt::Display for LifecycleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for LifecycleReason {
    fn from(s: &str) -> Self {
        match s {
            "user-requested" => LifecycleReason::UserRequested,
            "self-terminated" => LifecycleReason::SelfTerminated,
            "failed-to-start" => LifecycleReason::FailedToStart,
            "agent-error" => LifecycleReason::AgentError,
            "hang-timeout" => LifecycleReason::HangTimeout,
            "no-available-instances" => LifecycleReason::NoAvailableInstances,
            "predicate-checks-failed" => LifecycleReason::PredicateChecksFailed,
            "operation-timeout" => LifecycleReason::OperationTimeout,
            "agent-lost" => LifecycleReason::AgentLost,
            "restarting" => LifecycleReason::Restarting,
            other => LifecycleReason::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "reason_tests.rs"]
mod tests;
