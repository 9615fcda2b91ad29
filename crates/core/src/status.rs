// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel, session, and agent status types and the transition graph.
//!
//! The kernel transition map is the single source of truth for lifecycle
//! legality: any update whose `(from, to)` pair is not an edge must be a
//! no-op. Session status is never stored authoritatively in its own right;
//! it is derived from the statuses of the session's kernels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelStatus {
    Pending,
    Scheduled,
    Preparing,
    Pulling,
    Prepared,
    Creating,
    Running,
    Restarting,
    Resizing,
    Suspended,
    Terminating,
    Terminated,
    Error,
    Cancelled,
}

/// Lifecycle status of a session, derived from its kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Scheduled,
    Preparing,
    Pulling,
    Prepared,
    Creating,
    Running,
    Restarting,
    Terminating,
    Terminated,
    Error,
    Cancelled,
}

/// Liveness of a worker agent as tracked by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Alive,
    Lost,
    Terminated,
}

/// Statuses whose kernels count against an agent's `occupied_slots`.
pub const AGENT_RESOURCE_OCCUPYING_STATUSES: &[KernelStatus] = &[
    KernelStatus::Scheduled,
    KernelStatus::Preparing,
    KernelStatus::Pulling,
    KernelStatus::Prepared,
    KernelStatus::Creating,
    KernelStatus::Running,
    KernelStatus::Restarting,
    KernelStatus::Resizing,
    KernelStatus::Suspended,
    KernelStatus::Terminating,
    KernelStatus::Error,
];

/// Terminal statuses a kernel never leaves.
pub const DEAD_KERNEL_STATUSES: &[KernelStatus] = &[KernelStatus::Terminated, KernelStatus::Cancelled];

impl KernelStatus {
    /// Statuses reachable from `self` in a single transition.
    pub const fn allowed_targets(self) -> &'static [KernelStatus] {
        use KernelStatus::*;
        match self {
            Pending => &[Scheduled, Cancelled, Error],
            Scheduled => &[Preparing, Pulling, Prepared, Cancelled, Error],
            Preparing => &[Pulling, Prepared, Cancelled, Error],
            Pulling => &[Prepared, Cancelled, Error],
            Prepared => &[Creating, Cancelled, Error],
            Creating => &[Running, Terminating, Terminated, Cancelled, Error],
            Running => &[Restarting, Resizing, Terminating, Terminated, Error],
            Restarting => &[
                Preparing, Pulling, Prepared, Creating, Running, Resizing, Suspended, Terminating,
                Error, Cancelled,
            ],
            Resizing => &[
                Preparing, Pulling, Prepared, Creating, Running, Restarting, Suspended,
                Terminating, Error, Cancelled,
            ],
            Suspended => &[
                Preparing, Pulling, Prepared, Creating, Running, Restarting, Resizing,
                Terminating, Error, Cancelled,
            ],
            Terminating => &[Terminated, Error],
            Error => &[Terminating, Terminated],
            Terminated => &[],
            Cancelled => &[],
        }
    }

    /// Whether `self -> to` is an edge of the transition map.
    pub fn can_transit(self, to: KernelStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// Whether kernels in this status count against agent occupancy.
    pub fn occupies_agent_resources(self) -> bool {
        AGENT_RESOURCE_OCCUPYING_STATUSES.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, KernelStatus::Terminated | KernelStatus::Cancelled)
    }

    /// Forward-progress rank along the creation path. Used for deriving a
    /// session's status as the least-advanced of its kernels.
    fn progress_rank(self) -> u8 {
        use KernelStatus::*;
        match self {
            Pending => 0,
            Scheduled => 1,
            Preparing => 2,
            Pulling => 3,
            Prepared => 4,
            Creating => 5,
            // The post-RUNNING mutations all count as "running" progress.
            Running | Restarting | Resizing | Suspended => 6,
            Terminating => 7,
            Terminated => 8,
            Error => 9,
            Cancelled => 10,
        }
    }

    pub const ALL: &'static [KernelStatus] = &[
        KernelStatus::Pending,
        KernelStatus::Scheduled,
        KernelStatus::Preparing,
        KernelStatus::Pulling,
        KernelStatus::Prepared,
        KernelStatus::Creating,
        KernelStatus::Running,
        KernelStatus::Restarting,
        KernelStatus::Resizing,
        KernelStatus::Suspended,
        KernelStatus::Terminating,
        KernelStatus::Terminated,
        KernelStatus::Error,
        KernelStatus::Cancelled,
    ];

    /// Status name as stored in `status_history` keys.
    pub fn name(self) -> &'static str {
        use KernelStatus::*;
        match self {
            Pending => "PENDING",
            Scheduled => "SCHEDULED",
            Preparing => "PREPARING",
            Pulling => "PULLING",
            Prepared => "PREPARED",
            Creating => "CREATING",
            Running => "RUNNING",
            Restarting => "RESTARTING",
            Resizing => "RESIZING",
            Suspended => "SUSPENDED",
            Terminating => "TERMINATING",
            Terminated => "TERMINATED",
            Error => "ERROR",
            Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl SessionStatus {
    pub fn name(self) -> &'static str {
        use SessionStatus::*;
        match self {
            Pending => "PENDING",
            Scheduled => "SCHEDULED",
            Preparing => "PREPARING",
            Pulling => "PULLING",
            Prepared => "PREPARED",
            Creating => "CREATING",
            Running => "RUNNING",
            Restarting => "RESTARTING",
            Terminating => "TERMINATING",
            Terminated => "TERMINATED",
            Error => "ERROR",
            Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Terminated | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Alive => f.write_str("ALIVE"),
            AgentStatus::Lost => f.write_str("LOST"),
            AgentStatus::Terminated => f.write_str("TERMINATED"),
        }
    }
}

/// Derive a session's status from its kernels' statuses.
///
/// Pure and order-insensitive: any ERROR forces ERROR; all-dead collapses to
/// CANCELLED/TERMINATED; any TERMINATING with live peers keeps the session
/// TERMINATING; otherwise the session sits at the least-advanced status all
/// kernels have reached.
pub fn derive_session_status(kernels: &[KernelStatus]) -> SessionStatus {
    if kernels.is_empty() {
        return SessionStatus::Pending;
    }
    if kernels.contains(&KernelStatus::Error) {
        return SessionStatus::Error;
    }
    if kernels.iter().all(|s| s.is_terminal()) {
        if kernels.iter().all(|s| *s == KernelStatus::Cancelled) {
            return SessionStatus::Cancelled;
        }
        return SessionStatus::Terminated;
    }
    // A dead or dying kernel alongside live peers forces collective teardown.
    if kernels
        .iter()
        .any(|s| *s == KernelStatus::Terminating || s.is_terminal())
    {
        return SessionStatus::Terminating;
    }
    if kernels.contains(&KernelStatus::Restarting) {
        return SessionStatus::Restarting;
    }
    let least = kernels
        .iter()
        .copied()
        .min_by_key(|s| s.progress_rank())
        .unwrap_or(KernelStatus::Pending);
    match least {
        KernelStatus::Scheduled => SessionStatus::Scheduled,
        KernelStatus::Preparing => SessionStatus::Preparing,
        KernelStatus::Pulling => SessionStatus::Pulling,
        KernelStatus::Prepared => SessionStatus::Prepared,
        KernelStatus::Creating => SessionStatus::Creating,
        KernelStatus::Running | KernelStatus::Resizing | KernelStatus::Suspended => {
            SessionStatus::Running
        }
        _ => SessionStatus::Pending,
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
