// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed events exchanged between the manager and agents.
//!
//! Events form a closed set partitioned by domain. Anycast events are
//! consumed by exactly one manager replica; broadcast events reach every
//! subscriber. Serializes with `{"type": "domain.name", ...fields}` format.

use crate::id::{AgentId, KernelId, SessionId};
use crate::image::ImageRef;
use crate::ports::ServicePort;
use crate::reason::LifecycleReason;
use crate::slot::ResourceSlot;
use crate::status::SessionStatus;
use serde::{Deserialize, Serialize};

/// Delivery mode of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDelivery {
    /// Consumed by exactly one consumer of each group.
    Anycast,
    /// Delivered to every subscriber.
    Broadcast,
}

/// Domain an event belongs to. Events of one domain and domain_id are
/// delivered in arrival order within a single consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventDomain {
    Agent,
    Kernel,
    Session,
    Image,
    Schedule,
    Vfolder,
    Bgtask,
    Idle,
}

/// Connection details reported when a kernel reaches RUNNING.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConnectionInfo {
    pub kernel_host: String,
    pub repl_in_port: u16,
    pub repl_out_port: u16,
    pub service_ports: Vec<ServicePort>,
    pub container_id: String,
}

/// Heartbeat payload carrying an agent's registration info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHeartbeatInfo {
    pub addr: String,
    #[serde(default)]
    pub public_key: Option<String>,
    pub architecture: String,
    pub scaling_group: String,
    pub available_slots: ResourceSlot,
    pub container_count: u32,
    #[serde(default = "default_schedulable")]
    pub schedulable: bool,
}

fn default_schedulable() -> bool {
    true
}

/// Events that drive manager-side state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- kernel lifecycle (agent -> manager) --
    #[serde(rename = "kernel.preparing")]
    KernelPreparing {
        kernel_id: KernelId,
        session_id: SessionId,
        reason: LifecycleReason,
    },

    #[serde(rename = "kernel.pulling")]
    KernelPulling {
        kernel_id: KernelId,
        session_id: SessionId,
        reason: LifecycleReason,
    },

    #[serde(rename = "kernel.creating")]
    KernelCreating {
        kernel_id: KernelId,
        session_id: SessionId,
        reason: LifecycleReason,
    },

    #[serde(rename = "kernel.started")]
    KernelStarted {
        kernel_id: KernelId,
        session_id: SessionId,
        reason: LifecycleReason,
        connection: KernelConnectionInfo,
    },

    #[serde(rename = "kernel.cancelled")]
    KernelCancelled {
        kernel_id: KernelId,
        session_id: SessionId,
        reason: LifecycleReason,
    },

    #[serde(rename = "kernel.terminating")]
    KernelTerminating {
        kernel_id: KernelId,
        session_id: SessionId,
        reason: LifecycleReason,
    },

    #[serde(rename = "kernel.terminated")]
    KernelTerminated {
        kernel_id: KernelId,
        session_id: SessionId,
        reason: LifecycleReason,
        #[serde(default)]
        exit_code: Option<i32>,
    },

    #[serde(rename = "kernel.heartbeat")]
    KernelHeartbeat { kernel_id: KernelId },

    // -- session aggregate --
    #[serde(rename = "session.enqueued")]
    SessionEnqueued { session_id: SessionId },

    #[serde(rename = "session.scheduled")]
    SessionScheduled { session_id: SessionId },

    #[serde(rename = "session.started")]
    SessionStarted { session_id: SessionId },

    #[serde(rename = "session.terminating")]
    SessionTerminating {
        session_id: SessionId,
        reason: LifecycleReason,
    },

    #[serde(rename = "session.terminated")]
    SessionTerminated {
        session_id: SessionId,
        reason: LifecycleReason,
    },

    #[serde(rename = "session.cancelled")]
    SessionCancelled {
        session_id: SessionId,
        reason: LifecycleReason,
    },

    #[serde(rename = "session.failure")]
    SessionFailure {
        session_id: SessionId,
        reason: LifecycleReason,
    },

    /// Request to terminate a session (anycast command).
    #[serde(rename = "session.do-terminate")]
    DoTerminateSession {
        session_id: SessionId,
        reason: LifecycleReason,
    },

    // -- image --
    #[serde(rename = "image.pull-started")]
    ImagePullStarted {
        agent_id: AgentId,
        image: ImageRef,
    },

    #[serde(rename = "image.pull-finished")]
    ImagePullFinished {
        agent_id: AgentId,
        image: ImageRef,
    },

    #[serde(rename = "image.pull-failed")]
    ImagePullFailed {
        agent_id: AgentId,
        image: ImageRef,
        msg: String,
    },

    // -- agent --
    #[serde(rename = "agent.started")]
    AgentStarted { agent_id: AgentId },

    #[serde(rename = "agent.heartbeat")]
    AgentHeartbeat {
        agent_id: AgentId,
        info: AgentHeartbeatInfo,
    },

    #[serde(rename = "agent.terminated")]
    AgentTerminated {
        agent_id: AgentId,
        reason: LifecycleReason,
    },

    #[serde(rename = "agent.error")]
    AgentError { agent_id: AgentId, message: String },

    // -- schedule --
    /// Kick a scheduling tick (anycast command).
    #[serde(rename = "schedule.do-schedule")]
    DoSchedule {
        #[serde(default)]
        scaling_group: Option<String>,
    },

    /// Start the kernels of a freshly-scheduled session (anycast command).
    #[serde(rename = "schedule.do-start-session")]
    DoStartSession { session_id: SessionId },

    /// Scheduling progress fan-out to watching clients (broadcast).
    #[serde(rename = "schedule.update")]
    SchedulingUpdate {
        session_id: SessionId,
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<LifecycleReason>,
    },

    // -- vfolder --
    #[serde(rename = "vfolder.deletion-success")]
    VfolderDeletionSuccess { vfolder_id: String },

    #[serde(rename = "vfolder.deletion-failure")]
    VfolderDeletionFailure { vfolder_id: String, message: String },

    // -- bgtask --
    /// Background-task progress propagated to clients via SSE (broadcast).
    #[serde(rename = "bgtask.updated")]
    BgtaskUpdated {
        task_id: String,
        current: u64,
        total: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    // -- idle --
    #[serde(rename = "idle.do-check")]
    DoIdleCheck,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::KernelPreparing { .. } => "kernel.preparing",
            Event::KernelPulling { .. } => "kernel.pulling",
            Event::KernelCreating { .. } => "kernel.creating",
            Event::KernelStarted { .. } => "kernel.started",
            Event::KernelCancelled { .. } => "kernel.cancelled",
            Event::KernelTerminating { .. } => "kernel.terminating",
            Event::KernelTerminated { .. } => "kernel.terminated",
            Event::KernelHeartbeat { .. } => "kernel.heartbeat",
            Event::SessionEnqueued { .. } => "session.enqueued",
            Event::SessionScheduled { .. } => "session.scheduled",
            Event::SessionStarted { .. } => "session.started",
            Event::SessionTerminating { .. } => "session.terminating",
            Event::SessionTerminated { .. } => "session.terminated",
            Event::SessionCancelled { .. } => "session.cancelled",
            Event::SessionFailure { .. } => "session.failure",
            Event::DoTerminateSession { .. } => "session.do-terminate",
            Event::ImagePullStarted { .. } => "image.pull-started",
            Event::ImagePullFinished { .. } => "image.pull-finished",
            Event::ImagePullFailed { .. } => "image.pull-failed",
            Event::AgentStarted { .. } => "agent.started",
            Event::AgentHeartbeat { .. } => "agent.heartbeat",
            Event::AgentTerminated { .. } => "agent.terminated",
            Event::AgentError { .. } => "agent.error",
            Event::DoSchedule { .. } => "schedule.do-schedule",
            Event::DoStartSession { .. } => "schedule.do-start-session",
            Event::SchedulingUpdate { .. } => "schedule.update",
            Event::VfolderDeletionSuccess { .. } => "vfolder.deletion-success",
            Event::VfolderDeletionFailure { .. } => "vfolder.deletion-failure",
            Event::BgtaskUpdated { .. } => "bgtask.updated",
            Event::DoIdleCheck => "idle.do-check",
        }
    }

    pub fn domain(&self) -> EventDomain {
        match self {
            Event::KernelPreparing { .. }
            | Event::KernelPulling { .. }
            | Event::KernelCreating { .. }
            | Event::KernelStarted { .. }
            | Event::KernelCancelled { .. }
            | Event::KernelTerminating { .. }
            | Event::KernelTerminated { .. }
            | Event::KernelHeartbeat { .. } => EventDomain::Kernel,
            Event::SessionEnqueued { .. }
            | Event::SessionScheduled { .. }
            | Event::SessionStarted { .. }
            | Event::SessionTerminating { .. }
            | Event::SessionTerminated { .. }
            | Event::SessionCancelled { .. }
            | Event::SessionFailure { .. }
            | Event::DoTerminateSession { .. } => EventDomain::Session,
            Event::ImagePullStarted { .. }
            | Event::ImagePullFinished { .. }
            | Event::ImagePullFailed { .. } => EventDomain::Image,
            Event::AgentStarted { .. }
            | Event::AgentHeartbeat { .. }
            | Event::AgentTerminated { .. }
            | Event::AgentError { .. } => EventDomain::Agent,
            Event::DoSchedule { .. }
            | Event::DoStartSession { .. }
            | Event::SchedulingUpdate { .. } => EventDomain::Schedule,
            Event::VfolderDeletionSuccess { .. } | Event::VfolderDeletionFailure { .. } => {
                EventDomain::Vfolder
            }
            Event::BgtaskUpdated { .. } => EventDomain::Bgtask,
            Event::DoIdleCheck => EventDomain::Idle,
        }
    }

    /// String form of the entity id used for per-domain ordering.
    pub fn domain_id(&self) -> String {
        match self {
            Event::KernelPreparing { kernel_id, .. }
            | Event::KernelPulling { kernel_id, .. }
            | Event::KernelCreating { kernel_id, .. }
            | Event::KernelStarted { kernel_id, .. }
            | Event::KernelCancelled { kernel_id, .. }
            | Event::KernelTerminating { kernel_id, .. }
            | Event::KernelTerminated { kernel_id, .. }
            | Event::KernelHeartbeat { kernel_id } => kernel_id.to_string(),
            Event::SessionEnqueued { session_id }
            | Event::SessionScheduled { session_id }
            | Event::SessionStarted { session_id }
            | Event::SessionTerminating { session_id, .. }
            | Event::SessionTerminated { session_id, .. }
            | Event::SessionCancelled { session_id, .. }
            | Event::SessionFailure { session_id, .. }
            | Event::DoTerminateSession { session_id, .. }
            | Event::DoStartSession { session_id }
            | Event::SchedulingUpdate { session_id, .. } => session_id.to_string(),
            Event::ImagePullStarted { image, .. }
            | Event::ImagePullFinished { image, .. }
            | Event::ImagePullFailed { image, .. } => image.canonical(),
            Event::AgentStarted { agent_id }
            | Event::AgentHeartbeat { agent_id, .. }
            | Event::AgentTerminated { agent_id, .. }
            | Event::AgentError { agent_id, .. } => agent_id.to_string(),
            Event::DoSchedule { scaling_group } => {
                scaling_group.clone().unwrap_or_default()
            }
            Event::VfolderDeletionSuccess { vfolder_id }
            | Event::VfolderDeletionFailure { vfolder_id, .. } => vfolder_id.clone(),
            Event::BgtaskUpdated { task_id, .. } => task_id.clone(),
            Event::DoIdleCheck => String::new(),
        }
    }

    pub fn delivery(&self) -> EventDelivery {
        match self {
            Event::SchedulingUpdate { .. } | Event::BgtaskUpdated { .. } => {
                EventDelivery::Broadcast
            }
            _ => EventDelivery::Anycast,
        }
    }

    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            Event::KernelPreparing { kernel_id, .. }
            | Event::KernelPulling { kernel_id, .. }
            | Event::KernelCreating { kernel_id, .. }
            | Event::KernelStarted { kernel_id, .. }
            | Event::KernelCancelled { kernel_id, .. }
            | Event::KernelTerminating { kernel_id, .. }
            | Event::KernelHeartbeat { kernel_id } => format!("{t} kernel={kernel_id}"),
            Event::KernelTerminated {
                kernel_id,
                exit_code,
                ..
            } => match exit_code {
                Some(code) => format!("{t} kernel={kernel_id} exit={code}"),
                None => format!("{t} kernel={kernel_id}"),
            },
            Event::SessionEnqueued { session_id }
            | Event::SessionScheduled { session_id }
            | Event::SessionStarted { session_id }
            | Event::DoStartSession { session_id } => format!("{t} session={session_id}"),
            Event::SessionTerminating { session_id, reason }
            | Event::SessionTerminated { session_id, reason }
            | Event::SessionCancelled { session_id, reason }
            | Event::SessionFailure { session_id, reason }
            | Event::DoTerminateSession { session_id, reason } => {
                format!("{t} session={session_id} reason={reason}")
            }
            Event::ImagePullStarted { agent_id, image }
            | Event::ImagePullFinished { agent_id, image } => {
                format!("{t} agent={agent_id} image={}", image.canonical())
            }
            Event::ImagePullFailed {
                agent_id,
                image,
                msg,
            } => format!("{t} agent={agent_id} image={} msg={msg}", image.canonical()),
            Event::AgentStarted { agent_id } => format!("{t} agent={agent_id}"),
            Event::AgentHeartbeat { agent_id, info } => {
                format!("{t} agent={agent_id} containers={}", info.container_count)
            }
            Event::AgentTerminated { agent_id, reason } => {
                format!("{t} agent={agent_id} reason={reason}")
            }
            Event::AgentError { agent_id, message } => {
                format!("{t} agent={agent_id} msg={message}")
            }
            Event::DoSchedule { scaling_group } => match scaling_group {
                Some(sg) => format!("{t} sgroup={sg}"),
                None => t.to_string(),
            },
            Event::SchedulingUpdate {
                session_id, status, ..
            } => format!("{t} session={session_id} status={status}"),
            Event::VfolderDeletionSuccess { vfolder_id } => format!("{t} vfolder={vfolder_id}"),
            Event::VfolderDeletionFailure {
                vfolder_id,
                message,
            } => format!("{t} vfolder={vfolder_id} msg={message}"),
            Event::BgtaskUpdated {
                task_id,
                current,
                total,
                ..
            } => format!("{t} task={task_id} progress={current}/{total}"),
            Event::DoIdleCheck => t.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
