// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel lifecycle events -> DB status updates

use super::CONSUMER_GROUP;
use crate::registry::AgentRegistry;
use berth_bus::EventDispatcher;
use berth_core::{Clock, Event};
use std::sync::Arc;

pub(super) fn register<C: Clock>(dispatcher: &EventDispatcher, registry: Arc<AgentRegistry<C>>) {
    {
        let registry = Arc::clone(&registry);
        dispatcher.consume(CONSUMER_GROUP, "kernel.preparing", move |envelope| {
            let registry = Arc::clone(&registry);
            async move {
                if let Event::KernelPreparing {
                    kernel_id, reason, ..
                } = envelope.payload
                {
                    if let Err(err) = registry.mark_kernel_preparing(&kernel_id, reason).await {
                        tracing::error!(kernel_id = %kernel_id, error = %err, "kernel.preparing handling failed");
                    }
                }
            }
        });
    }
    {
        let registry = Arc::clone(&registry);
        dispatcher.consume(CONSUMER_GROUP, "kernel.pulling", move |envelope| {
            let registry = Arc::clone(&registry);
            async move {
                if let Event::KernelPulling {
                    kernel_id, reason, ..
                } = envelope.payload
                {
                    if let Err(err) = registry.mark_kernel_pulling(&kernel_id, reason).await {
                        tracing::error!(kernel_id = %kernel_id, error = %err, "kernel.pulling handling failed");
                    }
                }
            }
        });
    }
    {
        let registry = Arc::clone(&registry);
        dispatcher.consume(CONSUMER_GROUP, "kernel.creating", move |envelope| {
            let registry = Arc::clone(&registry);
            async move {
                if let Event::KernelCreating {
                    kernel_id, reason, ..
                } = envelope.payload
                {
                    if let Err(err) = registry.mark_kernel_creating(&kernel_id, reason).await {
                        tracing::error!(kernel_id = %kernel_id, error = %err, "kernel.creating handling failed");
                    }
                }
            }
        });
    }
    {
        let registry = Arc::clone(&registry);
        dispatcher.consume(CONSUMER_GROUP, "kernel.started", move |envelope| {
            let registry = Arc::clone(&registry);
            async move {
                if let Event::KernelStarted {
                    kernel_id,
                    reason,
                    connection,
                    ..
                } = envelope.payload
                {
                    if let Err(err) = registry
                        .mark_kernel_running(&kernel_id, reason, &connection)
                        .await
                    {
                        tracing::error!(kernel_id = %kernel_id, error = %err, "kernel.started handling failed");
                    }
                }
            }
        });
    }
    {
        let registry = Arc::clone(&registry);
        dispatcher.consume(CONSUMER_GROUP, "kernel.terminated", move |envelope| {
            let registry = Arc::clone(&registry);
            async move {
                if let Event::KernelTerminated {
                    kernel_id,
                    reason,
                    exit_code,
                    ..
                } = envelope.payload
                {
                    if let Err(err) = registry
                        .mark_kernel_terminated(&kernel_id, reason, exit_code)
                        .await
                    {
                        tracing::error!(kernel_id = %kernel_id, error = %err, "kernel.terminated handling failed");
                    }
                }
            }
        });
    }
    {
        let registry = Arc::clone(&registry);
        dispatcher.consume(CONSUMER_GROUP, "kernel.cancelled", move |envelope| {
            let registry = Arc::clone(&registry);
            async move {
                if let Event::KernelCancelled {
                    kernel_id, reason, ..
                } = envelope.payload
                {
                    if let Err(err) = registry.mark_kernel_cancelled(&kernel_id, reason).await {
                        tracing::error!(kernel_id = %kernel_id, error = %err, "kernel.cancelled handling failed");
                    }
                }
            }
        });
    }
    // kernel.terminating needs no handling: destroy_session already moved
    // the row to TERMINATING before asking the agent.
}
