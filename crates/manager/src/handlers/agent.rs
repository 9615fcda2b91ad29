// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent events: heartbeats, terminations, image pull progress

use super::CONSUMER_GROUP;
use crate::registry::AgentRegistry;
use berth_bus::EventDispatcher;
use berth_core::{Clock, Event};
use std::sync::Arc;

pub(super) fn register<C: Clock>(dispatcher: &EventDispatcher, registry: Arc<AgentRegistry<C>>) {
    {
        let registry = Arc::clone(&registry);
        dispatcher.consume(CONSUMER_GROUP, "agent.heartbeat", move |envelope| {
            let registry = Arc::clone(&registry);
            async move {
                if let Event::AgentHeartbeat { agent_id, info } = envelope.payload {
                    if let Err(err) = registry.handle_heartbeat(&agent_id, &info).await {
                        tracing::error!(agent_id = %agent_id, error = %err, "heartbeat handling failed");
                    }
                }
            }
        });
    }
    {
        dispatcher.consume(CONSUMER_GROUP, "image.pull-started", |envelope| async move {
            tracing::info!(summary = %envelope.payload.log_summary(), "image pull started");
        });
    }
    {
        dispatcher.consume(CONSUMER_GROUP, "image.pull-finished", |envelope| async move {
            tracing::info!(summary = %envelope.payload.log_summary(), "image pull finished");
        });
    }
    {
        dispatcher.consume(CONSUMER_GROUP, "image.pull-failed", |envelope| async move {
            tracing::warn!(summary = %envelope.payload.log_summary(), "image pull failed");
        });
    }
}
