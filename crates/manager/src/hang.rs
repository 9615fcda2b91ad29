// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stale-session sweeping.
//!
//! Sessions stuck in a non-terminal status longer than the configured
//! per-status tolerance are force-destroyed with reason `hang-timeout`.
//! Sweeps repeat at 40% of the tolerance, capped at one hour, so a hang is
//! caught at least twice within its window.

use crate::registry::AgentRegistry;
use crate::registry::RegistryError;
use berth_core::{Clock, LifecycleReason, SessionId, SessionStatus};
use berth_storage::StateStore;
use chrono::DateTime;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const INTERVAL_WEIGHT_PCT: u64 = 40;

/// Sweep cadence for a tolerance threshold: 40% of it, at most one hour.
pub fn sweep_interval(threshold: Duration) -> Duration {
    let scaled = Duration::from_millis(threshold.as_millis() as u64 * INTERVAL_WEIGHT_PCT / 100);
    scaled.min(MAX_SWEEP_INTERVAL)
}

/// Periodically force-terminates hung sessions.
pub struct HangSweeper<C: Clock> {
    store: StateStore,
    registry: Arc<AgentRegistry<C>>,
    /// status name -> tolerated residence time
    thresholds: IndexMap<SessionStatus, Duration>,
    clock: C,
}

impl<C: Clock> HangSweeper<C> {
    pub fn new(
        store: StateStore,
        registry: Arc<AgentRegistry<C>>,
        thresholds: IndexMap<SessionStatus, Duration>,
        clock: C,
    ) -> Self {
        Self {
            store,
            registry,
            thresholds,
            clock,
        }
    }

    /// Build thresholds from the config's `status name -> seconds` table.
    /// Unknown status names are logged and skipped.
    pub fn thresholds_from_config(
        table: &IndexMap<String, u64>,
    ) -> IndexMap<SessionStatus, Duration> {
        let mut thresholds = IndexMap::new();
        for (name, seconds) in table {
            let parsed: Result<SessionStatus, _> =
                serde_json::from_value(serde_json::Value::String(name.clone()));
            match parsed {
                Ok(status) if !status.is_terminal() => {
                    thresholds.insert(status, Duration::from_secs(*seconds));
                }
                Ok(status) => {
                    tracing::warn!(status = %status, "hang tolerance for terminal status ignored");
                }
                Err(_) => {
                    tracing::warn!(status = %name, "invalid session status for hang-threshold");
                }
            }
        }
        thresholds
    }

    /// Milliseconds a session has sat in its current status.
    fn residence_ms(&self, entered_at: &str, now_ms: u64) -> Option<u64> {
        let entered = DateTime::parse_from_rfc3339(entered_at).ok()?;
        let entered_ms = entered.timestamp_millis();
        if entered_ms < 0 {
            return None;
        }
        Some(now_ms.saturating_sub(entered_ms as u64))
    }

    /// One pass: find and destroy every session over its threshold.
    pub async fn sweep_once(&self) -> Result<Vec<SessionId>, RegistryError> {
        let now_ms = self.clock.epoch_ms();
        let mut stale: Vec<SessionId> = Vec::new();
        self.store.read(|data| {
            for session in data.sessions.values() {
                let Some(threshold) = self.thresholds.get(&session.status) else {
                    continue;
                };
                let Some(entered_at) = session.status_history.get(session.status.name()) else {
                    continue;
                };
                match self.residence_ms(entered_at, now_ms) {
                    Some(elapsed) if elapsed > threshold.as_millis() as u64 => {
                        stale.push(session.id.clone());
                    }
                    _ => {}
                }
            }
        });

        for session_id in &stale {
            tracing::warn!(session_id = %session_id, "force-terminating hung session");
            if let Err(err) = self
                .registry
                .destroy_session(session_id, LifecycleReason::HangTimeout, true)
                .await
            {
                tracing::error!(session_id = %session_id, error = %err, "hang termination failed");
            }
        }
        Ok(stale)
    }

    /// Run sweeps forever at the smallest configured cadence.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self
            .thresholds
            .values()
            .copied()
            .map(sweep_interval)
            .min()
            .unwrap_or(MAX_SWEEP_INTERVAL);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(err) = self.sweep_once().await {
                    tracing::error!(error = %err, "hang sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "hang_tests.rs"]
mod tests;
