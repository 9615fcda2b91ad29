// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of wall-clock time.
///
/// Status history entries and scheduler bookkeeping are stamped through this
/// trait so tests can drive time deterministically.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    fn epoch_ms(&self) -> u64;

    /// Current UTC wall-clock time.
    fn now_utc(&self) -> DateTime<Utc> {
        let ms = self.epoch_ms();
        Utc.timestamp_millis_opt(ms as i64)
            .single()
            .unwrap_or_default()
    }

    /// Current time as an ISO-8601 string (the `status_history` format).
    fn now_iso8601(&self) -> String {
        self.now_utc().to_rfc3339()
    }
}

/// System clock for production use
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually-advanced clock for tests
#[derive(Clone)]
pub struct FakeClock {
    now_ms: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::at(1_700_000_000_000)
    }

    pub fn at(epoch_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(epoch_ms)),
        }
    }

    pub fn advance_ms(&self, delta: u64) {
        self.now_ms.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set_ms(&self, epoch_ms: u64) {
        self.now_ms.store(epoch_ms, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn epoch_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
