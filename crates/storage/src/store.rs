// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serializable in-memory state store.
//!
//! Transactions copy the row set, mutate the copy, and commit with an
//! optimistic version check; a commit that lost a race fails with
//! `SerializationConflict` exactly like a SERIALIZABLE postgres transaction
//! surfacing SQLSTATE 40001, and `execute_with_retry` re-runs it with the
//! documented backoff. Advisory locks are named async mutexes with the same
//! acquire/release discipline as their postgres counterparts.

use crate::rows::{AgentRow, KernelRow, SessionRow};
use berth_core::{AgentId, KernelId, SessionId};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction raced a conflicting commit; retryable.
    #[error("serialization conflict (concurrent update)")]
    SerializationConflict,

    #[error("DB serialization failed after {0} retries")]
    RetriesExhausted(u32),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("kernel not found: {0}")]
    KernelNotFound(KernelId),

    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("advisory lock timeout: {0}")]
    LockTimeout(String),
}

/// The full row set. Cloned per transaction.
#[derive(Debug, Clone, Default)]
pub struct StoreData {
    pub sessions: IndexMap<SessionId, SessionRow>,
    pub kernels: IndexMap<KernelId, KernelRow>,
    pub agents: IndexMap<AgentId, AgentRow>,
}

impl StoreData {
    pub fn session(&self, id: &SessionId) -> Result<&SessionRow, StoreError> {
        self.sessions
            .get(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.clone()))
    }

    pub fn session_mut(&mut self, id: &SessionId) -> Result<&mut SessionRow, StoreError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.clone()))
    }

    pub fn kernel(&self, id: &KernelId) -> Result<&KernelRow, StoreError> {
        self.kernels
            .get(id)
            .ok_or_else(|| StoreError::KernelNotFound(id.clone()))
    }

    pub fn kernel_mut(&mut self, id: &KernelId) -> Result<&mut KernelRow, StoreError> {
        self.kernels
            .get_mut(id)
            .ok_or_else(|| StoreError::KernelNotFound(id.clone()))
    }

    pub fn agent(&self, id: &AgentId) -> Result<&AgentRow, StoreError> {
        self.agents
            .get(id)
            .ok_or_else(|| StoreError::AgentNotFound(id.clone()))
    }

    pub fn agent_mut(&mut self, id: &AgentId) -> Result<&mut AgentRow, StoreError> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| StoreError::AgentNotFound(id.clone()))
    }

    /// Kernels belonging to a session, in cluster order.
    pub fn session_kernels(&self, id: &SessionId) -> Vec<&KernelRow> {
        let mut kernels: Vec<&KernelRow> =
            self.kernels.values().filter(|k| &k.session_id == id).collect();
        kernels.sort_by_key(|k| k.cluster_idx);
        kernels
    }
}

struct Versioned {
    version: u64,
    data: StoreData,
}

/// An open transaction: a private copy of the rows plus the version it
/// was forked from.
pub struct Transaction {
    base_version: u64,
    pub data: StoreData,
}

/// Guard for a held advisory lock.
pub struct AdvisoryLockGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Shared, cloneable handle to the manager state.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<Versioned>>,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

const RETRY_MAX_ATTEMPTS: u32 = 20;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(20);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Versioned {
                version: 0,
                data: StoreData::default(),
            })),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fork a transaction from the current committed state.
    pub fn begin(&self) -> Transaction {
        let inner = self.inner.lock();
        Transaction {
            base_version: inner.version,
            data: inner.data.clone(),
        }
    }

    /// Commit a transaction; fails when another commit landed in between.
    pub fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.version != txn.base_version {
            return Err(StoreError::SerializationConflict);
        }
        inner.version += 1;
        inner.data = txn.data;
        Ok(())
    }

    /// Read-only access to the committed state.
    pub fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> T {
        let inner = self.inner.lock();
        f(&inner.data)
    }

    /// Run a closed transaction: begin, apply, commit.
    ///
    /// Not retried; use [`StateStore::execute_with_retry`] for multi-statement
    /// status updates.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut txn = self.begin();
        let value = f(&mut txn.data)?;
        self.commit(txn)?;
        Ok(value)
    }

    /// Run a transaction, retrying serialization conflicts with exponential
    /// backoff (multiplier 20 ms, cap 5 s, 20 attempts).
    pub async fn execute_with_retry<T>(
        &self,
        mut f: impl FnMut(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        for attempt in 0..RETRY_MAX_ATTEMPTS {
            match self.transaction(&mut f) {
                Err(StoreError::SerializationConflict) => {
                    let exp = 2u32.saturating_pow(attempt.min(16));
                    let delay = RETRY_BASE_DELAY.saturating_mul(exp).min(RETRY_MAX_DELAY);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "txn conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
        Err(StoreError::RetriesExhausted(RETRY_MAX_ATTEMPTS))
    }

    fn lock_entry(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Acquire a named advisory lock, waiting indefinitely.
    pub async fn advisory_lock(&self, name: &str) -> AdvisoryLockGuard {
        let entry = self.lock_entry(name);
        AdvisoryLockGuard {
            _guard: entry.lock_owned().await,
        }
    }

    /// Acquire a named advisory lock with a deadline.
    pub async fn advisory_lock_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<AdvisoryLockGuard, StoreError> {
        let entry = self.lock_entry(name);
        match tokio::time::timeout(timeout, entry.lock_owned()).await {
            Ok(guard) => Ok(AdvisoryLockGuard { _guard: guard }),
            Err(_) => Err(StoreError::LockTimeout(name.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
