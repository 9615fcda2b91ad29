// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provisioner framework.
//!
//! A provisioner creates a resource from a spec and can undo it. A stage
//! wraps a provisioner so that its result is computed exactly once and its
//! teardown runs at most once, tolerating the setup never having happened.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

/// Why a provisioning step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionErrorKind {
    Failed,
    Timeout,
    Cancelled,
}

/// Failure of a single provisioner, tagged with its stage name.
#[derive(Debug, Error)]
#[error("stage {stage} failed: {cause}")]
pub struct ProvisionError {
    pub stage: &'static str,
    pub kind: ProvisionErrorKind,
    pub cause: String,
}

impl ProvisionError {
    pub fn failed(stage: &'static str, cause: impl Into<String>) -> Self {
        Self {
            stage,
            kind: ProvisionErrorKind::Failed,
            cause: cause.into(),
        }
    }

    pub fn timeout(stage: &'static str, cause: impl Into<String>) -> Self {
        Self {
            stage,
            kind: ProvisionErrorKind::Timeout,
            cause: cause.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ProvisionErrorKind::Timeout
    }

    /// Canonical exception name for wire error records, so the manager can
    /// classify stage-local failures without parsing messages.
    pub fn exception_name(&self) -> &'static str {
        match self.kind {
            ProvisionErrorKind::Timeout => "TimeoutError",
            ProvisionErrorKind::Cancelled => "CancelledError",
            ProvisionErrorKind::Failed => "ProvisionError",
        }
    }
}

/// One reversible step of the kernel lifecycle.
///
/// `teardown` must tolerate `None` (setup never ran, or was cancelled before
/// producing a result) and must be safe to call twice.
#[async_trait]
pub trait Provisioner: Send + Sync {
    type Spec: Send + Sync;
    type Resource: Send + Sync;

    /// Stable identifier for logging and error tagging.
    fn name(&self) -> &'static str;

    async fn setup(&self, spec: &Self::Spec) -> Result<Self::Resource, ProvisionError>;

    async fn teardown(&self, resource: Option<&Self::Resource>) -> Result<(), ProvisionError>;
}

/// Holds a provisioner's result so later stages can depend on it without
/// re-executing the setup, and guards teardown against double invocation.
pub struct ProvisionStage<P: Provisioner> {
    provisioner: P,
    result: RwLock<Option<P::Resource>>,
    setup_attempted: AtomicBool,
    torn_down: AtomicBool,
}

impl<P: Provisioner> ProvisionStage<P> {
    pub fn new(provisioner: P) -> Self {
        Self {
            provisioner,
            result: RwLock::new(None),
            setup_attempted: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.provisioner.name()
    }

    /// Run the provisioner's setup once; later calls are no-ops.
    pub async fn setup(&self, spec: &P::Spec) -> Result<(), ProvisionError> {
        let mut slot = self.result.write().await;
        if slot.is_some() {
            return Ok(());
        }
        self.setup_attempted.store(true, Ordering::SeqCst);
        tracing::debug!(stage = self.name(), "setup");
        let resource = self.provisioner.setup(spec).await?;
        *slot = Some(resource);
        Ok(())
    }

    /// The computed resource; fails when requested before a successful setup.
    pub async fn wait_for_resource(&self) -> Result<P::Resource, ProvisionError>
    where
        P::Resource: Clone,
    {
        let guard = self.result.read().await;
        guard.clone().ok_or_else(|| {
            ProvisionError::failed(self.name(), "stage result requested before setup")
        })
    }

    /// Tear the stage down. Only runs the provisioner's teardown when a
    /// setup was attempted, and only once.
    pub async fn teardown(&self) -> Result<(), ProvisionError> {
        if !self.setup_attempted.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(stage = self.name(), "teardown");
        let guard = self.result.read().await;
        self.provisioner.teardown(guard.as_ref()).await
    }
}

#[cfg(test)]
#[path = "provision_tests.rs"]
mod tests;
