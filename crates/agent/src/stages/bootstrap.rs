// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User bootstrap script placement

use super::ContainerOwnership;
use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;
use std::path::PathBuf;

const STAGE: &str = "bootstrap";

#[derive(Debug, Clone)]
pub struct BootstrapSpec {
    pub work_dir: PathBuf,
    pub bootstrap_script: Option<String>,
    pub ownership: ContainerOwnership,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapResult {
    pub script_path: Option<PathBuf>,
}

#[derive(Default)]
pub struct BootstrapProvisioner;

#[async_trait]
impl Provisioner for BootstrapProvisioner {
    type Spec = BootstrapSpec;
    type Resource = BootstrapResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &BootstrapSpec) -> Result<BootstrapResult, ProvisionError> {
        let Some(script) = &spec.bootstrap_script else {
            return Ok(BootstrapResult { script_path: None });
        };
        let script_path = spec.work_dir.join("bootstrap.sh");
        tokio::fs::write(&script_path, script)
            .await
            .map_err(|err| ProvisionError::failed(STAGE, format!("write bootstrap.sh: {err}")))?;
        super::set_mode(STAGE, &script_path, 0o755)?;
        super::chown_kernel(STAGE, &script_path, &spec.ownership)?;
        Ok(BootstrapResult {
            script_path: Some(script_path),
        })
    }

    async fn teardown(&self, _resource: Option<&BootstrapResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
