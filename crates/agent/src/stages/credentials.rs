// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker registry credentials for the kernel

use super::ContainerOwnership;
use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;
use std::path::PathBuf;

const STAGE: &str = "credentials";

#[derive(Debug, Clone)]
pub struct CredentialsSpec {
    pub config_dir: PathBuf,
    pub docker_credentials: Option<serde_json::Value>,
    pub ownership: ContainerOwnership,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsResult {
    pub credentials_path: Option<PathBuf>,
}

#[derive(Default)]
pub struct CredentialsProvisioner;

#[async_trait]
impl Provisioner for CredentialsProvisioner {
    type Spec = CredentialsSpec;
    type Resource = CredentialsResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &CredentialsSpec) -> Result<CredentialsResult, ProvisionError> {
        let Some(credentials) = &spec.docker_credentials else {
            return Ok(CredentialsResult {
                credentials_path: None,
            });
        };
        let credentials_path = spec.config_dir.join("docker-creds.json");
        let payload = serde_json::to_vec(credentials)
            .map_err(|err| ProvisionError::failed(STAGE, err.to_string()))?;
        tokio::fs::write(&credentials_path, payload)
            .await
            .map_err(|err| ProvisionError::failed(STAGE, format!("write docker-creds.json: {err}")))?;
        super::set_mode(STAGE, &credentials_path, 0o600)?;
        super::chown_kernel(STAGE, &credentials_path, &spec.ownership)?;
        Ok(CredentialsResult {
            credentials_path: Some(credentials_path),
        })
    }

    async fn teardown(&self, _resource: Option<&CredentialsResult>) -> Result<(), ProvisionError> {
        // cleaned up with the scratch directory
        Ok(())
    }
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
