// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-container SSH keypair under `work_dir/.ssh/`.
//!
//! Skipped when an existing mount already supplies `/home/work/.ssh` (e.g. a
//! user vfolder); the mounted content wins.

use super::ContainerOwnership;
use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;
use berth_core::SshKeyPair;
use std::path::PathBuf;

const STAGE: &str = "container-ssh";

#[derive(Debug, Clone)]
pub struct ContainerSshSpec {
    pub work_dir: PathBuf,
    pub ssh_keypair: SshKeyPair,
    /// Cluster public key also admitted to `authorized_keys`.
    pub cluster_public_key: Option<String>,
    pub ssh_already_mounted: bool,
    pub ownership: ContainerOwnership,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSshResult {
    pub ssh_dir: Option<PathBuf>,
}

#[derive(Default)]
pub struct ContainerSshProvisioner;

#[async_trait]
impl Provisioner for ContainerSshProvisioner {
    type Spec = ContainerSshSpec;
    type Resource = ContainerSshResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &ContainerSshSpec) -> Result<ContainerSshResult, ProvisionError> {
        if spec.ssh_already_mounted {
            return Ok(ContainerSshResult::default());
        }
        let ssh_dir = spec.work_dir.join(".ssh");
        tokio::fs::create_dir_all(&ssh_dir)
            .await
            .map_err(|err| ProvisionError::failed(STAGE, format!("mkdir {ssh_dir:?}: {err}")))?;

        let mut authorized = spec.ssh_keypair.public_key.clone();
        authorized.push('\n');
        if let Some(cluster_key) = &spec.cluster_public_key {
            authorized.push_str(cluster_key);
            authorized.push('\n');
        }

        let files = [
            ("id_container", spec.ssh_keypair.private_key.as_str(), 0o600),
            ("id_container.pub", spec.ssh_keypair.public_key.as_str(), 0o644),
            ("authorized_keys", authorized.as_str(), 0o600),
        ];
        for (name, content, mode) in files {
            let path = ssh_dir.join(name);
            tokio::fs::write(&path, content)
                .await
                .map_err(|err| ProvisionError::failed(STAGE, format!("write {name}: {err}")))?;
            super::set_mode(STAGE, &path, mode)?;
            super::chown_kernel(STAGE, &path, &spec.ownership)?;
        }
        super::set_mode(STAGE, &ssh_dir, 0o700)?;
        super::chown_kernel(STAGE, &ssh_dir, &spec.ownership)?;

        Ok(ContainerSshResult {
            ssh_dir: Some(ssh_dir),
        })
    }

    async fn teardown(&self, _resource: Option<&ContainerSshResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "container_ssh_tests.rs"]
mod tests;
