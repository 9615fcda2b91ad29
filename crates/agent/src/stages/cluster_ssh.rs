// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster SSH material: keypair and port mapping under `config_dir/ssh/`

use super::ContainerOwnership;
use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;
use berth_core::{ClusterSshPortMapping, SshKeyPair};
use std::path::PathBuf;

const STAGE: &str = "cluster-ssh";

#[derive(Debug, Clone)]
pub struct ClusterSshSpec {
    pub config_dir: PathBuf,
    pub ssh_keypair: Option<SshKeyPair>,
    pub port_mapping: Option<ClusterSshPortMapping>,
    pub ownership: ContainerOwnership,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterSshResult {
    pub priv_key_path: Option<PathBuf>,
    pub pub_key_path: Option<PathBuf>,
    pub port_mapping_path: Option<PathBuf>,
}

#[derive(Default)]
pub struct ClusterSshProvisioner;

#[async_trait]
impl Provisioner for ClusterSshProvisioner {
    type Spec = ClusterSshSpec;
    type Resource = ClusterSshResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &ClusterSshSpec) -> Result<ClusterSshResult, ProvisionError> {
        let Some(keypair) = &spec.ssh_keypair else {
            return Ok(ClusterSshResult::default());
        };
        let ssh_dir = spec.config_dir.join("ssh");
        tokio::fs::create_dir_all(&ssh_dir)
            .await
            .map_err(|err| ProvisionError::failed(STAGE, format!("mkdir {ssh_dir:?}: {err}")))?;

        let priv_key_path = ssh_dir.join("id_cluster");
        let pub_key_path = ssh_dir.join("id_cluster.pub");
        tokio::fs::write(&priv_key_path, &keypair.private_key)
            .await
            .map_err(|err| ProvisionError::failed(STAGE, format!("write private key: {err}")))?;
        tokio::fs::write(&pub_key_path, &keypair.public_key)
            .await
            .map_err(|err| ProvisionError::failed(STAGE, format!("write public key: {err}")))?;
        super::set_mode(STAGE, &priv_key_path, 0o600)?;
        for path in [&priv_key_path, &pub_key_path] {
            super::chown_kernel(STAGE, path, &spec.ownership)?;
        }

        let port_mapping_path = match &spec.port_mapping {
            Some(mapping) => {
                let path = ssh_dir.join("port-mapping.json");
                let payload = serde_json::to_vec(mapping)
                    .map_err(|err| ProvisionError::failed(STAGE, err.to_string()))?;
                tokio::fs::write(&path, payload).await.map_err(|err| {
                    ProvisionError::failed(STAGE, format!("write port mapping: {err}"))
                })?;
                Some(path)
            }
            None => None,
        };

        Ok(ClusterSshResult {
            priv_key_path: Some(priv_key_path),
            pub_key_path: Some(pub_key_path),
            port_mapping_path,
        })
    }

    async fn teardown(&self, _resource: Option<&ClusterSshResult>) -> Result<(), ProvisionError> {
        // files live inside the scratch tree; scratch teardown removes them
        Ok(())
    }
}

#[cfg(test)]
#[path = "cluster_ssh_tests.rs"]
mod tests;
