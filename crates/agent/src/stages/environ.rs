// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel environment composition.
//!
//! Layering order (later wins): image base environ, agent-derived variables,
//! resource-plugin contributions, user-supplied environ, cluster variables.

use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;
use berth_core::ClusterInfo;
use indexmap::IndexMap;

const STAGE: &str = "environ";

#[derive(Debug, Clone)]
pub struct EnvironSpec {
    pub architecture: String,
    pub distro: String,
    pub kernel_uid: Option<u32>,
    pub kernel_gid: Option<u32>,
    pub base_environ: IndexMap<String, String>,
    pub resource_environ: IndexMap<String, String>,
    pub user_environ: IndexMap<String, String>,
    pub cluster: ClusterInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironResult {
    pub environ: IndexMap<String, String>,
}

#[derive(Default)]
pub struct EnvironProvisioner;

#[async_trait]
impl Provisioner for EnvironProvisioner {
    type Spec = EnvironSpec;
    type Resource = EnvironResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &EnvironSpec) -> Result<EnvironResult, ProvisionError> {
        let mut environ = spec.base_environ.clone();

        environ.insert("HOME".to_string(), "/home/work".to_string());
        environ.insert("USER".to_string(), "work".to_string());
        environ.insert("BACKENDAI_ARCH".to_string(), spec.architecture.clone());
        environ.insert("BACKENDAI_DISTRO".to_string(), spec.distro.clone());
        if let Some(uid) = spec.kernel_uid {
            environ.insert("BACKENDAI_KERNEL_UID".to_string(), uid.to_string());
        }
        if let Some(gid) = spec.kernel_gid {
            environ.insert("BACKENDAI_KERNEL_GID".to_string(), gid.to_string());
        }

        for (key, value) in &spec.resource_environ {
            environ.insert(key.clone(), value.clone());
        }
        for (key, value) in &spec.user_environ {
            environ.insert(key.clone(), value.clone());
        }

        environ.insert(
            "BACKENDAI_CLUSTER_HOST".to_string(),
            spec.cluster.hostname.clone(),
        );
        environ.insert(
            "BACKENDAI_CLUSTER_ROLE".to_string(),
            spec.cluster.role.as_str().to_string(),
        );
        environ.insert(
            "BACKENDAI_CLUSTER_IDX".to_string(),
            spec.cluster.idx.to_string(),
        );
        environ.insert(
            "BACKENDAI_CLUSTER_REPLICAS".to_string(),
            spec.cluster.replicas_env(),
        );

        Ok(EnvironResult { environ })
    }

    async fn teardown(&self, _resource: Option<&EnvironResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "environ_tests.rs"]
mod tests;
