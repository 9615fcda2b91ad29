// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel config files: `environ.txt`, `resource.txt`, `kconfig.dat`.
//!
//! The kernel runner inside the container reads these from `/home/config`.

use crate::provision::{ProvisionError, Provisioner};
use crate::resources::KernelResourceSpec;
use async_trait::async_trait;
use berth_core::KernelCreationInfo;
use indexmap::IndexMap;
use std::path::PathBuf;

const STAGE: &str = "config-file";

#[derive(Debug, Clone)]
pub struct ConfigFileSpec {
    pub config_dir: PathBuf,
    pub environ: IndexMap<String, String>,
    pub resource_spec: KernelResourceSpec,
    pub creation_info: KernelCreationInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFileResult {
    pub environ_path: PathBuf,
    pub resource_path: PathBuf,
    pub kconfig_path: PathBuf,
}

#[derive(Default)]
pub struct ConfigFileProvisioner;

#[async_trait]
impl Provisioner for ConfigFileProvisioner {
    type Spec = ConfigFileSpec;
    type Resource = ConfigFileResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &ConfigFileSpec) -> Result<ConfigFileResult, ProvisionError> {
        let environ_path = spec.config_dir.join("environ.txt");
        let mut environ_text = String::new();
        for (key, value) in &spec.environ {
            environ_text.push_str(key);
            environ_text.push('=');
            environ_text.push_str(value);
            environ_text.push('\n');
        }
        tokio::fs::write(&environ_path, environ_text)
            .await
            .map_err(|err| ProvisionError::failed(STAGE, format!("write environ.txt: {err}")))?;

        let resource_path = spec.config_dir.join("resource.txt");
        let mut resource_text = String::new();
        for line in spec.resource_spec.to_resource_lines() {
            resource_text.push_str(&line);
            resource_text.push('\n');
        }
        tokio::fs::write(&resource_path, resource_text)
            .await
            .map_err(|err| ProvisionError::failed(STAGE, format!("write resource.txt: {err}")))?;

        let kconfig_path = spec.config_dir.join("kconfig.dat");
        let payload = rmp_serde::to_vec_named(&spec.creation_info)
            .map_err(|err| ProvisionError::failed(STAGE, format!("encode kconfig: {err}")))?;
        tokio::fs::write(&kconfig_path, payload)
            .await
            .map_err(|err| ProvisionError::failed(STAGE, format!("write kconfig.dat: {err}")))?;

        Ok(ConfigFileResult {
            environ_path,
            resource_path,
            kconfig_path,
        })
    }

    async fn teardown(&self, _resource: Option<&ConfigFileResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_file_tests.rs"]
mod tests;
