// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scratch layout: path derivation and directory creation.
//!
//! Path derivation is a pure function of `(scratch_root, kernel_id,
//! scratch_type)`; creation happens in a later stage so failures before any
//! filesystem work tear down cleanly.

use super::ContainerOwnership;
use crate::config::ScratchType;
use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;
use berth_core::KernelId;
use std::path::PathBuf;

const PATH_STAGE: &str = "scratch-path";
const CREATE_STAGE: &str = "scratch-create";

#[derive(Debug, Clone)]
pub struct ScratchPathSpec {
    pub kernel_id: KernelId,
    pub scratch_type: ScratchType,
    pub scratch_root: PathBuf,
}

/// The canonical per-kernel path tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchPathResult {
    pub scratch_dir: PathBuf,
    /// Backing file for the memory scratch type.
    pub scratch_file: PathBuf,
    pub tmp_dir: PathBuf,
    pub work_dir: PathBuf,
    pub config_dir: PathBuf,
    pub scratch_type: ScratchType,
}

#[derive(Default)]
pub struct ScratchPathProvisioner;

#[async_trait]
impl Provisioner for ScratchPathProvisioner {
    type Spec = ScratchPathSpec;
    type Resource = ScratchPathResult;

    fn name(&self) -> &'static str {
        PATH_STAGE
    }

    async fn setup(&self, spec: &ScratchPathSpec) -> Result<ScratchPathResult, ProvisionError> {
        let scratch_dir = spec.scratch_root.join(spec.kernel_id.as_str());
        Ok(ScratchPathResult {
            scratch_file: spec
                .scratch_root
                .join(format!("{}.img", spec.kernel_id)),
            tmp_dir: scratch_dir.join("tmp"),
            work_dir: scratch_dir.join("work"),
            config_dir: scratch_dir.join("config"),
            scratch_dir,
            scratch_type: spec.scratch_type,
        })
    }

    async fn teardown(&self, _resource: Option<&ScratchPathResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScratchCreateSpec {
    pub paths: ScratchPathResult,
    pub scratch_size: u64,
    pub ownership: ContainerOwnership,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchCreateResult {
    pub scratch_dir: PathBuf,
    pub scratch_file: Option<PathBuf>,
}

#[derive(Default)]
pub struct ScratchCreateProvisioner;

#[async_trait]
impl Provisioner for ScratchCreateProvisioner {
    type Spec = ScratchCreateSpec;
    type Resource = ScratchCreateResult;

    fn name(&self) -> &'static str {
        CREATE_STAGE
    }

    async fn setup(&self, spec: &ScratchCreateSpec) -> Result<ScratchCreateResult, ProvisionError> {
        let paths = &spec.paths;
        for dir in [
            &paths.scratch_dir,
            &paths.work_dir,
            &paths.config_dir,
            &paths.tmp_dir,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|err| ProvisionError::failed(CREATE_STAGE, format!("mkdir {dir:?}: {err}")))?;
        }

        let scratch_file = if paths.scratch_type == ScratchType::Memory {
            let file = tokio::fs::File::create(&paths.scratch_file).await.map_err(|err| {
                ProvisionError::failed(CREATE_STAGE, format!("create {:?}: {err}", paths.scratch_file))
            })?;
            file.set_len(spec.scratch_size).await.map_err(|err| {
                ProvisionError::failed(CREATE_STAGE, format!("truncate {:?}: {err}", paths.scratch_file))
            })?;
            Some(paths.scratch_file.clone())
        } else {
            None
        };

        for dir in [&paths.work_dir, &paths.config_dir] {
            super::chown_kernel(CREATE_STAGE, dir, &spec.ownership)?;
        }

        Ok(ScratchCreateResult {
            scratch_dir: paths.scratch_dir.clone(),
            scratch_file,
        })
    }

    async fn teardown(&self, resource: Option<&ScratchCreateResult>) -> Result<(), ProvisionError> {
        let Some(resource) = resource else {
            return Ok(());
        };
        if let Err(err) = tokio::fs::remove_dir_all(&resource.scratch_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = ?resource.scratch_dir, error = %err, "scratch removal failed");
            }
        }
        if let Some(file) = &resource.scratch_file {
            if let Err(err) = tokio::fs::remove_file(file).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(file = ?file, error = %err, "scratch file removal failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "scratch_tests.rs"]
mod tests;
