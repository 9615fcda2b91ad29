// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ordered substages of kernel creation.
//!
//! Stage order is fixed by the composite in [`crate::creation`]; each module
//! here owns one concern and knows nothing about its neighbours beyond the
//! result types it consumes.

pub mod bootstrap;
pub mod cluster_ssh;
pub mod cmdarg;
pub mod config_file;
pub mod container;
pub mod container_ssh;
pub mod credentials;
pub mod dotfiles;
pub mod environ;
pub mod image_meta;
pub mod image_pull;
pub mod kernel_object;
pub mod mounts;
pub mod network;
pub mod resource;
pub mod scratch;
pub mod service_port;

use crate::provision::ProvisionError;
use std::path::Path;

/// Ownership applied to kernel-owned files on the host side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerOwnership {
    pub uid_override: Option<u32>,
    pub gid_override: Option<u32>,
    pub kernel_uid: Option<u32>,
    pub kernel_gid: Option<u32>,
}

impl ContainerOwnership {
    pub fn uid(&self) -> Option<u32> {
        self.uid_override.or(self.kernel_uid)
    }

    pub fn gid(&self) -> Option<u32> {
        self.gid_override.or(self.kernel_gid)
    }
}

/// Apply the configured kernel ownership to a path. No-op when neither uid
/// nor gid is configured.
pub(crate) fn chown_kernel(
    stage: &'static str,
    path: &Path,
    ownership: &ContainerOwnership,
) -> Result<(), ProvisionError> {
    let (uid, gid) = (ownership.uid(), ownership.gid());
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::chown(path, uid, gid)
            .map_err(|err| ProvisionError::failed(stage, format!("chown {path:?}: {err}")))?;
    }
    Ok(())
}

/// chmod helper for kernel-written files.
#[cfg(unix)]
pub(crate) fn set_mode(
    stage: &'static str,
    path: &Path,
    mode: u32,
) -> Result<(), ProvisionError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|err| ProvisionError::failed(stage, format!("chmod {path:?}: {err}")))
}

#[cfg(not(unix))]
pub(crate) fn set_mode(_stage: &'static str, _path: &Path, _mode: u32) -> Result<(), ProvisionError> {
    Ok(())
}
