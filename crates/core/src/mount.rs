// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container mounts and per-kernel file payloads

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a mount is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountPermission {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

/// A single mount entry in the container spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    #[serde(rename = "type")]
    pub mount_type: MountType,
    pub source: PathBuf,
    pub target: PathBuf,
    pub permission: MountPermission,
}

impl Mount {
    pub fn bind_ro(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            mount_type: MountType::Bind,
            source: source.into(),
            target: target.into(),
            permission: MountPermission::ReadOnly,
        }
    }

    pub fn bind_rw(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            mount_type: MountType::Bind,
            source: source.into(),
            target: target.into(),
            permission: MountPermission::ReadWrite,
        }
    }

    pub fn volume(
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        permission: MountPermission,
    ) -> Self {
        Self {
            mount_type: MountType::Volume,
            source: source.into(),
            target: target.into(),
            permission,
        }
    }
}

/// A managed folder presented to the kernel under `/home/work`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VFolderMount {
    pub name: String,
    pub host_path: PathBuf,
    pub kernel_path: PathBuf,
    pub mount_perm: MountPermission,
}

/// A user dotfile written into the kernel's home tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotfileInfo {
    /// Path relative to the work directory (absolute paths are rejected).
    pub path: String,
    pub data: String,
    /// Octal permission string such as `"644"`.
    pub perm: String,
}

#[cfg(test)]
#[path = "mount_tests.rs"]
mod tests;
