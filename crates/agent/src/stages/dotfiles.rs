// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User dotfile placement under the work tree

use super::ContainerOwnership;
use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;
use berth_core::DotfileInfo;
use std::path::{Component, Path, PathBuf};

const STAGE: &str = "dotfiles";

/// Paths the sample/krunner files own; user dotfiles may not shadow them.
pub const RESERVED_DOTFILES: &[&str] = &[
    ".bashrc.sample",
    ".zshrc.sample",
    ".tmux.conf.sample",
    ".jupyter",
    ".terminfo",
    ".ssh",
];

#[derive(Debug, Clone)]
pub struct DotfilesSpec {
    pub work_dir: PathBuf,
    pub dotfiles: Vec<DotfileInfo>,
    pub ownership: ContainerOwnership,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotfilesResult {
    pub written: Vec<PathBuf>,
}

#[derive(Default)]
pub struct DotfilesProvisioner;

fn parse_mode(perm: &str) -> Option<u32> {
    u32::from_str_radix(perm, 8).ok()
}

fn is_reserved(path: &str) -> bool {
    let first = Path::new(path)
        .components()
        .next()
        .and_then(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .unwrap_or(path);
    RESERVED_DOTFILES.contains(&first)
}

#[async_trait]
impl Provisioner for DotfilesProvisioner {
    type Spec = DotfilesSpec;
    type Resource = DotfilesResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &DotfilesSpec) -> Result<DotfilesResult, ProvisionError> {
        let mut written = Vec::with_capacity(spec.dotfiles.len());
        for dotfile in &spec.dotfiles {
            if Path::new(&dotfile.path).is_absolute() {
                return Err(ProvisionError::failed(
                    STAGE,
                    format!("dotfile not allowed: absolute path {}", dotfile.path),
                ));
            }
            if is_reserved(&dotfile.path) {
                return Err(ProvisionError::failed(
                    STAGE,
                    format!("dotfile not allowed: {}", dotfile.path),
                ));
            }
            let mode = parse_mode(&dotfile.perm).ok_or_else(|| {
                ProvisionError::failed(
                    STAGE,
                    format!("bad permission {:?} for {}", dotfile.perm, dotfile.path),
                )
            })?;
            let target = spec.work_dir.join(&dotfile.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|err| {
                    ProvisionError::failed(STAGE, format!("mkdir {parent:?}: {err}"))
                })?;
            }
            tokio::fs::write(&target, &dotfile.data)
                .await
                .map_err(|err| ProvisionError::failed(STAGE, format!("write {target:?}: {err}")))?;
            super::set_mode(STAGE, &target, mode)?;
            super::chown_kernel(STAGE, &target, &spec.ownership)?;
            written.push(target);
        }
        Ok(DotfilesResult { written })
    }

    async fn teardown(&self, _resource: Option<&DotfilesResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "dotfiles_tests.rs"]
mod tests;
