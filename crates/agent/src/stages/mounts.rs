// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mount assembly: intrinsic, kernel-runner, and vfolder mounts.

use super::ContainerOwnership;
use crate::config::ScratchType;
use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;
use berth_core::{Mount, MountPermission, VFolderMount};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INTRINSIC_STAGE: &str = "intrinsic-mount";
const KRUNNER_STAGE: &str = "krunner-mount";
const VFOLDER_STAGE: &str = "vfolder-mount";

/// A local unix socket forwarding into a host socket, mounted into the
/// container so kernels can reach host services without host networking.
#[derive(Debug, Clone)]
pub struct DomainSocketProxy {
    pub host_sock_path: PathBuf,
    pub proxy_sock_path: PathBuf,
    task: Arc<tokio::task::JoinHandle<()>>,
}

impl DomainSocketProxy {
    /// Start a proxy socket under `base_dir` forwarding to `host_sock_path`.
    #[cfg(unix)]
    pub async fn start(
        base_dir: &Path,
        host_sock_path: PathBuf,
    ) -> Result<Self, ProvisionError> {
        let file_name = host_sock_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("proxy");
        let proxy_sock_path = base_dir.join(format!("{file_name}.proxy"));
        let _ = tokio::fs::remove_file(&proxy_sock_path).await;
        let listener = tokio::net::UnixListener::bind(&proxy_sock_path).map_err(|err| {
            ProvisionError::failed(
                INTRINSIC_STAGE,
                format!("bind proxy socket {proxy_sock_path:?}: {err}"),
            )
        })?;
        let upstream = host_sock_path.clone();
        let task = tokio::spawn(async move {
            loop {
                let (mut inbound, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                let upstream = upstream.clone();
                tokio::spawn(async move {
                    let Ok(mut outbound) = tokio::net::UnixStream::connect(&upstream).await else {
                        return;
                    };
                    let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                });
            }
        });
        Ok(Self {
            host_sock_path,
            proxy_sock_path,
            task: Arc::new(task),
        })
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone)]
pub struct IntrinsicMountSpec {
    pub config_dir: PathBuf,
    pub work_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub scratch_type: ScratchType,
    pub agent_sock_path: Option<PathBuf>,
    pub ipc_base_path: PathBuf,
    pub coredump_enabled: bool,
    pub coredump_path: PathBuf,
    pub coredump_core_path: PathBuf,
    /// Host sockets to proxy into the container.
    pub domain_socket_targets: Vec<PathBuf>,
    pub ownership: ContainerOwnership,
}

#[derive(Debug, Clone)]
pub struct IntrinsicMountResult {
    pub mounts: Vec<Mount>,
    pub domain_socket_proxies: Vec<DomainSocketProxy>,
}

#[derive(Default)]
pub struct IntrinsicMountProvisioner;

#[async_trait]
impl Provisioner for IntrinsicMountProvisioner {
    type Spec = IntrinsicMountSpec;
    type Resource = IntrinsicMountResult;

    fn name(&self) -> &'static str {
        INTRINSIC_STAGE
    }

    async fn setup(&self, spec: &IntrinsicMountSpec) -> Result<IntrinsicMountResult, ProvisionError> {
        let mut mounts = vec![
            Mount::bind_ro(&spec.config_dir, "/home/config"),
            Mount::bind_rw(&spec.work_dir, "/home/work"),
        ];
        if cfg!(target_os = "linux") && spec.scratch_type == ScratchType::Memory {
            mounts.push(Mount::bind_rw(&spec.tmp_dir, "/tmp"));
        }
        if cfg!(target_os = "linux") {
            for path in ["/etc/localtime", "/etc/timezone"] {
                if Path::new(path).exists() {
                    mounts.push(Mount::bind_ro(path, path));
                }
            }
            // LXCFS virtualises proc files for container-local resource views
            let lxcfs_root = Path::new("/var/lib/lxcfs");
            if lxcfs_root.is_dir() {
                for entry in ["proc/cpuinfo", "proc/meminfo", "proc/stat", "proc/uptime"] {
                    let source = lxcfs_root.join(entry);
                    if source.exists() {
                        mounts.push(Mount::bind_ro(source, format!("/{entry}")));
                    }
                }
            }
        }
        if spec.coredump_enabled {
            mounts.push(Mount::bind_rw(&spec.coredump_path, &spec.coredump_core_path));
        }
        if cfg!(target_os = "linux") {
            if let Some(agent_sock) = &spec.agent_sock_path {
                mounts.push(Mount::bind_rw(agent_sock, "/opt/kernel/agent.sock"));
            }
        }

        let mut proxies = Vec::new();
        #[cfg(unix)]
        {
            if !spec.domain_socket_targets.is_empty() {
                tokio::fs::create_dir_all(&spec.ipc_base_path)
                    .await
                    .map_err(|err| {
                        ProvisionError::failed(
                            INTRINSIC_STAGE,
                            format!("mkdir {:?}: {err}", spec.ipc_base_path),
                        )
                    })?;
            }
            for target in &spec.domain_socket_targets {
                let proxy = DomainSocketProxy::start(&spec.ipc_base_path, target.clone()).await?;
                mounts.push(Mount::bind_rw(
                    &proxy.proxy_sock_path,
                    Path::new("/home/work/.sockets").join(
                        target.file_name().unwrap_or_default(),
                    ),
                ));
                proxies.push(proxy);
            }
        }

        Ok(IntrinsicMountResult {
            mounts,
            domain_socket_proxies: proxies,
        })
    }

    async fn teardown(&self, resource: Option<&IntrinsicMountResult>) -> Result<(), ProvisionError> {
        if let Some(resource) = resource {
            for proxy in &resource.domain_socket_proxies {
                proxy.stop();
                let _ = std::fs::remove_file(&proxy.proxy_sock_path);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct KernelRunnerMountSpec {
    pub distro: String,
    /// distro prefix -> volume name.
    pub krunner_volumes: IndexMap<String, String>,
    /// Extra volumes contributed by compute plugins.
    pub plugin_mounts: Vec<Mount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelRunnerMountResult {
    pub mounts: Vec<Mount>,
}

#[derive(Default)]
pub struct KernelRunnerMountProvisioner;

#[async_trait]
impl Provisioner for KernelRunnerMountProvisioner {
    type Spec = KernelRunnerMountSpec;
    type Resource = KernelRunnerMountResult;

    fn name(&self) -> &'static str {
        KRUNNER_STAGE
    }

    async fn setup(
        &self,
        spec: &KernelRunnerMountSpec,
    ) -> Result<KernelRunnerMountResult, ProvisionError> {
        // exact distro match first, then prefix match (ubuntu22.04 -> ubuntu)
        let volume = spec
            .krunner_volumes
            .get(&spec.distro)
            .or_else(|| {
                spec.krunner_volumes
                    .iter()
                    .find(|(prefix, _)| spec.distro.starts_with(prefix.as_str()))
                    .map(|(_, volume)| volume)
            })
            .ok_or_else(|| {
                ProvisionError::failed(
                    KRUNNER_STAGE,
                    format!("no kernel-runner volume for distro {:?}", spec.distro),
                )
            })?;
        let mut mounts = vec![Mount::volume(
            volume,
            "/opt/backend.ai",
            MountPermission::ReadOnly,
        )];
        mounts.extend(spec.plugin_mounts.iter().cloned());
        Ok(KernelRunnerMountResult { mounts })
    }

    async fn teardown(
        &self,
        _resource: Option<&KernelRunnerMountResult>,
    ) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct VFolderMountSpec {
    pub mounts: Vec<VFolderMount>,
    pub prevent_vfolder_mount: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VFolderMountResult {
    pub mounts: Vec<Mount>,
}

#[derive(Default)]
pub struct VFolderMountProvisioner;

#[async_trait]
impl Provisioner for VFolderMountProvisioner {
    type Spec = VFolderMountSpec;
    type Resource = VFolderMountResult;

    fn name(&self) -> &'static str {
        VFOLDER_STAGE
    }

    async fn setup(&self, spec: &VFolderMountSpec) -> Result<VFolderMountResult, ProvisionError> {
        let mounts = spec
            .mounts
            .iter()
            .filter(|vfolder| !spec.prevent_vfolder_mount || vfolder.name == ".logs")
            .map(|vfolder| Mount {
                mount_type: berth_core::MountType::Bind,
                source: vfolder.host_path.clone(),
                target: vfolder.kernel_path.clone(),
                permission: vfolder.mount_perm,
            })
            .collect();
        Ok(VFolderMountResult { mounts })
    }

    async fn teardown(&self, _resource: Option<&VFolderMountResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

/// Whether any assembled mount already provides the container's `.ssh`.
pub fn is_ssh_mounted(mounts: &[Mount]) -> bool {
    mounts
        .iter()
        .any(|mount| mount.target == Path::new("/home/work/.ssh"))
}

#[cfg(test)]
#[path = "mounts_tests.rs"]
mod tests;
