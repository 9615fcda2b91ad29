// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The composite kernel-creation pipeline.
//!
//! Runs the substages in their strict order, wiring each stage's result into
//! the specs of the stages after it. On any failure every stage that ran is
//! torn down in reverse order before the error propagates. Stages are
//! sequential within one kernel; parallelism happens across kernels.

use crate::config::AgentConfig;
use crate::provision::{ProvisionError, ProvisionStage};
use crate::registry::{KernelObject, KernelRegistry};
use crate::resources::{AffinityMap, AffinityPolicy, ComputePlugin, KernelResourceSpec};
use crate::runtime::ContainerRuntime;
use crate::stages::{
    bootstrap::{BootstrapProvisioner, BootstrapSpec},
    cluster_ssh::{ClusterSshProvisioner, ClusterSshSpec},
    cmdarg::{CmdArgProvisioner, CmdArgSpec},
    config_file::{ConfigFileProvisioner, ConfigFileSpec},
    container::{
        ContainerCheckProvisioner, ContainerCheckSpec, ContainerConfigProvisioner,
        ContainerConfigSpec, ContainerCreateProvisioner, ContainerCreateSpec,
        ContainerStartProvisioner, ContainerStartSpec,
    },
    container_ssh::{ContainerSshProvisioner, ContainerSshSpec},
    credentials::{CredentialsProvisioner, CredentialsSpec},
    dotfiles::{DotfilesProvisioner, DotfilesSpec},
    environ::{EnvironProvisioner, EnvironSpec},
    image_meta::{DistroCache, DistroProber, ImageMetaProvisioner, ImageMetaSpec, LABEL_SERVICE_PORTS},
    image_pull::{ImagePullProvisioner, ImagePullSpec},
    kernel_object::{KernelObjectProvisioner, KernelObjectSpec},
    mounts::{
        is_ssh_mounted, IntrinsicMountProvisioner, IntrinsicMountSpec, KernelRunnerMountProvisioner,
        KernelRunnerMountSpec, VFolderMountProvisioner, VFolderMountSpec,
    },
    network::{
        NetworkPlugin, NetworkPostSetupProvisioner, NetworkPostSpec, NetworkPreSetupProvisioner,
        NetworkPreSpec,
    },
    resource::{ResourceProvisioner, ResourceSpec},
    scratch::{
        ScratchCreateProvisioner, ScratchCreateSpec, ScratchPathProvisioner, ScratchPathResult,
        ScratchPathSpec,
    },
    service_port::{ServicePortProvisioner, ServicePortSpec},
    ContainerOwnership,
};
use berth_bus::EventProducer;
use berth_core::{
    AgentId, ContainerId, Event, KernelCreationInfo, LifecycleReason, ServicePort, SlotName,
};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Shared dependencies of every kernel creation on this agent.
#[derive(Clone)]
pub struct KernelCreationContext {
    pub config: Arc<AgentConfig>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub registry: KernelRegistry,
    pub events: EventProducer,
    pub compute_plugins: IndexMap<SlotName, Arc<dyn ComputePlugin>>,
    pub network_plugins: IndexMap<String, Arc<dyn NetworkPlugin>>,
    pub distro_cache: Arc<dyn DistroCache>,
    pub distro_prober: Arc<dyn DistroProber>,
    pub resource_lock: Arc<tokio::sync::Mutex<()>>,
    pub affinity_map: AffinityMap,
    pub gwbridge_subnet: Option<String>,
    pub agent_sock_path: Option<PathBuf>,
}

impl KernelCreationContext {
    fn agent_id(&self) -> AgentId {
        self.config.agent.id.clone()
    }

    fn affinity_policy(&self) -> AffinityPolicy {
        match self.config.resource.affinity_policy {
            crate::config::AffinityPolicyConfig::Preferred => AffinityPolicy::Preferred,
            crate::config::AffinityPolicyConfig::Interleaved => AffinityPolicy::Interleaved,
        }
    }
}

/// Everything the backend needs from a finished creation.
#[derive(Clone, Debug)]
pub struct KernelCreationResult {
    pub kernel: KernelObject,
    pub container_id: ContainerId,
    pub kernel_host: String,
    pub repl_in_port: u16,
    pub repl_out_port: u16,
    pub service_ports: Vec<ServicePort>,
    pub scratch: ScratchPathResult,
    pub resource_spec: KernelResourceSpec,
}

struct KernelLifecycleStages {
    image_meta: ProvisionStage<ImageMetaProvisioner>,
    scratch_path: ProvisionStage<ScratchPathProvisioner>,
    resource: ProvisionStage<ResourceProvisioner>,
    intrinsic_mount: ProvisionStage<IntrinsicMountProvisioner>,
    environ: ProvisionStage<EnvironProvisioner>,
    image_pull: ProvisionStage<ImagePullProvisioner>,
    scratch_create: ProvisionStage<ScratchCreateProvisioner>,
    cluster_ssh: ProvisionStage<ClusterSshProvisioner>,
    vfolder_mount: ProvisionStage<VFolderMountProvisioner>,
    krunner_mount: ProvisionStage<KernelRunnerMountProvisioner>,
    service_port: ProvisionStage<ServicePortProvisioner>,
    cmdarg: ProvisionStage<CmdArgProvisioner>,
    bootstrap: ProvisionStage<BootstrapProvisioner>,
    config_file: ProvisionStage<ConfigFileProvisioner>,
    credentials: ProvisionStage<CredentialsProvisioner>,
    container_ssh: ProvisionStage<ContainerSshProvisioner>,
    dotfiles: ProvisionStage<DotfilesProvisioner>,
    network_pre: ProvisionStage<NetworkPreSetupProvisioner>,
    container_config: ProvisionStage<ContainerConfigProvisioner>,
    container_create: ProvisionStage<ContainerCreateProvisioner>,
    container_start: ProvisionStage<ContainerStartProvisioner>,
    network_post: ProvisionStage<NetworkPostSetupProvisioner>,
    kernel_object: ProvisionStage<KernelObjectProvisioner>,
    container_check: ProvisionStage<ContainerCheckProvisioner>,
}

/// One kernel creation: a provisioner over the whole substage sequence.
pub struct KernelCreationStage {
    ctx: KernelCreationContext,
    stages: KernelLifecycleStages,
}

impl KernelCreationStage {
    pub fn new(ctx: KernelCreationContext) -> Self {
        let stages = KernelLifecycleStages {
            image_meta: ProvisionStage::new(ImageMetaProvisioner::new(
                Arc::clone(&ctx.distro_cache),
                Arc::clone(&ctx.distro_prober),
            )),
            scratch_path: ProvisionStage::new(ScratchPathProvisioner),
            resource: ProvisionStage::new(ResourceProvisioner::new(
                ctx.compute_plugins.clone(),
                Arc::clone(&ctx.resource_lock),
                Duration::from_secs(ctx.config.agent.lock_conn_timeout_sec),
            )),
            intrinsic_mount: ProvisionStage::new(IntrinsicMountProvisioner),
            environ: ProvisionStage::new(EnvironProvisioner),
            image_pull: ProvisionStage::new(ImagePullProvisioner::new(
                Arc::clone(&ctx.runtime),
                ctx.events.clone(),
                ctx.agent_id(),
            )),
            scratch_create: ProvisionStage::new(ScratchCreateProvisioner),
            cluster_ssh: ProvisionStage::new(ClusterSshProvisioner),
            vfolder_mount: ProvisionStage::new(VFolderMountProvisioner),
            krunner_mount: ProvisionStage::new(KernelRunnerMountProvisioner),
            service_port: ProvisionStage::new(ServicePortProvisioner),
            cmdarg: ProvisionStage::new(CmdArgProvisioner),
            bootstrap: ProvisionStage::new(BootstrapProvisioner),
            config_file: ProvisionStage::new(ConfigFileProvisioner),
            credentials: ProvisionStage::new(CredentialsProvisioner),
            container_ssh: ProvisionStage::new(ContainerSshProvisioner),
            dotfiles: ProvisionStage::new(DotfilesProvisioner),
            network_pre: ProvisionStage::new(NetworkPreSetupProvisioner),
            container_config: ProvisionStage::new(ContainerConfigProvisioner),
            container_create: ProvisionStage::new(ContainerCreateProvisioner::new(Arc::clone(
                &ctx.runtime,
            ))),
            container_start: ProvisionStage::new(ContainerStartProvisioner::new(Arc::clone(
                &ctx.runtime,
            ))),
            network_post: ProvisionStage::new(NetworkPostSetupProvisioner::new(Arc::clone(
                &ctx.runtime,
            ))),
            kernel_object: ProvisionStage::new(KernelObjectProvisioner::new(ctx.registry.clone())),
            container_check: ProvisionStage::new(ContainerCheckProvisioner::new(Arc::clone(
                &ctx.runtime,
            ))),
        };
        Self { ctx, stages }
    }

    /// Run all substages; on failure, tear down whatever ran, in reverse.
    pub async fn setup(
        &self,
        info: &KernelCreationInfo,
        throttle_sema: Option<Arc<Semaphore>>,
    ) -> Result<KernelCreationResult, ProvisionError> {
        match self.run(info, throttle_sema).await {
            Ok(result) => Ok(result),
            Err(err) => {
                tracing::warn!(
                    kernel_id = %info.kernel_id(),
                    stage = err.stage,
                    error = %err,
                    "kernel creation failed, tearing down"
                );
                self.teardown().await;
                Err(err)
            }
        }
    }

    /// Tear down every stage in reverse order. Stages that never ran are
    /// skipped; teardown failures are logged, not propagated.
    pub async fn teardown(&self) {
        macro_rules! teardown_stage {
            ($stage:expr) => {
                if let Err(err) = $stage.teardown().await {
                    tracing::warn!(stage = err.stage, error = %err, "teardown failure");
                }
            };
        }
        teardown_stage!(self.stages.container_check);
        teardown_stage!(self.stages.kernel_object);
        teardown_stage!(self.stages.network_post);
        teardown_stage!(self.stages.container_start);
        teardown_stage!(self.stages.container_create);
        teardown_stage!(self.stages.container_config);
        teardown_stage!(self.stages.network_pre);
        teardown_stage!(self.stages.dotfiles);
        teardown_stage!(self.stages.container_ssh);
        teardown_stage!(self.stages.credentials);
        teardown_stage!(self.stages.config_file);
        teardown_stage!(self.stages.bootstrap);
        teardown_stage!(self.stages.cmdarg);
        teardown_stage!(self.stages.service_port);
        teardown_stage!(self.stages.krunner_mount);
        teardown_stage!(self.stages.vfolder_mount);
        teardown_stage!(self.stages.cluster_ssh);
        teardown_stage!(self.stages.scratch_create);
        teardown_stage!(self.stages.image_pull);
        teardown_stage!(self.stages.environ);
        teardown_stage!(self.stages.intrinsic_mount);
        teardown_stage!(self.stages.resource);
        teardown_stage!(self.stages.scratch_path);
        teardown_stage!(self.stages.image_meta);
    }

    async fn emit(&self, event: Event) {
        if let Err(err) = self.ctx.events.produce(event).await {
            tracing::warn!(error = %err, "lifecycle event emission failed");
        }
    }

    fn ownership(&self, info: &KernelCreationInfo) -> ContainerOwnership {
        ContainerOwnership {
            uid_override: info.uid_override,
            gid_override: info.gid_override,
            kernel_uid: self.ctx.config.container.kernel_uid,
            kernel_gid: self.ctx.config.container.kernel_gid,
        }
    }

    fn resource_environ(resource_spec: &KernelResourceSpec) -> IndexMap<String, String> {
        let mut environ = IndexMap::new();
        for allocation in &resource_spec.allocations {
            if allocation.device_ids.is_empty() {
                continue;
            }
            let prefix = allocation
                .slot
                .as_str()
                .split('.')
                .next()
                .unwrap_or("device")
                .to_uppercase();
            environ.insert(
                format!("{prefix}_VISIBLE_DEVICES"),
                allocation.device_ids.join(","),
            );
        }
        environ
    }

    async fn run(
        &self,
        info: &KernelCreationInfo,
        throttle_sema: Option<Arc<Semaphore>>,
    ) -> Result<KernelCreationResult, ProvisionError> {
        let config = &self.ctx.config;
        let ownership = self.ownership(info);
        let kernel_id = info.kernel_id().clone();
        let session_id = info.session_id().clone();

        self.emit(Event::KernelPreparing {
            kernel_id: kernel_id.clone(),
            session_id: session_id.clone(),
            reason: LifecycleReason::Other("preparing".to_string()),
        })
        .await;

        self.stages
            .image_meta
            .setup(&ImageMetaSpec {
                labels: info.image_labels.clone(),
                digest: info.image_digest.clone(),
                canonical: info.image.canonical(),
            })
            .await?;
        let image_meta = self.stages.image_meta.wait_for_resource().await?;

        self.stages
            .scratch_path
            .setup(&ScratchPathSpec {
                kernel_id: kernel_id.clone(),
                scratch_type: config.container.scratch_type,
                scratch_root: config.container.scratch_root.clone(),
            })
            .await?;
        let scratch = self.stages.scratch_path.wait_for_resource().await?;

        self.stages
            .resource
            .setup(&ResourceSpec {
                requested_slots: info.resource_slots.clone(),
                allocation_order: info.resource_slots.keys().cloned().collect(),
                affinity_map: self.ctx.affinity_map.clone(),
                affinity_policy: self.ctx.affinity_policy(),
            })
            .await?;
        let resource_spec = self.stages.resource.wait_for_resource().await?;

        self.stages
            .intrinsic_mount
            .setup(&IntrinsicMountSpec {
                config_dir: scratch.config_dir.clone(),
                work_dir: scratch.work_dir.clone(),
                tmp_dir: scratch.tmp_dir.clone(),
                scratch_type: scratch.scratch_type,
                agent_sock_path: self.ctx.agent_sock_path.clone(),
                ipc_base_path: config.agent.ipc_base_path.clone(),
                coredump_enabled: config.debug.coredump.enabled,
                coredump_path: config.debug.coredump.path.clone(),
                coredump_core_path: config.debug.coredump.core_path.clone(),
                domain_socket_targets: Vec::new(),
                ownership,
            })
            .await?;
        let intrinsic = self.stages.intrinsic_mount.wait_for_resource().await?;

        self.stages
            .environ
            .setup(&EnvironSpec {
                architecture: info.image.architecture.clone(),
                distro: image_meta.distro.clone(),
                kernel_uid: ownership.uid(),
                kernel_gid: ownership.gid(),
                base_environ: IndexMap::new(),
                resource_environ: Self::resource_environ(&resource_spec),
                user_environ: info.environ.clone(),
                cluster: info.cluster.clone(),
            })
            .await?;
        let environ = self.stages.environ.wait_for_resource().await?;

        self.emit(Event::KernelPulling {
            kernel_id: kernel_id.clone(),
            session_id: session_id.clone(),
            reason: LifecycleReason::Other("checking-image".to_string()),
        })
        .await;
        {
            // the throttle bounds concurrent pulls only; other stages run free
            let _permit = match &throttle_sema {
                Some(sema) => Some(sema.clone().acquire_owned().await.map_err(|_| {
                    ProvisionError::failed("image-pull", "pull throttle closed")
                })?),
                None => None,
            };
            self.stages
                .image_pull
                .setup(&ImagePullSpec {
                    image: info.image.clone(),
                    digest: info.image_digest.clone(),
                    registry: info.image_registry.clone(),
                    auto_pull: info.auto_pull,
                    pull_timeout: config.api.pull_timeout_sec.map(Duration::from_secs),
                })
                .await?;
        }

        self.stages
            .scratch_create
            .setup(&ScratchCreateSpec {
                paths: scratch.clone(),
                scratch_size: config.container.scratch_size,
                ownership,
            })
            .await?;

        self.stages
            .cluster_ssh
            .setup(&ClusterSshSpec {
                config_dir: scratch.config_dir.clone(),
                ssh_keypair: info.cluster.ssh_keypair.clone(),
                port_mapping: info.cluster.ssh_port_mapping.clone(),
                ownership,
            })
            .await?;

        self.stages
            .vfolder_mount
            .setup(&VFolderMountSpec {
                mounts: info.vfolder_mounts.clone(),
                prevent_vfolder_mount: info.prevent_vfolder_mount,
            })
            .await?;
        let vfolder = self.stages.vfolder_mount.wait_for_resource().await?;

        let plugin_mounts = self
            .ctx
            .compute_plugins
            .values()
            .flat_map(|plugin| plugin.mounts())
            .collect();
        self.stages
            .krunner_mount
            .setup(&KernelRunnerMountSpec {
                distro: image_meta.distro.clone(),
                krunner_volumes: config.container.krunner_volumes.clone(),
                plugin_mounts,
            })
            .await?;
        let krunner = self.stages.krunner_mount.wait_for_resource().await?;

        self.stages
            .service_port
            .setup(&ServicePortSpec {
                label: info.image_labels.get(LABEL_SERVICE_PORTS).cloned(),
                preopen_ports: info.preopen_ports.clone(),
                cluster_size: info.cluster.size,
                cluster_ssh_port_mapping: info.cluster.ssh_port_mapping.clone(),
                allocated_host_ports: info.allocated_host_ports.clone(),
                block_service_ports: info.block_service_ports,
                bind_host: config.container.bind_host.clone(),
            })
            .await?;
        let service_port = self.stages.service_port.wait_for_resource().await?;

        self.stages
            .cmdarg
            .setup(&CmdArgSpec {
                runtime_type: image_meta.runtime_type.clone(),
                runtime_path: image_meta.runtime_path.clone(),
                sandbox_type: config.container.sandbox_type,
                jail_args: config.container.jail_args.clone(),
                debug_kernel_runner: config.debug.kernel_runner,
            })
            .await?;
        let cmdarg = self.stages.cmdarg.wait_for_resource().await?;

        self.stages
            .bootstrap
            .setup(&BootstrapSpec {
                work_dir: scratch.work_dir.clone(),
                bootstrap_script: info.bootstrap_script.clone(),
                ownership,
            })
            .await?;

        self.stages
            .config_file
            .setup(&ConfigFileSpec {
                config_dir: scratch.config_dir.clone(),
                environ: environ.environ.clone(),
                resource_spec: resource_spec.clone(),
                creation_info: info.clone(),
            })
            .await?;

        self.stages
            .credentials
            .setup(&CredentialsSpec {
                config_dir: scratch.config_dir.clone(),
                docker_credentials: info.docker_credentials.clone(),
                ownership,
            })
            .await?;

        let ssh_already_mounted = is_ssh_mounted(&vfolder.mounts)
            || is_ssh_mounted(&krunner.mounts)
            || is_ssh_mounted(&intrinsic.mounts);
        self.stages
            .container_ssh
            .setup(&ContainerSshSpec {
                work_dir: scratch.work_dir.clone(),
                ssh_keypair: info.container_ssh_keypair.clone(),
                cluster_public_key: info
                    .cluster
                    .ssh_keypair
                    .as_ref()
                    .map(|keypair| keypair.public_key.clone()),
                ssh_already_mounted,
                ownership,
            })
            .await?;

        self.stages
            .dotfiles
            .setup(&DotfilesSpec {
                work_dir: scratch.work_dir.clone(),
                dotfiles: info.dotfiles.clone(),
                ownership,
            })
            .await?;

        self.stages
            .network_pre
            .setup(&NetworkPreSpec {
                info: info.clone(),
                network_mode: info.cluster.network_mode.clone(),
                network_name: info.cluster.network_id.as_ref().map(|id| id.to_string()),
                alternative_bridge: config.container.alternative_bridge.clone(),
                plugins: self.ctx.network_plugins.clone(),
                gwbridge_subnet: self.ctx.gwbridge_subnet.clone(),
            })
            .await?;
        let network_pre = self.stages.network_pre.wait_for_resource().await?;

        self.emit(Event::KernelCreating {
            kernel_id: kernel_id.clone(),
            session_id: session_id.clone(),
            reason: LifecycleReason::Other("creating-container".to_string()),
        })
        .await;

        let mut mounts = intrinsic.mounts.clone();
        mounts.extend(krunner.mounts.iter().cloned());
        mounts.extend(vfolder.mounts.iter().cloned());
        self.stages
            .container_config
            .setup(&ContainerConfigSpec {
                kernel_id: kernel_id.clone(),
                image: info.image.clone(),
                image_labels: info.image_labels.clone(),
                environ: environ.environ.clone(),
                cmdargs: cmdarg.cmdargs.clone(),
                mounts,
                port_mappings: service_port.port_mappings.clone(),
                cluster_hostname: info.cluster.hostname.clone(),
                container_log_max_length: config.container_logs.max_length,
                resource_args: resource_spec.container_args.clone(),
                network_args: network_pre.container_args.clone(),
                kernel_uid: ownership.uid(),
                kernel_gid: ownership.gid(),
                supplementary_gids: info.supplementary_gids.clone(),
            })
            .await?;
        let container_config = self.stages.container_config.wait_for_resource().await?;

        self.stages
            .container_create
            .setup(&ContainerCreateSpec {
                config: container_config.config.clone(),
                container_name: container_config.container_name.clone(),
            })
            .await?;
        let created = self.stages.container_create.wait_for_resource().await?;

        self.stages
            .container_start
            .setup(&ContainerStartSpec {
                container_id: created.container_id.clone(),
                config_dir: scratch.config_dir.clone(),
            })
            .await?;

        self.stages
            .network_post
            .setup(&NetworkPostSpec {
                container_id: created.container_id.clone(),
                plugin: network_pre.plugin.clone(),
                bind_host: config.container.bind_host.clone(),
                advertised_host: config.container.advertised_host.clone(),
                service_ports: service_port.service_ports.clone(),
                port_mappings: service_port.port_mappings.clone(),
                additional_networks: Vec::new(),
            })
            .await?;
        let network_post = self.stages.network_post.wait_for_resource().await?;

        self.stages
            .kernel_object
            .setup(&KernelObjectSpec {
                kernel_id: kernel_id.clone(),
                session_id: session_id.clone(),
                image: info.image.clone(),
                container_id: created.container_id.clone(),
                network_id: info.cluster.network_id.clone(),
                network_mode: network_pre.mode.clone(),
                kernel_host: network_post.kernel_host.clone(),
                repl_in_port: network_post.repl_in_port,
                repl_out_port: network_post.repl_out_port,
                service_ports: network_post.service_ports.clone(),
                resource_spec: resource_spec.clone(),
                environ: environ.environ.clone(),
                scratch_dir: scratch.scratch_dir.clone(),
                container_config: container_config.config.clone(),
                container_name: container_config.container_name.clone(),
            })
            .await?;
        let kernel_object = self.stages.kernel_object.wait_for_resource().await?;

        self.stages
            .container_check
            .setup(&ContainerCheckSpec {
                container_id: created.container_id.clone(),
                service_ports: network_post.service_ports.clone(),
                init_polling_attempt: config.kernel_lifecycles.init_polling_attempt,
                init_polling_timeout: Duration::from_secs(
                    config.kernel_lifecycles.init_polling_timeout_sec,
                ),
                init_timeout: Duration::from_secs(config.kernel_lifecycles.init_timeout_sec),
            })
            .await?;

        Ok(KernelCreationResult {
            kernel: kernel_object.kernel,
            container_id: created.container_id.clone(),
            kernel_host: network_post.kernel_host.clone(),
            repl_in_port: network_post.repl_in_port,
            repl_out_port: network_post.repl_out_port,
            service_ports: network_post.service_ports,
            scratch,
            resource_spec,
        })
    }
}

#[cfg(test)]
#[path = "creation_tests.rs"]
mod tests;
