//! Shared harness: a manager wired to in-process agents.

use berth_agent::{
    AgentConfig, Backend, BackendError, FakeRuntime, KernelCreationContext, KernelRegistry,
};
use berth_bus::{EventBus, EventDispatcher, EventProducer};
use berth_core::{
    AgentHeartbeatInfo, AgentId, ClusterMode, ClusterRole, ImageRef, KernelCreationInfo, KernelId,
    LifecycleReason, ResourceSlot, SessionId, SessionType, SlotName, SystemClock,
};
use berth_manager::{
    handlers::register_lifecycle_handlers, AgentClient, AgentRegistry, EnqueueRequest,
    KernelEnqueueSpec, ManagerConfig, ScheduleCoordinator,
};
use berth_rpc::CallError;
use berth_storage::StateStore;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_IMAGE: &str = "cr.backend.ai/stable/python:3.9-ubuntu22.04";
pub const TEST_DIGEST: &str = "sha256:49f21bdc";

pub fn slots(pairs: &[(&str, i64)]) -> ResourceSlot {
    ResourceSlot::from_pairs(pairs.iter().map(|(k, v)| (*k, Decimal::from(*v))))
}

pub fn test_image() -> ImageRef {
    ImageRef::new("cr.backend.ai", "stable", "python", "3.9-ubuntu22.04", "x86_64")
}

/// One in-process agent: a full backend over the fake runtime.
pub struct TestAgent {
    pub id: AgentId,
    pub backend: Arc<Backend>,
    pub runtime: FakeRuntime,
    pub cpu_capacity: i64,
    pub mem_capacity: i64,
    _scratch: tempfile::TempDir,
}

impl TestAgent {
    pub fn new(id: &str, events: EventProducer, cpu: i64, mem: i64) -> Self {
        let runtime = FakeRuntime::new();
        runtime.seed_image(TEST_IMAGE, TEST_DIGEST);
        let scratch = tempfile::tempdir().expect("scratch tempdir");

        let mut config = AgentConfig::default();
        config.agent.id = AgentId::new(id);
        config.container.scratch_root = scratch.path().to_path_buf();
        config
            .container
            .krunner_volumes
            .insert("ubuntu".to_string(), "krunner-ubuntu".to_string());
        config.kernel_lifecycles.init_polling_timeout_sec = 1;
        config.kernel_lifecycles.init_timeout_sec = 5;
        config.api.pull_timeout_sec = Some(1);

        let mut compute_plugins: IndexMap<SlotName, Arc<dyn berth_agent::ComputePlugin>> =
            IndexMap::new();
        compute_plugins.insert(
            SlotName::new("cpu"),
            Arc::new(berth_agent::CpuPlugin::new(Decimal::from(cpu))),
        );
        compute_plugins.insert(
            SlotName::new("mem"),
            Arc::new(berth_agent::MemPlugin::new(Decimal::from(mem))),
        );

        let ctx = KernelCreationContext {
            config: Arc::new(config),
            runtime: Arc::new(runtime.clone()),
            registry: KernelRegistry::new(),
            events,
            compute_plugins,
            network_plugins: IndexMap::new(),
            distro_cache: Arc::new(berth_agent::stages::image_meta::MemoryDistroCache::default()),
            distro_prober: Arc::new(berth_agent::RuntimeDistroProber::new(Arc::new(
                runtime.clone(),
            ))),
            resource_lock: Arc::new(tokio::sync::Mutex::new(())),
            affinity_map: berth_agent::AffinityMap::default(),
            gwbridge_subnet: None,
            agent_sock_path: None,
        };
        Self {
            id: AgentId::new(id),
            backend: Arc::new(Backend::new(ctx)),
            runtime,
            cpu_capacity: cpu,
            mem_capacity: mem,
            _scratch: scratch,
        }
    }

    pub fn cpu_free(&self) -> Decimal {
        self.backend.context().compute_plugins[&SlotName::new("cpu")].free()
    }

    pub fn heartbeat_info(&self) -> AgentHeartbeatInfo {
        AgentHeartbeatInfo {
            addr: format!("{}:6011", self.id),
            public_key: None,
            architecture: "x86_64".to_string(),
            scaling_group: "default".to_string(),
            available_slots: slots(&[
                ("cpu", self.cpu_capacity),
                ("mem", self.mem_capacity),
            ]),
            container_count: 0,
            schedulable: true,
        }
    }
}

/// Routes manager calls straight into in-process agent backends.
#[derive(Default)]
pub struct InProcessAgentClient {
    backends: Mutex<IndexMap<AgentId, Arc<Backend>>>,
}

impl InProcessAgentClient {
    pub fn attach(&self, agent_id: AgentId, backend: Arc<Backend>) {
        self.backends.lock().insert(agent_id, backend);
    }

    fn backend(&self, agent_id: &AgentId) -> Result<Arc<Backend>, CallError> {
        self.backends
            .lock()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| {
                CallError::Rpc(berth_rpc::RpcError {
                    agent_id: agent_id.clone(),
                    addr: String::new(),
                    detail: "agent not attached".to_string(),
                })
            })
    }

    /// Same error encoding as the agent's wire handler: creation failures
    /// lead their args with the inner cause name and carry the stage.
    fn agent_error(agent_id: &AgentId, err: BackendError) -> CallError {
        let exc_name = match &err {
            BackendError::KernelCreationFailed { .. } => "KernelCreationFailed",
            BackendError::KernelNotFound(_) => "KernelNotFound",
            BackendError::Runtime(_) => "ContainerRuntimeError",
            BackendError::Io(_) => "IOError",
        };
        let (exc_args, exc_tb) = match &err {
            BackendError::KernelCreationFailed { cause, .. } => (
                vec![cause.exception_name().to_string(), err.to_string()],
                Some(format!("stage: {}", cause.stage)),
            ),
            _ => (vec![err.to_string()], None),
        };
        CallError::Agent(berth_rpc::AgentError {
            agent_id: agent_id.clone(),
            exc_name: exc_name.to_string(),
            exc_repr: format!("{exc_name}({err})"),
            exc_args,
            exc_tb,
        })
    }
}

#[async_trait::async_trait]
impl AgentClient for InProcessAgentClient {
    async fn ping(&self, agent_id: &AgentId) -> Result<(), CallError> {
        self.backend(agent_id).map(|_| ())
    }

    async fn create_kernel(
        &self,
        agent_id: &AgentId,
        info: &KernelCreationInfo,
    ) -> Result<(), CallError> {
        let backend = self.backend(agent_id)?;
        backend
            .create_kernel(info, None)
            .await
            .map(|_| ())
            .map_err(|err| Self::agent_error(agent_id, err))
    }

    async fn destroy_kernel(
        &self,
        agent_id: &AgentId,
        kernel_id: &KernelId,
        reason: &LifecycleReason,
    ) -> Result<(), CallError> {
        let backend = self.backend(agent_id)?;
        backend
            .destroy_kernel(kernel_id, reason.clone())
            .await
            .map_err(|err| Self::agent_error(agent_id, err))
    }

    async fn clean_kernel(
        &self,
        agent_id: &AgentId,
        kernel_id: &KernelId,
    ) -> Result<(), CallError> {
        let backend = self.backend(agent_id)?;
        backend
            .clean_kernel(kernel_id)
            .await
            .map_err(|err| Self::agent_error(agent_id, err))
    }

    async fn restart_kernel(
        &self,
        agent_id: &AgentId,
        kernel_id: &KernelId,
    ) -> Result<(), CallError> {
        let backend = self.backend(agent_id)?;
        backend
            .restart_kernel(kernel_id)
            .await
            .map(|_| ())
            .map_err(|err| Self::agent_error(agent_id, err))
    }

    async fn get_container_logs(
        &self,
        agent_id: &AgentId,
        container_id: &berth_core::ContainerId,
    ) -> Result<Vec<String>, CallError> {
        let backend = self.backend(agent_id)?;
        backend
            .get_container_logs(container_id)
            .await
            .map_err(|err| Self::agent_error(agent_id, err))
    }
}

/// A full in-process cluster: manager plus any number of agents.
pub struct TestCluster {
    pub store: StateStore,
    pub producer: EventProducer,
    pub registry: Arc<AgentRegistry<SystemClock>>,
    pub coordinator: Arc<ScheduleCoordinator<SystemClock>>,
    pub client: Arc<InProcessAgentClient>,
    pub agents: Vec<TestAgent>,
    _dispatcher: EventDispatcher,
}

impl TestCluster {
    pub async fn new(config: ManagerConfig, agent_specs: &[(&str, i64, i64)]) -> Self {
        let store = StateStore::new();
        let (producer, dispatcher) = EventBus::new("manager");
        let client = Arc::new(InProcessAgentClient::default());

        let registry = Arc::new(AgentRegistry::new(
            store.clone(),
            producer.clone(),
            Arc::clone(&client) as Arc<dyn AgentClient>,
            None,
            SystemClock,
        ));
        let coordinator = Arc::new(ScheduleCoordinator::new(
            store.clone(),
            producer.clone(),
            config.scheduler.clone(),
            SystemClock,
        ));
        register_lifecycle_handlers(&dispatcher, Arc::clone(&registry));

        let mut agents = Vec::new();
        for (id, cpu, mem) in agent_specs {
            let agent = TestAgent::new(id, producer.clone(), *cpu, *mem);
            client.attach(agent.id.clone(), Arc::clone(&agent.backend));
            registry
                .handle_heartbeat(&agent.id, &agent.heartbeat_info())
                .await
                .expect("heartbeat");
            agents.push(agent);
        }

        Self {
            store,
            producer,
            registry,
            coordinator,
            client,
            agents,
            _dispatcher: dispatcher,
        }
    }

    pub fn enqueue_request(
        &self,
        session_id: &str,
        access_key: &str,
        kernel_slots: &[(&str, i64)],
        kernel_count: u32,
        cluster_mode: ClusterMode,
    ) -> EnqueueRequest {
        let kernels = (0..kernel_count)
            .map(|idx| {
                let kernel_id = format!("{session_id}-k{idx}");
                let mut template =
                    berth_core::test_support::sample_creation_info(&kernel_id, session_id);
                template.resource_slots = slots(kernel_slots);
                template.allocated_host_ports =
                    (0..8).map(|n| 31000 + (idx as u16) * 16 + n).collect();
                KernelEnqueueSpec {
                    kernel_id: KernelId::new(kernel_id),
                    image: test_image(),
                    requested_slots: slots(kernel_slots),
                    cluster_role: if idx == 0 {
                        ClusterRole::Main
                    } else {
                        ClusterRole::Worker
                    },
                    cluster_idx: idx,
                    creation_template: template,
                }
            })
            .collect();
        EnqueueRequest {
            session_id: SessionId::new(session_id),
            name: format!("sess-{session_id}"),
            session_type: SessionType::Interactive,
            priority: 0,
            cluster_mode,
            domain_name: "default".to_string(),
            group_id: "g-1".to_string(),
            user_uuid: "u-1".to_string(),
            access_key: access_key.to_string(),
            scaling_group: "default".to_string(),
            vfolder_mounts: vec![],
            designated_agent: None,
            kernels,
        }
    }

    /// Block until `check` holds over the store (or panic after ~5s).
    pub async fn wait_for<F: Fn(&berth_storage::StoreData) -> bool>(&self, what: &str, check: F) {
        for _ in 0..1000 {
            if self.store.read(|data| check(data)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self._dispatcher
    }

    pub fn session_status(&self, session_id: &str) -> berth_core::SessionStatus {
        self.store
            .read(|data| data.sessions[&SessionId::new(session_id)].status)
    }

    pub fn kernel_status(&self, kernel_id: &str) -> berth_core::KernelStatus {
        self.store
            .read(|data| data.kernels[&KernelId::new(kernel_id)].status)
    }
}

/// Record the arrival order of selected events in a separate consumer group.
pub fn record_events(dispatcher: &EventDispatcher, names: &[&str]) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for name in names {
        let seen = Arc::clone(&seen);
        dispatcher.consume("spec-recorder", name, move |envelope| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(envelope.name);
            }
        });
    }
    seen
}
