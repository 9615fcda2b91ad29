// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC surface of the agent backend.
//!
//! Decodes msgpack call arguments, dispatches to [`Backend`], and encodes
//! backend failures as wire error records so the manager can re-raise them
//! with the agent-side context attached.

use crate::backend::{Backend, BackendError};
use async_trait::async_trait;
use berth_core::{ContainerId, ImageRef, ImageRegistry, KernelCreationInfo, KernelId};
use berth_rpc::{ErrorRecord, RpcHandler};
use rmpv::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Bound on concurrent image pulls across kernel creations.
const DEFAULT_PULL_CONCURRENCY: usize = 2;

/// [`RpcHandler`] dispatching the manager's method set to the backend.
pub struct BackendRpcHandler {
    backend: Arc<Backend>,
    pull_throttle: Arc<Semaphore>,
}

impl BackendRpcHandler {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self {
            backend,
            pull_throttle: Arc::new(Semaphore::new(DEFAULT_PULL_CONCURRENCY)),
        }
    }

    fn error_record(kind: &str, err: impl std::fmt::Display) -> ErrorRecord {
        ErrorRecord {
            exc_name: kind.to_string(),
            exc_repr: format!("{kind}({err})"),
            exc_args: vec![err.to_string()],
            exc_tb: None,
        }
    }

    fn backend_record(err: BackendError) -> ErrorRecord {
        let exc_name = match &err {
            BackendError::KernelCreationFailed { .. } => "KernelCreationFailed",
            BackendError::KernelNotFound(_) => "KernelNotFound",
            BackendError::Runtime(_) => "ContainerRuntimeError",
            BackendError::Io(_) => "IOError",
        };
        // creation failures are stage-local: args lead with the underlying
        // cause name (TimeoutError, ...) so the manager classifies them as
        // src "other" rather than an agent exception
        let (exc_args, exc_tb) = match &err {
            BackendError::KernelCreationFailed { cause, .. } => (
                vec![cause.exception_name().to_string(), err.to_string()],
                Some(format!("stage: {}", cause.stage)),
            ),
            _ => (vec![err.to_string()], None),
        };
        ErrorRecord {
            exc_name: exc_name.to_string(),
            exc_repr: format!("{exc_name}({err})"),
            exc_args,
            exc_tb,
        }
    }

    fn arg<T: serde::de::DeserializeOwned>(
        args: &[Value],
        index: usize,
        method: &str,
    ) -> Result<T, ErrorRecord> {
        let value = args.get(index).cloned().ok_or_else(|| {
            Self::error_record(
                "InvalidArguments",
                format!("{method} missing argument {index}"),
            )
        })?;
        rmpv::ext::from_value(value).map_err(|err| {
            Self::error_record(
                "InvalidArguments",
                format!("{method} argument {index}: {err}"),
            )
        })
    }

    fn ok_value() -> Value {
        Value::Nil
    }
}

#[async_trait]
impl RpcHandler for BackendRpcHandler {
    async fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        _kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, ErrorRecord> {
        match method {
            "ping" => Ok(Value::from("pong")),

            "create_kernel" => {
                let info: KernelCreationInfo = Self::arg(&args, 0, method)?;
                self.backend
                    .create_kernel(&info, Some(Arc::clone(&self.pull_throttle)))
                    .await
                    .map_err(Self::backend_record)?;
                Ok(Self::ok_value())
            }

            "destroy_kernel" => {
                let kernel_id: KernelId = Self::arg(&args, 0, method)?;
                let reason: String = Self::arg(&args, 1, method)?;
                self.backend
                    .destroy_kernel(&kernel_id, reason.as_str().into())
                    .await
                    .map_err(Self::backend_record)?;
                Ok(Self::ok_value())
            }

            "clean_kernel" => {
                let kernel_id: KernelId = Self::arg(&args, 0, method)?;
                self.backend
                    .clean_kernel(&kernel_id)
                    .await
                    .map_err(Self::backend_record)?;
                Ok(Self::ok_value())
            }

            "restart_kernel" => {
                let kernel_id: KernelId = Self::arg(&args, 0, method)?;
                let container_id = self
                    .backend
                    .restart_kernel(&kernel_id)
                    .await
                    .map_err(Self::backend_record)?;
                Ok(Value::from(container_id.as_str()))
            }

            "get_managed_containers" => {
                let containers = self
                    .backend
                    .get_managed_containers(None)
                    .await
                    .map_err(Self::backend_record)?;
                rmpv::ext::to_value(&containers)
                    .map_err(|err| Self::error_record("EncodingError", err))
            }

            "get_container_logs" => {
                let container_id: ContainerId = Self::arg(&args, 0, method)?;
                let logs = self
                    .backend
                    .get_container_logs(&container_id)
                    .await
                    .map_err(Self::backend_record)?;
                rmpv::ext::to_value(&logs)
                    .map_err(|err| Self::error_record("EncodingError", err))
            }

            "get_cgroup_info" => {
                let container_id: ContainerId = Self::arg(&args, 0, method)?;
                let controller: String = Self::arg(&args, 1, method)?;
                let info = self.backend.get_cgroup_info(&container_id, &controller);
                Ok(Value::Map(vec![
                    (
                        Value::from("path"),
                        Value::from(info.path.to_string_lossy().as_ref()),
                    ),
                    (Value::from("version"), Value::from(info.version)),
                ]))
            }

            "pull_image" => {
                let image: ImageRef = Self::arg(&args, 0, method)?;
                let registry: ImageRegistry = Self::arg(&args, 1, method)?;
                let timeout_sec: Option<u64> = Self::arg(&args, 2, method).unwrap_or(None);
                self.backend
                    .pull_image(&image, &registry, timeout_sec.map(Duration::from_secs))
                    .await
                    .map_err(Self::backend_record)?;
                Ok(Self::ok_value())
            }

            "push_image" => {
                let image: ImageRef = Self::arg(&args, 0, method)?;
                let registry: ImageRegistry = Self::arg(&args, 1, method)?;
                let timeout_sec: Option<u64> = Self::arg(&args, 2, method).unwrap_or(None);
                self.backend
                    .push_image(&image, &registry, timeout_sec.map(Duration::from_secs))
                    .await
                    .map_err(Self::backend_record)?;
                Ok(Self::ok_value())
            }

            other => Err(Self::error_record(
                "NotImplementedError",
                format!("unknown method {other:?}"),
            )),
        }
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
