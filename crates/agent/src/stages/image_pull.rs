// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auto-pull policy and image pulling.
//!
//! Pulls are bounded by the configured pull timeout and report progress to
//! the manager via `image.pull-*` events.

use crate::provision::{ProvisionError, Provisioner};
use crate::runtime::ContainerRuntime;
use async_trait::async_trait;
use berth_bus::EventProducer;
use berth_core::{AgentId, AutoPullPolicy, Event, ImageRef, ImageRegistry};
use std::sync::Arc;
use std::time::Duration;

const STAGE: &str = "image-pull";

#[derive(Debug, Clone)]
pub struct ImagePullSpec {
    pub image: ImageRef,
    pub digest: String,
    pub registry: ImageRegistry,
    pub auto_pull: AutoPullPolicy,
    pub pull_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePullResult {
    pub pulled: bool,
}

pub struct ImagePullProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    events: EventProducer,
    agent_id: AgentId,
}

impl ImagePullProvisioner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        events: EventProducer,
        agent_id: AgentId,
    ) -> Self {
        Self {
            runtime,
            events,
            agent_id,
        }
    }

    async fn needs_pull(&self, spec: &ImagePullSpec) -> Result<bool, ProvisionError> {
        let local_digest = self
            .runtime
            .image_digest(&spec.image.canonical())
            .await
            .map_err(|err| ProvisionError::failed(STAGE, err.to_string()))?;
        Ok(match spec.auto_pull {
            AutoPullPolicy::Always => true,
            AutoPullPolicy::Digest => local_digest.as_deref() != Some(spec.digest.as_str()),
            AutoPullPolicy::Tag => local_digest.is_none(),
            AutoPullPolicy::None => {
                if local_digest.is_none() {
                    return Err(ProvisionError::failed(
                        STAGE,
                        format!("image {} missing locally with auto-pull disabled", spec.image.canonical()),
                    ));
                }
                false
            }
        })
    }

    async fn emit(&self, event: Event) {
        if let Err(err) = self.events.anycast(event).await {
            tracing::warn!(error = %err, "failed to emit image pull event");
        }
    }
}

#[async_trait]
impl Provisioner for ImagePullProvisioner {
    type Spec = ImagePullSpec;
    type Resource = ImagePullResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &ImagePullSpec) -> Result<ImagePullResult, ProvisionError> {
        if !self.needs_pull(spec).await? {
            return Ok(ImagePullResult { pulled: false });
        }
        self.emit(Event::ImagePullStarted {
            agent_id: self.agent_id.clone(),
            image: spec.image.clone(),
        })
        .await;
        let pull = self
            .runtime
            .pull_image(&spec.image, &spec.registry, spec.pull_timeout);
        let outcome = match spec.pull_timeout {
            Some(limit) => match tokio::time::timeout(limit, pull).await {
                Ok(outcome) => outcome.map_err(|err| ProvisionError::failed(STAGE, err.to_string())),
                Err(_) => Err(ProvisionError::timeout(
                    STAGE,
                    format!("pull of {} exceeded {limit:?}", spec.image.canonical()),
                )),
            },
            None => pull
                .await
                .map_err(|err| ProvisionError::failed(STAGE, err.to_string())),
        };
        match outcome {
            Ok(()) => {
                self.emit(Event::ImagePullFinished {
                    agent_id: self.agent_id.clone(),
                    image: spec.image.clone(),
                })
                .await;
                Ok(ImagePullResult { pulled: true })
            }
            Err(err) => {
                self.emit(Event::ImagePullFailed {
                    agent_id: self.agent_id.clone(),
                    image: spec.image.clone(),
                    msg: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    async fn teardown(&self, _resource: Option<&ImagePullResult>) -> Result<(), ProvisionError> {
        // pulled images stay; they are shared across kernels
        Ok(())
    }
}

#[cfg(test)]
#[path = "image_pull_tests.rs"]
mod tests;
