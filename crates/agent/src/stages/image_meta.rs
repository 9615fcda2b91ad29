// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Image metadata resolution.
//!
//! Runtime type/path and kernel features come from image labels. The distro
//! is labelled on well-formed images; otherwise a shared cache keyed by image
//! digest is consulted, and on a miss a one-shot probe container runs
//! `ldd --version` and the glibc version is mapped to a distro codename.

use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const STAGE: &str = "image-metadata";

pub const LABEL_RUNTIME_TYPE: &str = "ai.backend.runtime-type";
pub const LABEL_RUNTIME_PATH: &str = "ai.backend.runtime-path";
pub const LABEL_BASE_DISTRO: &str = "ai.backend.base-distro";
pub const LABEL_FEATURES: &str = "ai.backend.features";
pub const LABEL_SERVICE_PORTS: &str = "ai.backend.service-ports";

const DEFAULT_KERNEL_FEATURES: &str = "query batch uid-match";

/// glibc version -> distro codename, ascending.
const KNOWN_GLIBC_DISTROS: &[((u32, u32), &str)] = &[
    ((2, 17), "centos7.6"),
    ((2, 27), "ubuntu18.04"),
    ((2, 28), "centos8.0"),
    ((2, 31), "ubuntu20.04"),
    ((2, 34), "centos9.0"),
    ((2, 35), "ubuntu22.04"),
    ((2, 39), "ubuntu24.04"),
];

const MUSL_DISTRO: &str = "alpine3.8";

/// Runs `ldd --version` inside a throwaway container of the image.
#[async_trait]
pub trait DistroProber: Send + Sync {
    async fn ldd_version_lines(&self, canonical: &str) -> Result<Vec<String>, ProvisionError>;
}

/// Shared distro cache keyed by image digest.
#[async_trait]
pub trait DistroCache: Send + Sync {
    async fn get(&self, image_id: &str) -> Option<String>;
    async fn set(&self, image_id: &str, distro: &str);
}

/// Process-local [`DistroCache`].
#[derive(Default)]
pub struct MemoryDistroCache {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl DistroCache for MemoryDistroCache {
    async fn get(&self, image_id: &str) -> Option<String> {
        self.entries.lock().get(image_id).cloned()
    }

    async fn set(&self, image_id: &str, distro: &str) {
        self.entries
            .lock()
            .insert(image_id.to_string(), distro.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct ImageMetaSpec {
    pub labels: IndexMap<String, String>,
    pub digest: String,
    pub canonical: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetaResult {
    pub runtime_type: String,
    pub runtime_path: Option<String>,
    pub distro: String,
    pub kernel_features: Vec<String>,
}

pub struct ImageMetaProvisioner {
    cache: Arc<dyn DistroCache>,
    prober: Arc<dyn DistroProber>,
}

impl ImageMetaProvisioner {
    pub fn new(cache: Arc<dyn DistroCache>, prober: Arc<dyn DistroProber>) -> Self {
        Self { cache, prober }
    }

    fn image_id(digest: &str) -> &str {
        digest.split_once(':').map(|(_, id)| id).unwrap_or(digest)
    }

    async fn resolve_distro(&self, spec: &ImageMetaSpec) -> Result<String, ProvisionError> {
        if let Some(distro) = spec.labels.get(LABEL_BASE_DISTRO) {
            return Ok(distro.clone());
        }
        let image_id = Self::image_id(&spec.digest);
        if let Some(distro) = self.cache.get(image_id).await {
            return Ok(distro);
        }
        let lines = self.prober.ldd_version_lines(&spec.canonical).await?;
        let first = lines.first().map(String::as_str).unwrap_or("");
        let distro = distro_from_ldd(first).ok_or_else(|| {
            ProvisionError::failed(STAGE, format!("could not determine the C library variant from {first:?}"))
        })?;
        self.cache.set(image_id, &distro).await;
        Ok(distro)
    }
}

/// Map the first `ldd --version` output line to a distro codename.
///
/// Versions between known glibc entries resolve to the largest known entry
/// not above the observed one.
pub fn distro_from_ldd(line: &str) -> Option<String> {
    if line.starts_with("musl libc") {
        return Some(MUSL_DISTRO.to_string());
    }
    if !line.starts_with("ldd (") {
        return None;
    }
    let version = line.rsplit(' ').next()?;
    let mut parts = version.split('.');
    let observed: (u32, u32) = (
        parts.next()?.parse().ok()?,
        parts.next()?.parse().ok()?,
    );
    let mut best: Option<&str> = None;
    for (known, distro) in KNOWN_GLIBC_DISTROS {
        if *known <= observed {
            best = Some(distro);
        }
    }
    // below the oldest known glibc: fall back to the oldest entry
    Some(
        best.unwrap_or(KNOWN_GLIBC_DISTROS[0].1)
            .to_string(),
    )
}

#[async_trait]
impl Provisioner for ImageMetaProvisioner {
    type Spec = ImageMetaSpec;
    type Resource = ImageMetaResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &ImageMetaSpec) -> Result<ImageMetaResult, ProvisionError> {
        let runtime_type = spec
            .labels
            .get(LABEL_RUNTIME_TYPE)
            .cloned()
            .unwrap_or_else(|| "app".to_string());
        let runtime_path = spec.labels.get(LABEL_RUNTIME_PATH).cloned();
        let kernel_features = spec
            .labels
            .get(LABEL_FEATURES)
            .map(String::as_str)
            .unwrap_or(DEFAULT_KERNEL_FEATURES)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let distro = self.resolve_distro(spec).await?;
        Ok(ImageMetaResult {
            runtime_type,
            runtime_path,
            distro,
            kernel_features,
        })
    }

    async fn teardown(&self, _resource: Option<&ImageMetaResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "image_meta_tests.rs"]
mod tests;
