// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use yare::parameterized;

struct FixedProber {
    line: String,
    probes: AtomicU32,
}

impl FixedProber {
    fn new(line: &str) -> Arc<Self> {
        Arc::new(Self {
            line: line.to_string(),
            probes: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl DistroProber for FixedProber {
    async fn ldd_version_lines(&self, _canonical: &str) -> Result<Vec<String>, ProvisionError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(vec![self.line.clone()])
    }
}

fn spec(labels: &[(&str, &str)]) -> ImageMetaSpec {
    ImageMetaSpec {
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        digest: "sha256:49f21bdc".to_string(),
        canonical: "cr.backend.ai/stable/python:latest".to_string(),
    }
}

#[parameterized(
    exact_u22 = { "ldd (Ubuntu GLIBC 2.35-0ubuntu3) 2.35", "ubuntu22.04" },
    exact_c7 = { "ldd (GNU libc) 2.17", "centos7.6" },
    between_entries = { "ldd (GNU libc) 2.33", "ubuntu20.04" },
    newer_than_all = { "ldd (GNU libc) 2.42", "ubuntu24.04" },
    musl = { "musl libc (x86_64)", "alpine3.8" },
)]
fn ldd_mapping(line: &str, expected: &str) {
    assert_eq!(distro_from_ldd(line).as_deref(), Some(expected));
}

#[test]
fn garbage_ldd_output_is_rejected() {
    assert!(distro_from_ldd("bash: ldd: not found").is_none());
}

#[tokio::test]
async fn labelled_distro_skips_probe() {
    let prober = FixedProber::new("ldd (GNU libc) 2.35");
    let provisioner =
        ImageMetaProvisioner::new(Arc::new(MemoryDistroCache::default()), prober.clone());
    let result = provisioner
        .setup(&spec(&[
            (LABEL_BASE_DISTRO, "ubuntu22.04"),
            (LABEL_RUNTIME_TYPE, "python"),
            (LABEL_RUNTIME_PATH, "/usr/bin/python3"),
        ]))
        .await
        .unwrap();
    assert_eq!(result.distro, "ubuntu22.04");
    assert_eq!(result.runtime_type, "python");
    assert_eq!(result.runtime_path.as_deref(), Some("/usr/bin/python3"));
    assert_eq!(prober.probes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unlabelled_distro_probes_once_then_caches() {
    let prober = FixedProber::new("ldd (GNU libc) 2.31");
    let cache = Arc::new(MemoryDistroCache::default());
    let provisioner = ImageMetaProvisioner::new(cache.clone(), prober.clone());

    let first = provisioner.setup(&spec(&[])).await.unwrap();
    assert_eq!(first.distro, "ubuntu20.04");
    let second = provisioner.setup(&spec(&[])).await.unwrap();
    assert_eq!(second.distro, "ubuntu20.04");
    // the cache keyed by image id absorbed the second lookup
    assert_eq!(prober.probes.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("49f21bdc").await.as_deref(), Some("ubuntu20.04"));
}

#[tokio::test]
async fn default_labels() {
    let prober = FixedProber::new("ldd (GNU libc) 2.35");
    let provisioner =
        ImageMetaProvisioner::new(Arc::new(MemoryDistroCache::default()), prober);
    let result = provisioner.setup(&spec(&[])).await.unwrap();
    assert_eq!(result.runtime_type, "app");
    assert!(result.runtime_path.is_none());
    assert_eq!(result.kernel_features, vec!["query", "batch", "uid-match"]);
}
