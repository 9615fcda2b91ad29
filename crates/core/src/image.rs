// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container image references

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from parsing canonical image references.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageRefError {
    #[error("missing registry component in {0}")]
    MissingRegistry(String),
    #[error("missing image name in {0}")]
    MissingName(String),
}

/// Fully-qualified image reference.
///
/// The canonical form `registry/project/name:tag` is the primary key for
/// image metadata lookups across the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub project: String,
    pub name: String,
    pub tag: String,
    pub architecture: String,
}

impl ImageRef {
    pub fn new(
        registry: impl Into<String>,
        project: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            project: project.into(),
            name: name.into(),
            tag: tag.into(),
            architecture: architecture.into(),
        }
    }

    /// Canonical `registry/project/name:tag` form.
    pub fn canonical(&self) -> String {
        format!(
            "{}/{}/{}:{}",
            self.registry, self.project, self.name, self.tag
        )
    }

    /// Last path component of the image name, used in container names.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Parse a canonical `registry/project/name:tag` reference.
    ///
    /// The project component may itself contain slashes; the first path
    /// segment is the registry and the last is the image name.
    pub fn parse(canonical: &str, architecture: impl Into<String>) -> Result<Self, ImageRefError> {
        let (path, tag) = match canonical.rsplit_once(':') {
            Some((path, tag)) if !tag.contains('/') => (path, tag),
            _ => (canonical, "latest"),
        };
        let mut segments = path.split('/');
        let registry = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ImageRefError::MissingRegistry(canonical.to_string()))?;
        let rest: Vec<&str> = segments.collect();
        let (project, name) = match rest.split_last() {
            Some((name, project)) if !name.is_empty() => (project.join("/"), *name),
            _ => return Err(ImageRefError::MissingName(canonical.to_string())),
        };
        Ok(Self {
            registry: registry.to_string(),
            project,
            name: name.to_string(),
            tag: tag.to_string(),
            architecture: architecture.into(),
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.canonical(), self.architecture)
    }
}

/// When the agent pulls an image before creating a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoPullPolicy {
    /// Always pull, even when the image is present locally.
    Always,
    /// Pull when the local digest differs from the requested one.
    #[default]
    Digest,
    /// Pull only when the tag is absent locally.
    Tag,
    /// Never pull; fail if the image is missing.
    None,
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;
