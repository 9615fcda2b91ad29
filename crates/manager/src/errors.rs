// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-visible error surface (RFC-7807 style).
//!
//! Every API-facing failure renders as `{type, title, agent-details?,
//! extra_data?}` with a stable HTTP status per error kind.

use berth_core::AgentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const ERROR_TYPE_BASE: &str = "https://api.backend.ai/probs";

/// Agent-side failure context attached to gateway errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDetails {
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    pub exception: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

/// The wire shape of an API error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    #[serde(rename = "agent-details", default, skip_serializing_if = "Option::is_none")]
    pub agent_details: Option<AgentDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<Value>,
}

/// API error kinds with their slugs and status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("internal server error: {0}")]
    Internal(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("storage full: {0}")]
    StorageFull(String),

    #[error("agent failure: {exception}")]
    AgentFailure {
        agent_id: AgentId,
        exception: String,
    },
}

impl ApiError {
    pub fn slug(&self) -> &'static str {
        match self {
            ApiError::InvalidParameters(_) => "invalid-parameters",
            ApiError::AuthFailed(_) => "auth-failed",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not-found",
            ApiError::Conflict(_) => "conflict",
            ApiError::QuotaExceeded(_) => "quota-exceeded",
            ApiError::RateLimited(_) => "too-many-requests",
            ApiError::Internal(_) => "internal-server-error",
            ApiError::Unavailable(_) => "service-unavailable",
            ApiError::StorageFull(_) => "storage-full",
            ApiError::AgentFailure { .. } => "agent-error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidParameters(_) => 400,
            ApiError::AuthFailed(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::QuotaExceeded(_) => 412,
            ApiError::RateLimited(_) => 429,
            ApiError::Internal(_) => 500,
            ApiError::Unavailable(_) => 503,
            ApiError::StorageFull(_) => 507,
            ApiError::AgentFailure { .. } => 500,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let agent_details = match self {
            ApiError::AgentFailure {
                agent_id,
                exception,
            } => Some(AgentDetails {
                error_type: format!("{ERROR_TYPE_BASE}/agent-error"),
                title: "The agent-side error".to_string(),
                exception: exception.clone(),
                agent_id: Some(agent_id.clone()),
            }),
            _ => None,
        };
        ErrorPayload {
            error_type: format!("{ERROR_TYPE_BASE}/{}", self.slug()),
            title: self.to_string(),
            agent_details,
            extra_data: None,
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
