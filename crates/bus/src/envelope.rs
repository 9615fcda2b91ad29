// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event wire envelope.
//!
//! Wire format: msgpack `{name, domain, domain_id, source, timestamp, payload}`.
//! The `domain_id` string keys per-domain ordering on the consumer side.

use berth_core::{Event, EventDomain};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope errors
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// A routed event with its delivery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub name: String,
    pub domain: EventDomain,
    pub domain_id: String,
    /// Id of the emitting process (agent id or manager id).
    pub source: String,
    /// ISO-8601 emission time.
    pub timestamp: String,
    pub payload: Event,
}

impl EventEnvelope {
    pub fn new(event: Event, source: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            name: event.name().to_string(),
            domain: event.domain(),
            domain_id: event.domain_id(),
            source: source.into(),
            timestamp: timestamp.into(),
            payload: event,
        }
    }

    /// Encode to the msgpack wire form.
    pub fn to_wire(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from the msgpack wire form.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
