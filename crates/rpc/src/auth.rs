// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC auth handshake.
//!
//! When an agent has a registered key, both ends hold it and the connecting
//! manager must prove possession: the server sends a random nonce and the
//! client answers with `sha256(key || nonce)`. Connections to keyless agents
//! skip verification but still run the handshake frames so the protocol
//! stays uniform.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Shared auth key for one agent's RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthKey(pub String);

impl AuthKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

/// Server -> client: handshake opener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub nonce: Vec<u8>,
}

/// Client -> server: identification plus proof of key possession.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub client_id: String,
    #[serde(default)]
    pub proof: Option<String>,
}

/// Server -> client: handshake verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Welcome {
    pub ok: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Compute the hex proof for a challenge nonce.
pub fn compute_proof(key: &AuthKey, nonce: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.0.as_bytes());
    hasher.update(nonce);
    let digest = hasher.finalize();
    hex_encode(&digest)
}

/// Verify a client proof against the registered key.
pub fn verify_proof(key: &AuthKey, nonce: &[u8], proof: &str) -> bool {
    compute_proof(key, nonce) == proof
}

/// Generate a fresh random nonce.
pub fn fresh_nonce() -> Vec<u8> {
    use rand::RngCore;
    let mut nonce = vec![0u8; 32];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::new(), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
