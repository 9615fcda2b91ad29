// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service ports and the intrinsic REPL ports

use serde::{Deserialize, Serialize};

/// Container-side port of the kernel runner's request socket.
pub const REPL_IN_PORT: u16 = 2000;
/// Container-side port of the kernel runner's response socket.
pub const REPL_OUT_PORT: u16 = 2001;

/// Protocol spoken on a service port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Tcp,
    Http,
    Preopen,
    Pty,
}

/// A service exposed by a kernel: container ports plus the host ports they
/// were published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub protocol: PortProtocol,
    pub container_ports: Vec<u16>,
    pub host_ports: Vec<u16>,
    #[serde(default)]
    pub is_inference: bool,
}

/// A single container-port to host-port assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

#[cfg(test)]
#[path = "ports_tests.rs"]
mod tests;
