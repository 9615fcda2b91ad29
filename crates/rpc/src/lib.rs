// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! berth-rpc: Manager-to-agent RPC.
//!
//! Length-prefixed msgpack frames over TCP with keepalive, an optional
//! key-pinned auth handshake, per-`order_key` call serialisation, and a
//! process-wide per-agent peer cache.

pub mod auth;
pub mod cache;
pub mod peer;
pub mod server;
pub mod wire;

pub use auth::AuthKey;
pub use cache::{AddrResolver, AgentError, AgentRpcCache, CallError, PeerHandle, RpcError};
pub use peer::{Peer, PeerConfig, PeerError};
pub use server::{RpcHandler, RpcServer};
pub use wire::{ErrorRecord, RpcMessage};
