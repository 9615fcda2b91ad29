// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side RPC server.
//!
//! Accepts peer connections, runs the auth handshake, and dispatches decoded
//! calls to an [`RpcHandler`]. Handler failures travel back as wire error
//! records, never as dropped connections.

use crate::auth::{self, AuthKey, Hello, Welcome};
use crate::wire::{self, ErrorRecord, RpcMessage};
use async_trait::async_trait;
use rmpv::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Dispatch target for incoming RPC calls.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, ErrorRecord>;
}

/// A bound, running RPC server.
pub struct RpcServer {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    /// Bind to `addr` and start accepting connections.
    ///
    /// With an `auth_key`, every connecting client must prove possession of
    /// the same key during the handshake.
    pub async fn bind(
        addr: &str,
        auth_key: Option<AuthKey>,
        handler: Arc<dyn RpcHandler>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer_addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "rpc accept failed");
                        continue;
                    }
                };
                tracing::debug!(peer = %peer_addr, "rpc connection accepted");
                let auth_key = auth_key.clone();
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, auth_key, handler).await {
                        tracing::debug!(peer = %peer_addr, error = %err, "rpc connection ended");
                    }
                });
            }
        });
        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_connection(
    stream: TcpStream,
    auth_key: Option<AuthKey>,
    handler: Arc<dyn RpcHandler>,
) -> Result<(), wire::WireError> {
    let (mut reader, mut writer) = stream.into_split();

    let nonce = auth::fresh_nonce();
    wire::write_frame(
        &mut writer,
        &wire::encode(&auth::Challenge { nonce: nonce.clone() })?,
    )
    .await?;
    let hello: Hello = wire::decode(&wire::read_frame(&mut reader).await?)?;
    let ok = match (&auth_key, &hello.proof) {
        (Some(key), Some(proof)) => auth::verify_proof(key, &nonce, proof),
        (Some(_), None) => false,
        (None, _) => true,
    };
    let welcome = Welcome {
        ok,
        detail: (!ok).then(|| "authentication failed".to_string()),
    };
    wire::write_frame(&mut writer, &wire::encode(&welcome)?).await?;
    if !ok {
        tracing::warn!(client = %hello.client_id, "rpc authentication failed");
        return Ok(());
    }

    let writer = Arc::new(tokio::sync::Mutex::new(writer));
    loop {
        let frame = wire::read_frame(&mut reader).await?;
        let msg: RpcMessage = match wire::decode(&frame) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed rpc call");
                continue;
            }
        };
        let RpcMessage::Call {
            call_id,
            method,
            args,
            kwargs,
        } = msg
        else {
            continue;
        };
        let handler = Arc::clone(&handler);
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            tracing::debug!(method = %method, call_id, "rpc call");
            let outcome = handler.handle(&method, args, kwargs).await;
            let reply = match outcome {
                Ok(result) => RpcMessage::Reply {
                    call_id,
                    result: Some(result),
                    error: None,
                },
                Err(record) => {
                    tracing::warn!(method = %method, error = %record.exc_repr, "rpc handler error");
                    RpcMessage::Reply {
                        call_id,
                        result: None,
                        error: Some(record),
                    }
                }
            };
            let encoded = match wire::encode(&reply) {
                Ok(encoded) => encoded,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to encode rpc reply");
                    return;
                }
            };
            let mut writer = writer.lock().await;
            if let Err(err) = wire::write_frame(&mut *writer, &encoded).await {
                tracing::debug!(error = %err, "failed to write rpc reply");
            }
        });
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
