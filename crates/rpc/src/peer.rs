// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-lived RPC client connection to one agent.
//!
//! One TCP connection per (manager, agent), multiplexing calls by id.
//! Calls tagged with the same `order_key` execute in submission order;
//! different keys run concurrently. This is how "all operations on kernel X
//! are ordered" works without a global lock.

use crate::auth::{self, AuthKey, Challenge, Hello, Welcome};
use crate::wire::{self, ErrorRecord, RpcMessage, WireError};
use parking_lot::Mutex;
use rmpv::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Peer errors
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("connect failed: {0}")]
    Connect(std::io::Error),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("remote exception: {}", .0.exc_repr)]
    Remote(ErrorRecord),
}

/// Connection options for a peer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Identity announced in the handshake.
    pub client_id: String,
    /// Auth key shared with the agent; `None` connects unauthenticated.
    pub auth_key: Option<AuthKey>,
    /// TCP keepalive idle time. Probe interval is a third of this
    /// (minimum 2 s) with 3 retries.
    pub keepalive_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            client_id: "manager".to_string(),
            auth_key: None,
            keepalive_timeout: Duration::from_secs(60),
        }
    }
}

struct PeerShared {
    writer: AsyncMutex<OwnedWriteHalf>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, ErrorRecord>>>>,
    order_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    next_call_id: AtomicU64,
    last_used_ms: AtomicU64,
}

/// An authenticated, multiplexing RPC client.
#[derive(Clone)]
pub struct Peer {
    shared: Arc<PeerShared>,
    reader_task: Arc<JoinHandle<()>>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer").finish_non_exhaustive()
    }
}

impl Peer {
    /// Connect, configure keepalive, and run the auth handshake.
    pub async fn connect(addr: &str, config: PeerConfig) -> Result<Self, PeerError> {
        let stream = TcpStream::connect(addr).await.map_err(PeerError::Connect)?;
        configure_keepalive(&stream, config.keepalive_timeout);
        let (mut read_half, mut write_half) = stream.into_split();

        let challenge: Challenge = wire::decode(&wire::read_frame(&mut read_half).await?)?;
        let proof = config
            .auth_key
            .as_ref()
            .map(|key| auth::compute_proof(key, &challenge.nonce));
        let hello = Hello {
            client_id: config.client_id.clone(),
            proof,
        };
        wire::write_frame(&mut write_half, &wire::encode(&hello)?).await?;
        let welcome: Welcome = wire::decode(&wire::read_frame(&mut read_half).await?)?;
        if !welcome.ok {
            return Err(PeerError::AuthRejected(
                welcome.detail.unwrap_or_else(|| "handshake refused".to_string()),
            ));
        }

        let shared = Arc::new(PeerShared {
            writer: AsyncMutex::new(write_half),
            pending: Mutex::new(HashMap::new()),
            order_locks: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
            last_used_ms: AtomicU64::new(0),
        });
        let reader_task = tokio::spawn(run_reader(read_half, Arc::clone(&shared)));

        Ok(Self {
            shared,
            reader_task: Arc::new(reader_task),
        })
    }

    /// Invoke `method` on the remote side.
    ///
    /// With an `order_key`, the call queues behind in-flight calls carrying
    /// the same key. `timeout` bounds the whole call including queueing.
    pub async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
        order_key: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Value, PeerError> {
        let fut = self.call_ordered(method, args, kwargs, order_key);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| PeerError::Timeout(limit))?,
            None => fut.await,
        }
    }

    async fn call_ordered(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
        order_key: Option<&str>,
    ) -> Result<Value, PeerError> {
        let _order_guard = match order_key {
            Some(key) => {
                let lock = {
                    let mut locks = self.shared.order_locks.lock();
                    Arc::clone(locks.entry(key.to_string()).or_default())
                };
                Some(lock.lock_owned().await)
            }
            None => None,
        };
        self.touch();

        let call_id = self.shared.next_call_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(call_id, tx);

        let frame = wire::encode(&RpcMessage::Call {
            call_id,
            method: method.to_string(),
            args,
            kwargs,
        })?;
        {
            let mut writer = self.shared.writer.lock().await;
            if let Err(err) = wire::write_frame(&mut *writer, &frame).await {
                self.shared.pending.lock().remove(&call_id);
                return Err(err.into());
            }
        }

        let reply = rx.await.map_err(|_| PeerError::Closed)?;
        self.touch();
        reply.map_err(PeerError::Remote)
    }

    /// Milliseconds since the epoch of the last call activity.
    pub fn last_used_ms(&self) -> u64 {
        self.shared.last_used_ms.load(Ordering::Relaxed)
    }

    /// Drop the connection, failing all in-flight calls.
    pub fn close(&self) {
        self.reader_task.abort();
        self.shared.pending.lock().clear();
    }

    fn touch(&self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.shared.last_used_ms.store(now, Ordering::Relaxed);
    }
}

async fn run_reader(mut read_half: OwnedReadHalf, shared: Arc<PeerShared>) {
    loop {
        let frame = match wire::read_frame(&mut read_half).await {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(error = %err, "rpc reader stopped");
                shared.pending.lock().clear();
                return;
            }
        };
        let msg: RpcMessage = match wire::decode(&frame) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed rpc frame");
                continue;
            }
        };
        if let RpcMessage::Reply {
            call_id,
            result,
            error,
        } = msg
        {
            let waiter = shared.pending.lock().remove(&call_id);
            if let Some(waiter) = waiter {
                let outcome = match error {
                    Some(record) => Err(record),
                    None => Ok(result.unwrap_or(Value::Nil)),
                };
                let _ = waiter.send(outcome);
            }
        }
    }
}

fn configure_keepalive(stream: &TcpStream, idle: Duration) {
    let interval = (idle / 3).max(Duration::from_secs(2));
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(idle)
        .with_interval(interval)
        .with_retries(3);
    let sock = socket2::SockRef::from(stream);
    if let Err(err) = sock.set_tcp_keepalive(&keepalive) {
        tracing::warn!(error = %err, "failed to set TCP keepalive");
    }
}

#[cfg(test)]
#[path = "peer_tests.rs"]
mod tests;
