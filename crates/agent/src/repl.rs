// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REPL wire protocol between the agent and the in-container kernel runner.
//!
//! Messages are 2-frame multipart: requests carry `[op_type_ascii,
//! utf8_body]`, responses `[channel_ascii, payload]`. Over TCP a multipart
//! message is a u16 frame count followed by length-prefixed frames.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

/// REPL protocol errors
#[derive(Debug, Error)]
pub enum ReplError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed multipart message ({0} frames)")]
    BadFrameCount(usize),

    #[error("unknown response channel: {0}")]
    UnknownChannel(String),

    #[error("runner connection closed")]
    Closed,
}

/// Request operations understood by every kernel runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplOp {
    Clean,
    Build,
    Exec,
    Code,
    Input,
    Complete,
    Interrupt,
    Status,
    StartService,
    ShutdownService,
    GetApps,
}

impl ReplOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplOp::Clean => "clean",
            ReplOp::Build => "build",
            ReplOp::Exec => "exec",
            ReplOp::Code => "code",
            ReplOp::Input => "input",
            ReplOp::Complete => "complete",
            ReplOp::Interrupt => "interrupt",
            ReplOp::Status => "status",
            ReplOp::StartService => "start-service",
            ReplOp::ShutdownService => "shutdown-service",
            ReplOp::GetApps => "get-apps",
        }
    }
}

impl fmt::Display for ReplOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response channels emitted by kernel runners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplChannel {
    Stdout,
    Stderr,
    Media,
    Status,
    WaitingInput,
    BuildFinished,
    Finished,
    CleanFinished,
    AppsResult,
    ServiceResult,
    Completion,
}

impl ReplChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplChannel::Stdout => "stdout",
            ReplChannel::Stderr => "stderr",
            ReplChannel::Media => "media",
            ReplChannel::Status => "status",
            ReplChannel::WaitingInput => "waiting-input",
            ReplChannel::BuildFinished => "build-finished",
            ReplChannel::Finished => "finished",
            ReplChannel::CleanFinished => "clean-finished",
            ReplChannel::AppsResult => "apps-result",
            ReplChannel::ServiceResult => "service-result",
            ReplChannel::Completion => "completion",
        }
    }

    pub fn parse(name: &str) -> Result<Self, ReplError> {
        Ok(match name {
            "stdout" => ReplChannel::Stdout,
            "stderr" => ReplChannel::Stderr,
            "media" => ReplChannel::Media,
            "status" => ReplChannel::Status,
            "waiting-input" => ReplChannel::WaitingInput,
            "build-finished" => ReplChannel::BuildFinished,
            "finished" => ReplChannel::Finished,
            "clean-finished" => ReplChannel::CleanFinished,
            "apps-result" => ReplChannel::AppsResult,
            "service-result" => ReplChannel::ServiceResult,
            "completion" => ReplChannel::Completion,
            other => return Err(ReplError::UnknownChannel(other.to_string())),
        })
    }

    /// Channels whose payload is a `{"exitCode": int}` JSON document.
    pub fn carries_exit_code(self) -> bool {
        matches!(
            self,
            ReplChannel::Finished | ReplChannel::BuildFinished | ReplChannel::CleanFinished
        )
    }
}

/// A response received from the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplResponse {
    pub channel: ReplChannel,
    pub payload: Vec<u8>,
}

impl ReplResponse {
    /// Exit code from `finished`-family payloads.
    pub fn exit_code(&self) -> Option<i32> {
        if !self.channel.carries_exit_code() {
            return None;
        }
        serde_json::from_slice::<serde_json::Value>(&self.payload)
            .ok()?
            .get("exitCode")?
            .as_i64()
            .map(|code| code as i32)
    }
}

/// Write a multipart message: u16 frame count, then length-prefixed frames.
pub async fn write_multipart<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frames: &[&[u8]],
) -> Result<(), ReplError> {
    writer.write_all(&(frames.len() as u16).to_be_bytes()).await?;
    for frame in frames {
        writer.write_all(&(frame.len() as u32).to_be_bytes()).await?;
        writer.write_all(frame).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Read a multipart message.
pub async fn read_multipart<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<Vec<u8>>, ReplError> {
    let mut count_buf = [0u8; 2];
    match reader.read_exact(&mut count_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(ReplError::Closed),
        Err(e) => return Err(ReplError::Io(e)),
    }
    let count = u16::from_be_bytes(count_buf) as usize;
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;
        frames.push(frame);
    }
    Ok(frames)
}

/// Client side of one kernel's REPL sockets.
///
/// Requests go to the `replin` port, responses come from `replout`.
/// Connections are established lazily on first use.
#[derive(Debug)]
pub struct CodeRunner {
    kernel_host: String,
    repl_in_port: u16,
    repl_out_port: u16,
    input: AsyncMutex<Option<TcpStream>>,
    output: AsyncMutex<Option<TcpStream>>,
}

impl CodeRunner {
    pub fn new(kernel_host: impl Into<String>, repl_in_port: u16, repl_out_port: u16) -> Self {
        Self {
            kernel_host: kernel_host.into(),
            repl_in_port,
            repl_out_port,
            input: AsyncMutex::new(None),
            output: AsyncMutex::new(None),
        }
    }

    pub fn repl_ports(&self) -> (u16, u16) {
        (self.repl_in_port, self.repl_out_port)
    }

    /// Send one request to the runner.
    pub async fn feed(&self, op: ReplOp, body: &str) -> Result<(), ReplError> {
        let mut guard = self.input.lock().await;
        if guard.is_none() {
            let addr = format!("{}:{}", self.kernel_host, self.repl_in_port);
            *guard = Some(TcpStream::connect(&addr).await?);
        }
        let stream = guard.as_mut().ok_or(ReplError::Closed)?;
        write_multipart(stream, &[op.as_str().as_bytes(), body.as_bytes()]).await
    }

    /// Receive the next response from the runner.
    pub async fn next_response(&self) -> Result<ReplResponse, ReplError> {
        let mut guard = self.output.lock().await;
        if guard.is_none() {
            let addr = format!("{}:{}", self.kernel_host, self.repl_out_port);
            *guard = Some(TcpStream::connect(&addr).await?);
        }
        let stream = guard.as_mut().ok_or(ReplError::Closed)?;
        let frames = read_multipart(stream).await?;
        if frames.len() != 2 {
            return Err(ReplError::BadFrameCount(frames.len()));
        }
        let channel = ReplChannel::parse(&String::from_utf8_lossy(&frames[0]))?;
        Ok(ReplResponse {
            channel,
            payload: frames[1].clone(),
        })
    }

    /// Drop both connections.
    pub async fn close(&self) {
        self.input.lock().await.take();
        self.output.lock().await.take();
    }
}

#[cfg(test)]
#[path = "repl_tests.rs"]
mod tests;
