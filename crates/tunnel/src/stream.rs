// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Direction-locked stream wrappers
//!
//! Both sides of a tunnel serialize concurrent senders behind a send lock and
//! concurrent receivers behind a receive lock; the two directions never block
//! each other. The initiating side owns both halves of the underlying channel
//! and must release them explicitly on close; the accepting side's channel is
//! torn down by its framework once the handler returns.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

/// One frame exchanged over the tunnel; the payload is opaque
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelMessage {
    /// Multiplexing key chosen by the layer above
    pub stream_id: u64,
    pub payload: Vec<u8>,
    /// Marks the last frame of a logical stream
    #[serde(default)]
    pub eof: bool,
}

/// Errors raised on the tunnel's send/receive path
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TunnelError {
    #[error("stream closed")]
    StreamClosed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Aggregated result of a close that attempts both stream halves
#[derive(Debug, Error)]
#[error("tunnel close failed (read half: {read:?}, write half: {write:?})")]
pub struct CloseError {
    pub read: Option<TunnelError>,
    pub write: Option<TunnelError>,
}

/// The raw bidirectional stream supplied by the RPC layer.
///
/// Implementations carry the frames of one tunnel call; `close_read` and
/// `close_write` release the respective half of the underlying channel.
#[async_trait::async_trait]
pub trait FrameTransport: Send + Sync {
    async fn send(&self, msg: TunnelMessage) -> Result<(), TunnelError>;
    async fn receive(&self) -> Result<TunnelMessage, TunnelError>;
    async fn close_read(&self) -> Result<(), TunnelError>;
    async fn close_write(&self) -> Result<(), TunnelError>;
}

/// Call-initiating side of a tunnel
pub struct InitiatorStream<T: FrameTransport> {
    inner: T,
    send_mu: Mutex<()>,
    receive_mu: Mutex<()>,
    closed: AtomicBool,
}

impl<T: FrameTransport> InitiatorStream<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            send_mu: Mutex::new(()),
            receive_mu: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn send(&self, msg: TunnelMessage) -> Result<(), TunnelError> {
        let _guard = self.send_mu.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::StreamClosed);
        }
        self.inner.send(msg).await
    }

    pub async fn receive(&self) -> Result<TunnelMessage, TunnelError> {
        let _guard = self.receive_mu.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::StreamClosed);
        }
        self.inner.receive().await
    }

    /// Close both halves of the stream.
    ///
    /// Marks the stream closed, then releases the read half and the write
    /// half in turn, waiting for any in-flight receive or send to finish
    /// first. Both halves are always attempted; failures are aggregated.
    /// Repeat calls are no-ops, so the halves are released exactly once.
    pub async fn close(&self) -> Result<(), CloseError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let read = {
            let _guard = self.receive_mu.lock().await;
            self.inner.close_read().await.err()
        };
        let write = {
            let _guard = self.send_mu.lock().await;
            self.inner.close_write().await.err()
        };

        if read.is_none() && write.is_none() {
            Ok(())
        } else {
            Err(CloseError { read, write })
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Call-accepting side of a tunnel
pub struct AcceptorStream<T: FrameTransport> {
    inner: T,
    send_mu: Mutex<()>,
    receive_mu: Mutex<()>,
    closed: AtomicBool,
}

impl<T: FrameTransport> AcceptorStream<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            send_mu: Mutex::new(()),
            receive_mu: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn send(&self, msg: TunnelMessage) -> Result<(), TunnelError> {
        let _guard = self.send_mu.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::StreamClosed);
        }
        self.inner.send(msg).await
    }

    pub async fn receive(&self) -> Result<TunnelMessage, TunnelError> {
        let _guard = self.receive_mu.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::StreamClosed);
        }
        self.inner.receive().await
    }

    /// Mark the stream closed once in-flight traffic finishes.
    ///
    /// The accepting side does not own the underlying channel, so no half is
    /// released here; the framework boundary tears the stream down when the
    /// handler returns.
    pub async fn close(&self) {
        let _receive = self.receive_mu.lock().await;
        let _send = self.send_mu.lock().await;
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
