//! Serialized outbound frame writer.
//!
//! All outbound traffic (requests, notifications, and replies to reverse
//! calls) goes through one [`FrameWriter`]. The sink sits behind a single
//! async lock, so header and body of one frame are never interleaved with
//! another frame, and every frame is flushed before the lock is released.

use std::pin::Pin;

use futures_util::SinkExt;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, trace, warn};

use crate::rpc::codec::FrameCodec;
use crate::{ClientError, Result};

type BoxedWrite = Pin<Box<dyn AsyncWrite + Send>>;

/// Outbound half of a connection.
pub struct FrameWriter {
    sink: Mutex<Option<FramedWrite<BoxedWrite, FrameCodec>>>,
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}

impl FrameWriter {
    /// Wrap a byte sink.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        let boxed: BoxedWrite = Box::pin(writer);
        Self {
            sink: Mutex::new(Some(FramedWrite::new(boxed, FrameCodec::new()))),
        }
    }

    /// Write and flush one frame.
    ///
    /// # Errors
    ///
    /// - [`ClientError::closed`] after [`shutdown`](Self::shutdown).
    /// - [`ClientError::Transport`] if the underlying write fails.
    pub async fn send(&self, frame: Value) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or_else(ClientError::closed)?;
        trace!(frame = %frame, "rpc writer: sending frame");
        sink.send(frame).await.map_err(|err| {
            warn!(error = %err, "rpc writer: write failed");
            err
        })
    }

    /// Flush and close the sink; later sends fail with a closed error.
    pub async fn shutdown(&self) {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return;
        };
        if let Err(err) = sink.close().await {
            debug!(error = %err, "rpc writer: close failed");
        }
    }
}
