//! Bidirectional JSON-RPC endpoint over one duplex byte stream.
//!
//! [`RpcClient::new`] spawns the reader and dispatcher tasks and returns a
//! handle for outbound traffic. The outbound pending table and the inbound
//! handler table never reference each other; they only share the transport.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::rpc::dispatcher::{run_dispatcher, Dispatcher};
use crate::rpc::message;
use crate::rpc::pending::PendingTable;
use crate::rpc::reader::run_reader;
use crate::rpc::writer::FrameWriter;
use crate::{ClientError, Result};

/// Handle to a live connection.
///
/// Dropping the handle stops the background tasks.
#[derive(Debug)]
pub struct RpcClient {
    writer: Arc<FrameWriter>,
    pending: Arc<PendingTable>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

impl RpcClient {
    /// Start serving a connection.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, dispatcher: Arc<Dispatcher>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let writer = Arc::new(FrameWriter::new(writer));
        let pending = Arc::new(PendingTable::new());
        let cancel = CancellationToken::new();
        let (call_tx, call_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_reader(
            reader,
            Arc::clone(&pending),
            call_tx,
            cancel.clone(),
        ));
        tokio::spawn(run_dispatcher(
            Arc::clone(&dispatcher),
            Arc::clone(&writer),
            call_rx,
            cancel.clone(),
        ));

        Self {
            writer,
            pending,
            dispatcher,
            cancel,
        }
    }

    /// Send a request and await its reply.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Protocol`] when the peer replies with an error.
    /// - [`ClientError::Transport`] when the write fails or the connection
    ///   closes before the reply arrives.
    pub async fn invoke(&self, method: &str, params: Value) -> Result<Value> {
        let (id, reply) = self.pending.register()?;
        debug!(id, method, "rpc client: sending request");

        if let Err(err) = self.writer.send(message::request(id, method, params)).await {
            self.pending.remove(id);
            return Err(err);
        }

        reply.await.unwrap_or_else(|_| Err(ClientError::closed()))
    }

    /// Send a request with typed params and decode the typed reply.
    ///
    /// # Errors
    ///
    /// As [`invoke`](Self::invoke), plus [`ClientError::Serialization`] when
    /// encoding the params or decoding the result fails.
    pub async fn invoke_as<P, T>(&self, method: &str, params: &P) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.invoke(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a notification; no reply is expected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the write fails or the client
    /// is closed.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::closed());
        }
        self.writer.send(message::notification(method, params)).await
    }

    /// Inbound handler table for this connection.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether the connection has stopped, locally or because the stream ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve once the connection has stopped.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Stop the connection.
    ///
    /// Fails every pending request with [`ClientError::closed`], stops the
    /// background tasks and closes the outbound stream. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        let failed = self.pending.fail_all(&ClientError::closed());
        if failed > 0 {
            debug!(failed, "rpc client: failed pending requests on close");
        }
        self.writer.shutdown().await;
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.pending.fail_all(&ClientError::closed());
    }
}
