//! Connection read loop.
//!
//! One reader task per connection drives a [`FramedRead`] over the inbound
//! byte stream and classifies every frame:
//!
//! | Frame                         | Action                                      |
//! |-------------------------------|---------------------------------------------|
//! | reply (`id` + `result`)       | completes the matching pending request      |
//! | reply (`id` + `error`)        | fails it with [`ClientError::Protocol`]     |
//! | call (`method`, `id` or not)  | forwarded to the dispatcher                 |
//! | anything else                 | skipped; logged at `DEBUG`                  |
//!
//! EOF, a malformed header, or an I/O error ends the loop. Every request
//! still pending at that point fails, and the connection token is cancelled
//! so the owning client observes the disconnect.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::rpc::codec::FrameCodec;
use crate::rpc::dispatcher::InboundCall;
use crate::rpc::message::{numeric_id, Frame};
use crate::rpc::pending::PendingTable;
use crate::ClientError;

/// Reader task. Returns once the stream ends or `cancel` fires.
pub async fn run_reader<R>(
    stream: R,
    pending: Arc<PendingTable>,
    calls: mpsc::UnboundedSender<InboundCall>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stream, FrameCodec::new());

    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("rpc reader: cancellation received, stopping");
                break None;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("rpc reader: EOF detected");
                        break Some("connection closed: end of stream".to_owned());
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "rpc reader: stream error, stopping");
                        break Some(format!("connection closed: {err}"));
                    }
                    Some(Ok(value)) => {
                        trace!(frame = %value, "rpc reader: frame received");
                        route(value, &pending, &calls);
                    }
                }
            }
        }
    };

    if let Some(reason) = reason {
        let failed = pending.fail_all(&ClientError::Transport(reason));
        if failed > 0 {
            debug!(failed, "rpc reader: failed pending requests after disconnect");
        }
        cancel.cancel();
    }
}

fn route(
    value: serde_json::Value,
    pending: &PendingTable,
    calls: &mpsc::UnboundedSender<InboundCall>,
) {
    match Frame::classify(value) {
        Some(Frame::Response { id, outcome }) => {
            let Some(numeric) = numeric_id(&id) else {
                debug!(%id, "rpc reader: reply with non-numeric id, skipping");
                return;
            };
            if !pending.complete(numeric, outcome.map_err(ClientError::from)) {
                debug!(id = numeric, "rpc reader: reply for unknown request, skipping");
            }
        }
        Some(Frame::Request { id, method, params }) => {
            forward(calls, InboundCall { id: Some(id), method, params });
        }
        Some(Frame::Notification { method, params }) => {
            forward(calls, InboundCall { id: None, method, params });
        }
        None => debug!("rpc reader: unclassifiable frame, skipping"),
    }
}

fn forward(calls: &mpsc::UnboundedSender<InboundCall>, call: InboundCall) {
    if calls.send(call).is_err() {
        debug!("rpc reader: dispatcher gone, dropping inbound call");
    }
}
