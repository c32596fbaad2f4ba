//! `Content-Length` framing codec.
//!
//! Each frame on the wire is a header block terminated by an empty line,
//! followed by exactly `Content-Length` bytes of UTF-8 JSON:
//!
//! ```text
//! Content-Length: 42\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"ping"}
//! ```
//!
//! Use [`FrameCodec`] with [`tokio_util::codec::FramedRead`] for the inbound
//! half and [`tokio_util::codec::FramedWrite`] for the outbound half.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{ClientError, Result};

/// Largest body accepted by the decoder: 64 MiB.
///
/// A header announcing more than this is rejected before any allocation.
pub const MAX_FRAME_BYTES: usize = 64 * 1_048_576;

/// Largest header block accepted before the terminating blank line.
const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Length-prefixed JSON codec.
///
/// # Decoder
///
/// Buffers until a full header block and body are available, then yields the
/// body parsed as a [`Value`]. Header names are matched case-insensitively and
/// headers other than `Content-Length` (such as `Content-Type`) are ignored.
/// A missing or unparseable `Content-Length` or an oversized frame yields
/// [`ClientError::Transport`], which ends the stream. A body that is not
/// valid JSON is logged and skipped.
///
/// # Encoder
///
/// Serializes the value and writes header plus body into one buffer so the
/// frame reaches the sink as a single write.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Body length parsed from a header block whose body is still incomplete.
    pending_len: Option<usize>,
}

impl FrameCodec {
    /// Create a codec in its initial state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Value;
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let len = match self.pending_len {
                Some(len) => len,
                None => {
                    let Some(end) = find_terminator(src) else {
                        if src.len() > MAX_HEADER_BYTES {
                            return Err(ClientError::Transport(format!(
                                "malformed header: no terminator within {MAX_HEADER_BYTES} bytes"
                            )));
                        }
                        return Ok(None);
                    };
                    let len = parse_content_length(&src[..end])?;
                    src.advance(end + HEADER_TERMINATOR.len());
                    self.pending_len = Some(len);
                    len
                }
            };

            if src.len() < len {
                src.reserve(len - src.len());
                return Ok(None);
            }

            self.pending_len = None;
            let body = src.split_to(len);
            match serde_json::from_slice(&body) {
                Ok(value) => return Ok(Some(value)),
                Err(err) => {
                    // Framing is intact, so only this frame is lost.
                    warn!(error = %err, len, "frame codec: malformed json body, skipping");
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.pending_len.is_none() => Ok(None),
            None => Err(ClientError::Transport(
                "stream closed mid-frame".to_owned(),
            )),
        }
    }
}

impl Encoder<Value> for FrameCodec {
    type Error = ClientError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(&item)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn find_terminator(src: &[u8]) -> Option<usize> {
    src.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

fn parse_content_length(block: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(block)
        .map_err(|_| ClientError::Transport("malformed header: not utf-8".into()))?;

    let mut length = None;
    for line in text.split("\r\n").filter(|l| !l.trim().is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ClientError::Transport(format!(
                "malformed header line: {line:?}"
            )));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let parsed = value.trim().parse::<usize>().map_err(|_| {
                ClientError::Transport(format!("malformed content-length: {:?}", value.trim()))
            })?;
            length = Some(parsed);
        }
    }

    let length =
        length.ok_or_else(|| ClientError::Transport("missing content-length header".into()))?;
    if length > MAX_FRAME_BYTES {
        return Err(ClientError::Transport(format!(
            "frame too large: {length} bytes exceeds {MAX_FRAME_BYTES}"
        )));
    }
    Ok(length)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
