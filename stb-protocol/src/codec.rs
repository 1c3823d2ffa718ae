//! Codec for the two wire framings.
//!
//! Outbound envelope:
//! ```text
//! +---------+-----------------+-------+------------------+
//! | "Start" | length (7 ASCII | "End" |       Body       |
//! |         |  digits, 0-pad) |       |   (UTF-8 text)   |
//! +---------+-----------------+-------+------------------+
//! | 5 bytes |     7 bytes     |3 bytes|  length bytes    |
//! ```
//!
//! Inbound binary frame:
//! ```text
//! +--------+--------+--------+--------+------------------+
//! | Magic  | Length | Type   | Extra  |     Payload      |
//! | "GCDH" | i32 ?E | i32 ?E | i32 ?E |  (usually zlib)  |
//! +--------+--------+--------+--------+------------------+
//! | 4 bytes| 4 bytes| 4 bytes| 4 bytes|  Length bytes    |
//! ```
//! The integer byte order is negotiated per session.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProtocolError;
use crate::types::*;

/// Wrap a command body in the `Start<len>End` envelope.
pub fn encode_envelope(body: &[u8]) -> Result<Bytes, ProtocolError> {
    if body.len() > MAX_ENVELOPE_BODY {
        return Err(ProtocolError::EnvelopeTooLarge(body.len()));
    }

    let mut frame = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + body.len());
    frame.put_slice(ENVELOPE_START);
    frame.put_slice(format!("{:07}", body.len()).as_bytes());
    frame.put_slice(ENVELOPE_END);
    frame.put_slice(body);

    Ok(frame.freeze())
}

/// Encode a command as a ready-to-send envelope frame.
pub fn encode_command(cmd: &Command) -> Result<Bytes, ProtocolError> {
    encode_envelope(cmd.body()?.as_bytes())
}

/// Parse an envelope header and return the body length.
/// Returns None if there's not enough data yet.
pub fn decode_envelope_header(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if buf.len() < ENVELOPE_HEADER_SIZE {
        return Ok(None);
    }

    if &buf[0..5] != ENVELOPE_START || &buf[12..15] != ENVELOPE_END {
        return Err(ProtocolError::InvalidEnvelope(
            String::from_utf8_lossy(&buf[..ENVELOPE_HEADER_SIZE]).into_owned(),
        ));
    }

    let digits = &buf[5..12];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::InvalidEnvelope(format!(
            "non-numeric length {:?}",
            String::from_utf8_lossy(digits)
        )));
    }

    let len = digits
        .iter()
        .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));
    Ok(Some(len))
}

/// Decode one complete envelope frame (used by loopback tests and mock peers).
pub fn decode_envelope(buf: &[u8]) -> Result<Option<Frame>, ProtocolError> {
    let len = match decode_envelope_header(buf)? {
        Some(len) => len,
        None => return Ok(None),
    };
    if buf.len() < ENVELOPE_HEADER_SIZE + len {
        return Ok(None);
    }

    Ok(Some(Frame {
        kind: FrameKind::Envelope,
        payload: Bytes::copy_from_slice(&buf[ENVELOPE_HEADER_SIZE..ENVELOPE_HEADER_SIZE + len]),
        msg_type: 0,
        extra: 0,
    }))
}

/// Fields of a 16-byte binary header, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryHeader {
    pub magic: [u8; 4],
    pub length: i32,
    pub msg_type: i32,
    pub extra: i32,
}

impl BinaryHeader {
    pub fn magic_ok(&self) -> bool {
        self.magic == MAGIC
    }

    /// Validate magic and length bounds, returning the payload length.
    pub fn payload_len(&self) -> Result<usize, ProtocolError> {
        if !self.magic_ok() {
            return Err(ProtocolError::InvalidMagic(self.magic));
        }
        let len = i64::from(self.length);
        if !(0..=MAX_PAYLOAD_SIZE).contains(&len) {
            return Err(ProtocolError::PayloadOutOfBounds(len));
        }
        Ok(len as usize)
    }
}

/// Split a binary header into its fields using the session byte order.
pub fn decode_binary_header(buf: &[u8; BINARY_HEADER_SIZE], order: ByteOrder) -> BinaryHeader {
    let word = |o: usize| [buf[o], buf[o + 1], buf[o + 2], buf[o + 3]];
    BinaryHeader {
        magic: word(0),
        length: order.read_i32(word(4)),
        msg_type: order.read_i32(word(8)),
        extra: order.read_i32(word(12)),
    }
}

/// Build a binary header. The length is written as given, so callers can
/// also produce deliberately broken headers.
pub fn encode_binary_header(
    length: i32,
    msg_type: i32,
    extra: i32,
    order: ByteOrder,
) -> [u8; BINARY_HEADER_SIZE] {
    let mut out = [0u8; BINARY_HEADER_SIZE];
    out[0..4].copy_from_slice(&MAGIC);
    out[4..8].copy_from_slice(&order.write_i32(length));
    out[8..12].copy_from_slice(&order.write_i32(msg_type));
    out[12..16].copy_from_slice(&order.write_i32(extra));
    out
}

/// Encode a full binary frame around `payload`.
pub fn encode_binary_frame(
    payload: &[u8],
    msg_type: i32,
    extra: i32,
    order: ByteOrder,
) -> Result<Bytes, ProtocolError> {
    if payload.len() as i64 > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadOutOfBounds(payload.len() as i64));
    }

    let mut frame = BytesMut::with_capacity(BINARY_HEADER_SIZE + payload.len());
    frame.put_slice(&encode_binary_header(payload.len() as i32, msg_type, extra, order));
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Read until `buf` holds at least `target` bytes. Each read may wait up to
/// `stall`; a read that produces nothing within that window is a stall.
/// Bytes past `target` stay buffered for the next frame.
async fn fill_to<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    target: usize,
    stall: Duration,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    if buf.capacity() < target {
        buf.reserve(target - buf.len());
    }
    while buf.len() < target {
        match tokio::time::timeout(stall, reader.read_buf(buf)).await {
            Ok(Ok(0)) => return Err(ProtocolError::ConnectionClosed),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(ProtocolError::Stalled {
                    expected: target,
                    received: buf.len(),
                })
            }
        }
    }
    Ok(())
}

/// Read exactly `n` bytes, failing if the stream stalls for `stall`.
pub async fn read_exactly<R>(reader: &mut R, n: usize, stall: Duration) -> Result<Bytes, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut out = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        match tokio::time::timeout(stall, reader.read(&mut out[filled..])).await {
            Ok(Ok(0)) => return Err(ProtocolError::ConnectionClosed),
            Ok(Ok(got)) => filled += got,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(ProtocolError::Stalled {
                    expected: n,
                    received: filled,
                })
            }
        }
    }
    Ok(Bytes::from(out))
}

/// Incremental reader of inbound binary frames.
///
/// Waiting for a header is bounded by the caller's poll window so a drain
/// loop can check its deadline between polls. Once a header is validated the
/// payload is read with `read_exactly` semantics.
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    order: ByteOrder,
    stall: Duration,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, order: ByteOrder, stall: Duration) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(64 * 1024),
            order,
            stall,
        }
    }

    /// Wait up to `wait` for the next frame.
    ///
    /// Returns `Ok(None)` if no complete header is buffered yet. Desync
    /// errors leave the offending bytes in the buffer (see [`Self::buffered`]).
    pub async fn next_frame(&mut self, wait: Duration) -> Result<Option<Frame>, ProtocolError> {
        if self.buf.len() < BINARY_HEADER_SIZE {
            match tokio::time::timeout(wait, self.reader.read_buf(&mut self.buf)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => return Err(ProtocolError::ConnectionClosed),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
            }
            if self.buf.len() < BINARY_HEADER_SIZE {
                return Ok(None);
            }
        }

        let mut raw = [0u8; BINARY_HEADER_SIZE];
        raw.copy_from_slice(&self.buf[..BINARY_HEADER_SIZE]);
        let header = decode_binary_header(&raw, self.order);
        let len = header.payload_len()?;

        fill_to(&mut self.reader, &mut self.buf, BINARY_HEADER_SIZE + len, self.stall).await?;
        self.buf.advance(BINARY_HEADER_SIZE);
        let payload = self.buf.split_to(len).freeze();

        Ok(Some(Frame {
            kind: FrameKind::Binary,
            payload,
            msg_type: header.msg_type,
            extra: header.extra,
        }))
    }

    /// Bound payload reads; a drain loop shrinks this as its deadline nears.
    pub fn set_stall_timeout(&mut self, stall: Duration) {
        self.stall = stall.max(Duration::from_millis(1));
    }

    /// Bytes received but not yet consumed as frames.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Keep reading raw bytes into the buffer until `deadline`, peer close,
    /// or `limit` buffered bytes. Used once framing has been lost.
    pub async fn capture_raw(&mut self, deadline: tokio::time::Instant, limit: usize) -> usize {
        let start = self.buf.len();
        while self.buf.len() < limit {
            let read = tokio::time::timeout_at(deadline, self.reader.read_buf(&mut self.buf)).await;
            match read {
                Ok(Ok(n)) if n > 0 => {}
                _ => break,
            }
        }
        self.buf.truncate(limit.max(start));
        self.buf.len() - start
    }
}
