//! Best-effort zlib handling for frame payloads.
//!
//! Payloads are usually zlib-compressed UTF-8 JSON but some firmware sends
//! plain text, so failures here are never errors: callers fall back to the
//! raw bytes.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::types::MAX_INFLATE_SIZE;

/// Inflate a zlib stream into at most [`MAX_INFLATE_SIZE`] bytes.
///
/// A stream cut short still yields whatever it inflated before the cut.
/// Returns None if the data is not zlib or inflates to nothing.
pub fn inflate(compressed: &[u8]) -> Option<Vec<u8>> {
    inflate_prefix(compressed, MAX_INFLATE_SIZE).map(|inflated| inflated.out)
}

const INFLATE_CHUNK: usize = 16 * 1024;

struct Inflated {
    out: Vec<u8>,
    /// Input bytes the decoder used.
    consumed: usize,
    /// False when the decoder failed after producing output.
    complete: bool,
}

/// Inflate a stream starting at the beginning of `data`, keeping the output
/// produced before any decoder error.
fn inflate_prefix(data: &[u8], cap: usize) -> Option<Inflated> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    let mut chunk = vec![0u8; INFLATE_CHUNK];
    let mut complete = true;

    while out.len() < cap {
        let want = chunk.len().min(cap - out.len());
        match decoder.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(_) => {
                complete = false;
                break;
            }
        }
    }

    if out.is_empty() {
        return None;
    }
    Some(Inflated {
        out,
        consumed: decoder.total_in() as usize,
        complete,
    })
}

/// Payload bytes after the best-effort inflate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub bytes: Vec<u8>,
    pub was_compressed: bool,
}

impl DecodedPayload {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Inflate `payload` if possible, otherwise keep it as plain text.
pub fn decode_payload(payload: &[u8]) -> DecodedPayload {
    match inflate(payload) {
        Some(bytes) => DecodedPayload {
            bytes,
            was_compressed: true,
        },
        None => DecodedPayload {
            bytes: payload.to_vec(),
            was_compressed: false,
        },
    }
}

/// Check whether two bytes form a valid zlib stream header (RFC 1950):
/// compression method 8 and the 16-bit big-endian value divisible by 31.
pub fn is_zlib_header(cmf: u8, flg: u8) -> bool {
    cmf & 0x0F == 8 && (u16::from(cmf) << 8 | u16::from(flg)) % 31 == 0
}

/// Locate and decode zlib streams embedded anywhere in a raw capture.
///
/// Used when no frame header can be found. Each offset is checked with
/// [`is_zlib_header`] before trying to inflate; after a hit the scan resumes
/// past the consumed stream. A stream that breaks off partway is kept only
/// when its text opens like a JSON document.
pub fn scan_for_zlib_streams(raw: &[u8]) -> Vec<String> {
    let mut found = Vec::new();
    let mut offset = 0;

    while offset + 1 < raw.len() {
        if is_zlib_header(raw[offset], raw[offset + 1]) {
            if let Some(inflated) = inflate_prefix(&raw[offset..], MAX_INFLATE_SIZE) {
                let text = String::from_utf8_lossy(&inflated.out);
                let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
                let usable = inflated.complete || text.starts_with(&['[', '{'][..]);
                if !text.is_empty() && usable {
                    found.push(text.to_string());
                    offset += inflated.consumed.max(2);
                    continue;
                }
            }
        }
        offset += 1;
    }

    found
}
