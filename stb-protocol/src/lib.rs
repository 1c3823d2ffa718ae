//! Wire protocol definitions for the GCDH set-top box control port.
//!
//! The STB speaks an undocumented protocol on a TCP control port. Requests
//! are UTF-8 JSON (or, for login, XML) wrapped in an ASCII envelope;
//! responses come back in a 16-byte binary framing whose integer byte order
//! differs between firmware builds.
//!
//! # Frame Formats
//!
//! ```text
//! outbound:  "Start" | 7-digit length | "End" | body
//! inbound:   "GCDH"  | length i32 | type i32 | extra i32 | payload
//! ```
//!
//! # Example
//!
//! ```rust
//! use stb_protocol::{encode_command, decode_envelope, Command};
//!
//! let encoded = encode_command(&Command::ListWindow { from: 0, to: 99 }).unwrap();
//! assert!(encoded.starts_with(b"Start0000046End"));
//!
//! let frame = decode_envelope(&encoded).unwrap().unwrap();
//! assert_eq!(&frame.payload[..], br#"{"FromIndex":"0","ToIndex":"99","request":"0"}"#);
//! ```
//!
//! ```rust
//! use stb_protocol::{decode_binary_header, encode_binary_header, ByteOrder};
//!
//! let raw = encode_binary_header(128, 0, 0, ByteOrder::Big);
//! let header = decode_binary_header(&raw, ByteOrder::Big);
//! assert!(header.magic_ok());
//! assert_eq!(header.payload_len().unwrap(), 128);
//! ```

pub mod codec;
pub mod error;
pub mod inflate;
pub mod types;

pub use codec::{
    decode_binary_header, decode_envelope, decode_envelope_header, encode_binary_frame,
    encode_binary_header, encode_command, encode_envelope, read_exactly, BinaryHeader,
    FrameReader,
};
pub use error::ProtocolError;
pub use inflate::{decode_payload, inflate, is_zlib_header, scan_for_zlib_streams, DecodedPayload};
pub use types::{
    stream_url, ByteOrder, Command, Frame, FrameKind, TuneVerb, BINARY_HEADER_SIZE,
    CONTROL_VERBS, ENVELOPE_HEADER_SIZE, MAGIC, MAX_ENVELOPE_BODY, MAX_INFLATE_SIZE,
    MAX_PAYLOAD_SIZE, STREAM_PORT,
};
