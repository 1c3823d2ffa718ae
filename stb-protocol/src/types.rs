//! Message type definitions for the STB control protocol.

use std::io::Cursor;

use bytes::Bytes;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Magic bytes opening every inbound binary frame.
pub const MAGIC: [u8; 4] = *b"GCDH";

/// Binary header size: 4 (magic) + 4 (length) + 4 (type) + 4 (extra) = 16 bytes.
pub const BINARY_HEADER_SIZE: usize = 16;

/// Maximum binary payload size (8 MiB).
pub const MAX_PAYLOAD_SIZE: i64 = 8 * 1024 * 1024;

/// Envelope prefix/suffix around the 7-digit length.
pub const ENVELOPE_START: &[u8; 5] = b"Start";
pub const ENVELOPE_END: &[u8; 3] = b"End";

/// Envelope header size: "Start" + 7 digits + "End" = 15 bytes.
pub const ENVELOPE_HEADER_SIZE: usize = 15;

/// Largest body expressible in the 7-digit length field.
pub const MAX_ENVELOPE_BODY: usize = 9_999_999;

/// Output cap for a single inflate (2 MiB).
pub const MAX_INFLATE_SIZE: usize = 2 * 1024 * 1024;

/// HTTP port the STB serves live streams on.
pub const STREAM_PORT: u16 = 8085;

/// Build the conventional stream URL for a channel.
pub fn stream_url(stb_ip: &str, channel_id: &str) -> String {
    format!("http://{}:{}/player.{}", stb_ip, STREAM_PORT, channel_id)
}

/// Byte order of the three integers in a binary header.
///
/// Firmware builds disagree on this for the same field layout, so it is
/// carried per negotiation candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[serde(alias = "le")]
    Little,
    #[serde(alias = "be")]
    Big,
}

impl ByteOrder {
    pub fn read_i32(self, bytes: [u8; 4]) -> i32 {
        match self {
            ByteOrder::Little => i32::from_le_bytes(bytes),
            ByteOrder::Big => i32::from_be_bytes(bytes),
        }
    }

    pub fn write_i32(self, value: i32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    /// Short label used in logs ("LE"/"BE").
    pub fn short_name(self) -> &'static str {
        match self {
            ByteOrder::Little => "LE",
            ByteOrder::Big => "BE",
        }
    }
}

/// Which of the two framings a frame travelled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// ASCII `Start<len>End` envelope (outbound only).
    Envelope,
    /// 16-byte `GCDH` header framing (inbound only).
    Binary,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
    pub msg_type: i32,
    pub extra: i32,
}

impl Frame {
    /// Zero-length binary frames are keep-alives.
    pub fn is_keep_alive(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Candidate tune-by-id verbs. Which one a firmware honours is unknown,
/// so the tuner sends all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TuneVerb {
    ChangeService,
    ZapService,
    PlayProgram,
}

impl TuneVerb {
    pub const ALL: [TuneVerb; 3] = [
        TuneVerb::ChangeService,
        TuneVerb::ZapService,
        TuneVerb::PlayProgram,
    ];

    pub fn code(self) -> u16 {
        match self {
            TuneVerb::ChangeService => 1001,
            TuneVerb::ZapService => 1010,
            TuneVerb::PlayProgram => 1011,
        }
    }

    /// JSON field carrying the channel id for this verb.
    pub fn id_field(self) -> &'static str {
        match self {
            TuneVerb::ChangeService | TuneVerb::ZapService => "ServiceID",
            TuneVerb::PlayProgram => "ProgramID",
        }
    }
}

/// Control verbs seen in captured client bursts. Their meaning is not
/// documented; they are replayed verbatim.
pub const CONTROL_VERBS: [u16; 6] = [12, 16, 20, 22, 23, 24];

/// Request sent to the STB control port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// XML login (998).
    Login { label: String, device_id: String },
    /// Handshake (1012).
    Hello,
    /// List-mode selector (1007).
    ListModeSelect,
    /// Windowed channel list query (0).
    ListWindow { from: u32, to: u32 },
    /// Heartbeat (26).
    Heartbeat,
    /// One of [`CONTROL_VERBS`].
    Control(u16),
    /// Tune by list position (1000).
    TuneByIndex { index: u32 },
    /// Tune by service id (1001/1010/1011).
    TuneById { verb: TuneVerb, id: String },
    /// Ask for the URL of what is currently playing (1009).
    CurrentPlayUrl,
}

impl Command {
    /// Numeric request code.
    pub fn request_code(&self) -> u16 {
        match self {
            Command::Login { .. } => 998,
            Command::Hello => 1012,
            Command::ListModeSelect => 1007,
            Command::ListWindow { .. } => 0,
            Command::Heartbeat => 26,
            Command::Control(code) => *code,
            Command::TuneByIndex { .. } => 1000,
            Command::TuneById { verb, .. } => verb.code(),
            Command::CurrentPlayUrl => 1009,
        }
    }

    /// Render the UTF-8 body carried inside the envelope.
    pub fn body(&self) -> Result<String, ProtocolError> {
        match self {
            Command::Login { label, device_id } => login_body(label, device_id)
                .map_err(|e| ProtocolError::Encode(e.to_string())),
            _ => {
                let mut fields = Map::new();
                match self {
                    Command::ListWindow { from, to } => {
                        fields.insert("FromIndex".into(), Value::String(from.to_string()));
                        fields.insert("ToIndex".into(), Value::String(to.to_string()));
                    }
                    Command::TuneByIndex { index } => {
                        fields.insert("ChannelIndex".into(), Value::String(index.to_string()));
                    }
                    Command::TuneById { verb, id } => {
                        fields.insert(verb.id_field().into(), Value::String(id.clone()));
                    }
                    _ => {}
                }
                fields.insert(
                    "request".into(),
                    Value::String(self.request_code().to_string()),
                );
                Ok(Value::Object(fields).to_string())
            }
        }
    }
}

/// Declaration line the STB expects ahead of the login document.
const XML_DECLARATION: &str = "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>\n";

/// `<Command request="998"><data>label</data><uuid>id</uuid></Command>`
fn login_body(label: &str, device_id: &str) -> Result<String, quick_xml::Error> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut command = BytesStart::new("Command");
    command.push_attribute(("request", "998"));
    writer.write_event(Event::Start(command))?;
    for (tag, text) in [("data", label), ("uuid", device_id)] {
        writer.write_event(Event::Start(BytesStart::new(tag)))?;
        writer.write_event(Event::Text(BytesText::new(text)))?;
        writer.write_event(Event::End(BytesEnd::new(tag)))?;
    }
    writer.write_event(Event::End(BytesEnd::new("Command")))?;

    let xml = String::from_utf8_lossy(&writer.into_inner().into_inner()).into_owned();
    Ok(format!("{}{}", XML_DECLARATION, xml))
}
