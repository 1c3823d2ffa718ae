//! One TCP attempt against one candidate.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use stb_protocol::{
    decode_payload, encode_command, scan_for_zlib_streams, Command, FrameReader, ProtocolError,
    MAX_PAYLOAD_SIZE,
};

use crate::config::SessionSection;
use crate::error::{ClientError, Result};
use crate::session::candidate::CandidateConfig;
use crate::trace::Trace;

/// Upper bound on raw bytes kept once framing is lost.
const MAX_RAW_CAPTURE: usize = MAX_PAYLOAD_SIZE as usize;

/// Timing knobs for one attempt.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub drain_timeout: Duration,
    pub poll_interval: Duration,
    pub send_delay: Duration,
    pub login_delay: Duration,
    pub stall_timeout: Duration,
}

impl From<&SessionSection> for SessionSettings {
    fn from(s: &SessionSection) -> Self {
        Self {
            connect_timeout: s.connect_timeout(),
            drain_timeout: s.drain_timeout(),
            poll_interval: s.poll_interval(),
            send_delay: s.send_delay(),
            login_delay: s.login_delay(),
            stall_timeout: s.stall_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionSection::default())
    }
}

/// What the login announces about this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub label: String,
    pub id: String,
}

/// Lifecycle of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Connecting,
    ConnectFailed,
    Connected,
    Sending,
    Draining,
    NonEmptyCatalog,
    EmptyCatalog,
    Closed,
}

/// Why draining stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainEnd {
    /// Overall deadline elapsed.
    Deadline,
    /// Frame sync lost; draining aborted.
    Desync(ProtocolError),
    /// Peer closed the connection.
    PeerClosed,
    /// Stall or I/O failure mid-frame.
    ReadError(ProtocolError),
    /// The caller's stop condition matched a payload.
    Satisfied,
}

impl fmt::Display for DrainEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainEnd::Deadline => write!(f, "deadline"),
            DrainEnd::Desync(e) => write!(f, "desync ({})", e),
            DrainEnd::PeerClosed => write!(f, "peer closed"),
            DrainEnd::ReadError(e) => write!(f, "read error ({})", e),
            DrainEnd::Satisfied => write!(f, "satisfied"),
        }
    }
}

/// Per-call session state. Dropped (and its socket closed) when the call ends.
#[derive(Debug)]
pub struct Session {
    pub ip: String,
    pub candidate: CandidateConfig,
    pub sent_frames: usize,
    pub received_payloads: Vec<Bytes>,
    pub deadline: Instant,
    pub frames: usize,
    pub keep_alives: usize,
    state: AttemptState,
}

impl Session {
    pub fn new(ip: impl Into<String>, candidate: CandidateConfig, settings: &SessionSettings) -> Self {
        Self {
            ip: ip.into(),
            candidate,
            sent_frames: 0,
            received_payloads: Vec::new(),
            deadline: Instant::now() + settings.connect_timeout + settings.drain_timeout,
            frames: 0,
            keep_alives: 0,
            state: AttemptState::Idle,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    fn transition(&mut self, next: AttemptState) {
        debug!(
            "[Session {}:{}] {:?} -> {:?}",
            self.ip, self.candidate.port, self.state, next
        );
        self.state = next;
    }

    /// Open the TCP connection for this candidate.
    pub async fn connect(&mut self, settings: &SessionSettings, trace: &mut Trace) -> Result<TcpStream> {
        self.transition(AttemptState::Connecting);
        let addr = format!("{}:{}", self.ip, self.candidate.port);
        trace.push(format!("Connecting {} ({})", addr, self.candidate));

        let result = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(&addr)).await;
        let stream = match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.transition(AttemptState::ConnectFailed);
                return Err(ClientError::Connect {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.transition(AttemptState::ConnectFailed);
                return Err(ClientError::Connect {
                    addr,
                    reason: format!("timed out after {:?}", settings.connect_timeout),
                });
            }
        };

        // Disable Nagle's algorithm so each envelope leaves immediately
        stream.set_nodelay(true)?;
        self.transition(AttemptState::Connected);
        info!("[Session {}] Connected ({})", addr, self.candidate);
        Ok(stream)
    }

    /// Send the login (if required) and the candidate's command sequence,
    /// then drain responses until deadline, desync, close, or `stop`.
    pub async fn run<S, F>(
        &mut self,
        stream: S,
        identity: &DeviceIdentity,
        settings: &SessionSettings,
        trace: &mut Trace,
        stop: F,
    ) -> DrainEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: FnMut(&[u8]) -> bool,
    {
        let (reader, mut writer) = tokio::io::split(stream);

        self.transition(AttemptState::Sending);
        if let Err(e) = self.send_all(&mut writer, identity, settings, trace).await {
            // The peer may still have answered before failing; drain anyway.
            warn!("[Session {}:{}] Send failed: {}", self.ip, self.candidate.port, e);
            trace.push(format!("send failed after {} frames: {}", self.sent_frames, e));
        }

        self.transition(AttemptState::Draining);
        self.deadline = Instant::now() + settings.drain_timeout;
        let reader = FrameReader::new(reader, self.candidate.header_byte_order, settings.stall_timeout);
        self.drain(reader, settings, trace, stop).await
    }

    async fn send_all<W>(
        &mut self,
        writer: &mut W,
        identity: &DeviceIdentity,
        settings: &SessionSettings,
        trace: &mut Trace,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if self.candidate.requires_login {
            let login = Command::Login {
                label: identity.label.clone(),
                device_id: identity.id.clone(),
            };
            self.send(writer, &login).await?;
            trace.push(format!("login sent as {:?}", identity.label));
            tokio::time::sleep(settings.login_delay).await;
        }

        let commands = self.candidate.command_sequence.clone();
        for cmd in &commands {
            self.send(writer, cmd).await?;
            if !settings.send_delay.is_zero() {
                tokio::time::sleep(settings.send_delay).await;
            }
        }
        trace.push(format!("sent {} frames", self.sent_frames));
        Ok(())
    }

    async fn send<W>(&mut self, writer: &mut W, cmd: &Command) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = encode_command(cmd)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        self.sent_frames += 1;
        Ok(())
    }

    async fn drain<R, F>(
        &mut self,
        mut reader: FrameReader<R>,
        settings: &SessionSettings,
        trace: &mut Trace,
        mut stop: F,
    ) -> DrainEnd
    where
        R: AsyncRead + Unpin,
        F: FnMut(&[u8]) -> bool,
    {
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                return DrainEnd::Deadline;
            }
            let remaining = self.deadline - now;
            reader.set_stall_timeout(settings.stall_timeout.min(remaining));

            let frame = match reader.next_frame(settings.poll_interval.min(remaining)).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(ProtocolError::ConnectionClosed) => return DrainEnd::PeerClosed,
                Err(e @ ProtocolError::InvalidMagic(_)) => {
                    trace.push(format!("no frame header found ({}), capturing raw bytes", e));
                    self.salvage_raw(&mut reader, trace).await;
                    return DrainEnd::Desync(e);
                }
                Err(e) if e.is_desync() => {
                    trace.push(format!("desync: {}", e));
                    return DrainEnd::Desync(e);
                }
                Err(e) => {
                    trace.push(format!("read error: {}", e));
                    return DrainEnd::ReadError(e);
                }
            };

            self.frames += 1;
            if frame.is_keep_alive() {
                self.keep_alives += 1;
                continue;
            }

            let decoded = decode_payload(&frame.payload);
            trace.push(format!(
                "frame type={} extra={} len={} {} textLen={}",
                frame.msg_type,
                frame.extra,
                frame.payload.len(),
                if decoded.was_compressed { "zlib" } else { "plain" },
                decoded.bytes.len()
            ));
            let payload = Bytes::from(decoded.bytes);
            let satisfied = stop(&payload);
            self.received_payloads.push(payload);
            if satisfied {
                return DrainEnd::Satisfied;
            }
        }
    }

    /// Keep reading raw bytes until the deadline and pull out any embedded
    /// zlib streams.
    async fn salvage_raw<R>(&mut self, reader: &mut FrameReader<R>, trace: &mut Trace)
    where
        R: AsyncRead + Unpin,
    {
        let added = reader.capture_raw(self.deadline, MAX_RAW_CAPTURE).await;
        let streams = scan_for_zlib_streams(reader.buffered());
        trace.push(format!(
            "raw capture: {} bytes ({} after desync), {} zlib streams",
            reader.buffered().len(),
            added,
            streams.len()
        ));
        self.received_payloads
            .extend(streams.into_iter().map(|text| Bytes::from(text.into_bytes())));
    }

    /// Record the extraction verdict and close the attempt.
    pub fn finish(&mut self, catalog_found: bool) {
        self.transition(if catalog_found {
            AttemptState::NonEmptyCatalog
        } else {
            AttemptState::EmptyCatalog
        });
        self.transition(AttemptState::Closed);
    }
}
