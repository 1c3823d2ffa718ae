//! Loopback STB used by tests.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use stb_protocol::{decode_envelope, encode_binary_frame, ByteOrder, ENVELOPE_HEADER_SIZE};

pub(crate) fn zlib(text: &str) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(text.as_bytes()).unwrap();
    enc.finish().unwrap()
}

/// Binary frame carrying `text` zlib-compressed.
pub(crate) fn zlib_frame(text: &str, order: ByteOrder) -> Bytes {
    encode_binary_frame(&zlib(text), 0, 0, order).unwrap()
}

/// Port that refuses connections.
pub(crate) async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Accepts connections, records every envelope body received, writes the
/// scripted responses once the first envelope arrives, and closes after the
/// request with code `last_request` (or after `hold`).
pub(crate) struct MockStb {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<String>>>,
    pub connections: Arc<Mutex<usize>>,
    handle: JoinHandle<()>,
}

impl MockStb {
    pub async fn start(responses: Vec<Bytes>, last_request: u16, hold: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));

        let reqs = requests.clone();
        let conns = connections.clone();
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                *conns.lock() += 1;
                let reqs = reqs.clone();
                let responses = responses.clone();
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(
                        hold,
                        serve(socket, responses, reqs, last_request),
                    )
                    .await;
                });
            }
        });

        Self {
            port,
            requests,
            connections,
            handle,
        }
    }
}

impl Drop for MockStb {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    responses: Vec<Bytes>,
    requests: Arc<Mutex<Vec<String>>>,
    last_request: u16,
) {
    let marker = format!("\"request\":\"{}\"", last_request);
    let mut buf = BytesMut::new();
    let mut responded = false;

    loop {
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let mut done = false;
        while let Ok(Some(frame)) = decode_envelope(&buf) {
            let body = String::from_utf8_lossy(&frame.payload).to_string();
            buf.advance(ENVELOPE_HEADER_SIZE + frame.payload.len());
            done |= body.contains(&marker);
            requests.lock().push(body);
        }
        if !responded && !requests.lock().is_empty() {
            responded = true;
            for frame in &responses {
                if socket.write_all(frame).await.is_err() {
                    return;
                }
            }
        }
        if done {
            let _ = socket.shutdown().await;
            return;
        }
    }
}

/// HTTP endpoint standing in for the STB remote-control API. Counts key
/// requests and answers each with an empty 200.
pub(crate) struct KeyEndpoint {
    pub port: u16,
    presses: Arc<Mutex<usize>>,
    handle: JoinHandle<()>,
}

impl KeyEndpoint {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let presses = Arc::new(Mutex::new(0));

        let count = presses.clone();
        let handle = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let count = count.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    if buf.starts_with(b"GET /api/remotecontrol") {
                        *count.lock() += 1;
                    }
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            port,
            presses,
            handle,
        }
    }

    pub fn presses(&self) -> usize {
        *self.presses.lock()
    }
}

impl Drop for KeyEndpoint {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
