//! Socket transport layer
//!
//! The [`SocketTransport`] trait is the seam between the protocol core and
//! the wire: send a text frame, drain whatever frames have arrived, report
//! connection state. [`WebSocketTransport`] speaks RFC 6455 to Chrome's
//! DevTools endpoint; [`MockTransport`] is the in-memory stand-in tests use
//! to stage inbound frames and inspect outbound ones.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Transport capability set consumed by the connection layer.
///
/// All operations report outcomes rather than raising: a failed write is
/// `false`, a drain on a closed socket is an empty batch. The connection
/// decides which of those are fatal.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    /// Open the underlying socket. Returns whether a state transition
    /// occurred (false if already connected or the connect failed).
    async fn connect(&self) -> bool;

    /// Whether the socket is currently open
    async fn is_connected(&self) -> bool;

    /// Close the socket. Returns whether a state transition occurred.
    async fn disconnect(&self, reason: &str) -> bool;

    /// Write one text frame. Returns whether the write succeeded.
    async fn send_data(&self, data: &str) -> bool;

    /// Drain all text frames currently available without waiting for more
    async fn receive_data(&self) -> Vec<String>;
}

/// WebSocket opcodes we care about
mod ws {
    pub const OPCODE_TEXT: u8 = 0x1;
    pub const OPCODE_CLOSE: u8 = 0x8;
    pub const OPCODE_PING: u8 = 0x9;
    pub const OPCODE_PONG: u8 = 0xA;
}

/// Encode a single masked client frame (RFC 6455 requires clients to mask)
fn encode_frame(opcode: u8, data: &[u8]) -> Vec<u8> {
    let len = data.len();
    let mut frame = Vec::with_capacity(14 + len);

    // FIN + opcode
    frame.push(0x80 | opcode);

    // Mask bit set, then length
    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 65536 {
        frame.push(0x80 | 126);
        frame.push((len >> 8) as u8);
        frame.push(len as u8);
    } else {
        frame.push(0x80 | 127);
        for i in (0..8).rev() {
            frame.push((len >> (i * 8)) as u8);
        }
    }

    // Fresh masking key per frame
    let mask: [u8; 4] = rand::random();
    frame.extend_from_slice(&mask);
    for (i, byte) in data.iter().enumerate() {
        frame.push(byte ^ mask[i % 4]);
    }

    frame
}

/// Try to parse one complete frame from the front of `buf`.
///
/// Returns `(opcode, payload, bytes_consumed)`, or None if the buffer does
/// not yet hold a whole frame.
fn parse_frame(buf: &[u8]) -> Option<(u8, Vec<u8>, usize)> {
    if buf.len() < 2 {
        return None;
    }

    let opcode = buf[0] & 0x0F;
    let masked = (buf[1] & 0x80) != 0;
    let mut len = (buf[1] & 0x7F) as usize;
    let mut offset = 2;

    if len == 126 {
        if buf.len() < 4 {
            return None;
        }
        len = ((buf[2] as usize) << 8) | (buf[3] as usize);
        offset = 4;
    } else if len == 127 {
        if buf.len() < 10 {
            return None;
        }
        len = 0;
        for byte in &buf[2..10] {
            len = (len << 8) | (*byte as usize);
        }
        offset = 10;
    }

    let mask = if masked {
        if buf.len() < offset + 4 {
            return None;
        }
        let m = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(m)
    } else {
        None
    };

    if buf.len() < offset + len {
        return None;
    }

    let mut payload = buf[offset..offset + len].to_vec();
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Some((opcode, payload, offset + len))
}

/// Open socket state: the stream plus bytes of a partially received frame
struct WsStream {
    stream: TcpStream,
    rx_buf: Vec<u8>,
}

/// WebSocket client transport for a `ws://` DevTools endpoint.
///
/// Reads are drained in batches: `receive_data` pulls whatever bytes the
/// socket holds and returns every complete text frame, keeping partial
/// frame bytes for the next call. Ping frames are answered inline; a close
/// frame tears the connection down.
pub struct WebSocketTransport {
    host_port: String,
    path: String,
    state: Mutex<Option<WsStream>>,
}

impl WebSocketTransport {
    /// Create a transport for a `ws://host:port/path` URL. Does not connect.
    pub fn new(ws_url: &str) -> Result<Self> {
        let rest = ws_url
            .strip_prefix("ws://")
            .ok_or_else(|| Error::transport(format!("unsupported WebSocket URL: {ws_url}")))?;

        let (host_port, path) = match rest.split_once('/') {
            Some((host, path)) => (host.to_string(), format!("/{path}")),
            None => (rest.to_string(), "/".to_string()),
        };

        Ok(Self {
            host_port,
            path,
            state: Mutex::new(None),
        })
    }

    fn handshake(&self) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.host_port)
            .map_err(|e| Error::transport_io("Failed to connect to DevTools endpoint", e))?;

        let key = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            rand::random::<[u8; 16]>(),
        );

        let request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            self.path, self.host_port, key
        );

        stream
            .write_all(request.as_bytes())
            .map_err(|e| Error::transport_io("Handshake write failed", e))?;

        // Read status line + headers up to the blank line
        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") && response.len() < 4096 {
            let n = stream
                .read(&mut byte)
                .map_err(|e| Error::transport_io("Handshake read failed", e))?;
            if n == 0 {
                break;
            }
            response.push(byte[0]);
        }

        let response = String::from_utf8_lossy(&response);
        if !response.contains("101") {
            return Err(Error::transport(format!(
                "WebSocket handshake failed: {}",
                response.lines().next().unwrap_or("")
            )));
        }

        // Short read timeout so receive_data returns instead of blocking
        stream
            .set_read_timeout(Some(Duration::from_millis(1)))
            .map_err(|e| Error::transport_io("Failed to set read timeout", e))?;

        tracing::debug!("WebSocket connected to ws://{}{}", self.host_port, self.path);
        Ok(stream)
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return false;
        }
        match self.handshake() {
            Ok(stream) => {
                *state = Some(WsStream {
                    stream,
                    rx_buf: Vec::new(),
                });
                true
            }
            Err(e) => {
                tracing::warn!("WebSocket connect failed: {}", e);
                false
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.is_some()
    }

    async fn disconnect(&self, reason: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.take() {
            Some(mut ws) => {
                tracing::debug!("Disconnecting WebSocket: {}", reason);
                let _ = ws.stream.write_all(&encode_frame(ws::OPCODE_CLOSE, &[]));
                let _ = ws.stream.shutdown(std::net::Shutdown::Both);
                true
            }
            None => false,
        }
    }

    async fn send_data(&self, data: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(ws) = state.as_mut() else {
            tracing::warn!("send_data on a disconnected transport");
            return false;
        };

        match ws.stream.write_all(&encode_frame(ws::OPCODE_TEXT, data.as_bytes())) {
            Ok(()) => ws.stream.flush().is_ok(),
            Err(e) => {
                tracing::warn!("WebSocket write failed: {}", e);
                false
            }
        }
    }

    async fn receive_data(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let Some(ws) = state.as_mut() else {
            return Vec::new();
        };

        // Pull everything the socket currently holds
        let mut peer_closed = false;
        let mut chunk = [0u8; 4096];
        loop {
            match ws.stream.read(&mut chunk) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => ws.rx_buf.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(e) => {
                    tracing::warn!("WebSocket read failed: {}", e);
                    peer_closed = true;
                    break;
                }
            }
        }

        // Split off every complete frame
        let mut frames = Vec::new();
        while let Some((opcode, payload, consumed)) = parse_frame(&ws.rx_buf) {
            ws.rx_buf.drain(..consumed);
            match opcode {
                ws::OPCODE_TEXT => match String::from_utf8(payload) {
                    Ok(text) => frames.push(text),
                    Err(_) => tracing::warn!("dropping non-UTF-8 text frame"),
                },
                ws::OPCODE_PING => {
                    let _ = ws.stream.write_all(&encode_frame(ws::OPCODE_PONG, &payload));
                }
                ws::OPCODE_CLOSE => {
                    tracing::debug!("WebSocket closed by server");
                    peer_closed = true;
                }
                _ => {}
            }
        }

        if peer_closed {
            *state = None;
        }

        frames
    }
}

/// In-memory transport for tests: stage inbound frames with
/// [`MockTransport::stage`], inspect outbound ones with
/// [`MockTransport::sent`].
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    reject_sends: AtomicBool,
    inbound: Mutex<VecDeque<String>>,
    outbound: Mutex<Vec<String>>,
}

impl MockTransport {
    /// Create a disconnected mock
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame to be returned by the next `receive_data` drain
    pub async fn stage(&self, frame: impl Into<String>) {
        self.inbound.lock().await.push_back(frame.into());
    }

    /// Frames written so far, oldest first
    pub async fn sent(&self) -> Vec<String> {
        self.outbound.lock().await.clone()
    }

    /// Make subsequent `send_data` calls report failure
    pub fn reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl SocketTransport for MockTransport {
    async fn connect(&self) -> bool {
        !self.connected.swap(true, Ordering::SeqCst)
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self, _reason: &str) -> bool {
        self.connected.swap(false, Ordering::SeqCst)
    }

    async fn send_data(&self, data: &str) -> bool {
        if !self.connected.load(Ordering::SeqCst) || self.reject_sends.load(Ordering::SeqCst) {
            return false;
        }
        self.outbound.lock().await.push(data.to_string());
        true
    }

    async fn receive_data(&self) -> Vec<String> {
        self.inbound.lock().await.drain(..).collect()
    }
}

/// Launch a browser binary and scrape the DevTools WebSocket URL.
///
/// The browser prints `DevTools listening on ws://127.0.0.1:PORT/...` on
/// stderr once the debugging endpoint is up.
pub fn launch_chrome(path: &std::path::Path, args: &[String]) -> Result<(Child, String)> {
    use std::process::Command;

    let mut cmd = Command::new(path);
    cmd.args(args)
        .args(["--remote-debugging-port=0"]) // let the browser pick a free port
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Launch(format!("Failed to spawn browser: {e}")))?;

    let stderr = child
        .stderr
        .take()
        .ok_or(Error::Launch("No stderr from browser".into()))?;

    let reader = BufReader::new(stderr);
    let mut ws_url = None;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        tracing::trace!("browser stderr: {}", line);

        if line.contains("DevTools listening on") {
            if let Some(url_start) = line.find("ws://") {
                ws_url = Some(line[url_start..].trim().to_string());
                break;
            }
        }
    }

    let ws_url = ws_url.ok_or(Error::Launch(
        "Failed to get DevTools WebSocket URL from browser".into(),
    ))?;

    tracing::info!("DevTools URL: {}", ws_url);

    Ok((child, ws_url))
}
