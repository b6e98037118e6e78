//! Control channel wire format and client.
//!
//! One JSON request line goes up; the service answers with zero or more frames,
//! each a JSON string on its own line, then a single empty line. Because every
//! frame is a JSON literal (`""` at minimum), an empty raw line can only mean
//! "end of response".

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);
pub const MAX_REQUEST_BYTES: usize = 4096;
const MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unable to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("control i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Frame(String),
    #[error("malformed request: {0}")]
    Request(String),
    #[error("request exceeds {MAX_REQUEST_BYTES} bytes")]
    RequestTooLong,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub auth: String,
    pub command: String,
}

impl Request {
    pub fn new(auth: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            auth: auth.into(),
            command: command.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ControlError> {
        let line = serde_json::to_string(self).map_err(|e| ControlError::Request(e.to_string()))?;
        if line.len() + 1 > MAX_REQUEST_BYTES {
            return Err(ControlError::RequestTooLong);
        }
        Ok(line + "\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    End,
}

pub fn encode_frame(text: &str) -> String {
    // Serializing a &str cannot fail.
    let mut s = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
    s.push('\n');
    s
}

pub fn decode_frame(raw: &str) -> Result<Frame, ControlError> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    if raw.is_empty() {
        return Ok(Frame::End);
    }
    serde_json::from_str::<String>(raw)
        .map(Frame::Line)
        .map_err(|e| ControlError::Frame(format!("{e}: {raw:?}")))
}

pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// What a client saw before completion or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlOutcome {
    /// Non-empty content lines delivered to the caller.
    pub results: usize,
    /// The end-of-response marker arrived before the deadline.
    pub completed: bool,
}

impl ControlOutcome {
    pub fn no_response(&self) -> bool {
        self.results == 0
    }
}

/// Send `req` to `addr` and hand every content line to `on_line` in arrival order.
///
/// The whole exchange (connect included) runs under `wait`. When it elapses the
/// connection is dropped with the exchange, so `on_line` is never called afterwards.
pub async fn send<F>(
    addr: SocketAddr,
    req: &Request,
    wait: Duration,
    mut on_line: F,
) -> Result<ControlOutcome, ControlError>
where
    F: FnMut(&str),
{
    let payload = req.encode()?;
    let mut results = 0usize;

    let exchange = async {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ControlError::Connect { addr, source })?;
        stream.write_all(payload.as_bytes()).await?;
        stream.flush().await?;
        let mut reader = BufReader::new(stream);
        read_frames(&mut reader, |line| {
            results += 1;
            on_line(line);
        })
        .await
    };

    let completed = match tokio::time::timeout(wait, exchange).await {
        Ok(Ok(completed)) => completed,
        Ok(Err(e)) => return Err(e),
        Err(_elapsed) => {
            log::debug!(target: "control", "no end-of-response from {addr} within {wait:?}");
            false
        }
    };

    Ok(ControlOutcome { results, completed })
}

/// Blocking wrapper around [`send`] for the short-lived client process.
pub fn send_blocking<F>(
    addr: SocketAddr,
    req: &Request,
    wait: Duration,
    on_line: F,
) -> Result<ControlOutcome, ControlError>
where
    F: FnMut(&str),
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(send(addr, req, wait, on_line))
}

/// Read frames until the end marker (`Ok(true)`) or EOF (`Ok(false)`).
///
/// Blank content lines are not forwarded.
pub async fn read_frames<R, F>(reader: &mut R, mut on_line: F) -> Result<bool, ControlError>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&str),
{
    let mut buf = String::new();
    loop {
        buf.clear();
        let n = reader
            .take(MAX_FRAME_BYTES as u64)
            .read_line(&mut buf)
            .await?;
        if n == 0 {
            return Ok(false);
        }
        if !buf.ends_with('\n') && n >= MAX_FRAME_BYTES {
            return Err(ControlError::Frame(format!("frame exceeds {MAX_FRAME_BYTES} bytes")));
        }
        match decode_frame(&buf)? {
            Frame::End => return Ok(true),
            Frame::Line(line) if line.is_empty() => {}
            Frame::Line(line) => on_line(&line),
        }
    }
}

/// Service side: read the single request line of a connection.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, ControlError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader
        .take(MAX_REQUEST_BYTES as u64)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Err(ControlError::Request("connection closed before request".into()));
    }
    if !line.ends_with('\n') {
        if n >= MAX_REQUEST_BYTES {
            return Err(ControlError::RequestTooLong);
        }
        return Err(ControlError::Request("request not newline-terminated".into()));
    }
    serde_json::from_str(line.trim_end()).map_err(|e| ControlError::Request(e.to_string()))
}

/// Service side: write `lines` as frames followed by the end marker.
pub async fn write_response<W>(writer: &mut W, lines: &[String]) -> Result<(), ControlError>
where
    W: AsyncWrite + Unpin,
{
    let mut out = String::new();
    for line in lines {
        // Multi-line replies are split so the client prints them as they were written.
        for part in line.split('\n') {
            out.push_str(&encode_frame(part.trim_end_matches('\r')));
        }
    }
    out.push('\n');
    writer.write_all(out.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
