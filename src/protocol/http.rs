//! Minimal HTTP/1.1 envelope for the handshake messages
//!
//! Only what the gateway exchange needs: serialize a POST with a body, and
//! read back one response framed by `Content-Length`. Bytes that arrive after
//! the body stay in the caller's buffered reader.

use super::{ProtocolError, MAX_BODY_SIZE};
use bytes::Bytes;
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// HTTP version used for requests and required of responses
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Media type the gateway uses for record payloads
pub const OCTET_STREAM: &str = "application/octet-stream";

/// An outgoing POST request
#[derive(Debug, Clone)]
pub struct Request {
    pub path: String,
    /// Header lines in emission order, excluding Content-Length
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    /// Create a POST to `path`
    pub fn post(path: impl Into<String>, body: Bytes) -> Self {
        Self {
            path: path.into(),
            headers: Vec::new(),
            body,
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serialize head and body
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("POST {} {}\r\n", self.path, HTTP_VERSION);
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }

    /// Write the request and flush
    pub async fn send<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await
    }
}

/// A parsed response
#[derive(Debug, Clone)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub reason: String,
    /// Header names lower-cased
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Response {
    /// Header lookup (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Accept only `HTTP/1.1 200` with an octet-stream body
    pub fn into_octet_stream(self) -> Result<Bytes, ProtocolError> {
        if self.version != HTTP_VERSION {
            return Err(ProtocolError::BadServerResponse(format!(
                "unexpected version {}",
                self.version
            )));
        }
        if self.status != 200 {
            return Err(ProtocolError::BadServerResponse(format!(
                "status {} {}",
                self.status, self.reason
            )));
        }
        match self.header("content-type") {
            Some(ct) if ct.eq_ignore_ascii_case(OCTET_STREAM) => Ok(self.body),
            other => Err(ProtocolError::BadServerResponse(format!(
                "content type {:?}",
                other
            ))),
        }
    }
}

/// Errors while reading a response
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Read one response with a `Content-Length` framed body
pub async fn read_response<R>(reader: &mut R) -> Result<Response, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let status_line = read_line(reader).await?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default().to_string();
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| {
            ProtocolError::BadServerResponse(format!("malformed status line {:?}", status_line))
        })?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = match headers.get("content-length") {
        Some(v) => v.parse::<usize>().map_err(|_| {
            ProtocolError::BadServerResponse(format!("bad content length {:?}", v))
        })?,
        None => 0,
    };
    if length > MAX_BODY_SIZE {
        return Err(ProtocolError::MessageTooLarge(length).into());
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    Ok(Response {
        version,
        status,
        reason,
        headers,
        body: Bytes::from(body),
    })
}

async fn read_line<R>(reader: &mut R) -> Result<String, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    if line.len() > 8192 {
        return Err(ProtocolError::MessageTooLarge(line.len()).into());
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
