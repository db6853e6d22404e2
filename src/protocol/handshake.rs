//! Login exchange with the gateway
//!
//! ```text
//! Idle ─▶ Dialing ─▶ WatermarkSent ─▶ HelloReceived ─▶ AuthSent ─▶ Authenticated
//!            └──────────────┴────────────────┴──────────────┴──────▶ Failed
//! ```
//!
//! The exchange is dressed up as two HTTP POSTs: an "image" upload carrying
//! the watermark, answered by the server hello, then the login record,
//! answered by the auth result.

use super::http::{self, Request, OCTET_STREAM};
use super::pack::{RecordSet, WireValue};
use super::{ProtocolError, AUTHTYPE_PLAIN_PASSWORD, CONNECT_PATH, ERR_AUTH_FAILED, LOGIN_PATH};
use crate::device::DeviceError;
use crate::obfuscation::{Watermark, WATERMARK_CONTENT_TYPE};
use crate::session::ErrorCode;
use crate::transport::{host_of, Dialed, Dialer, TransportError};
use crate::DEFAULT_PORT;
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, info};

/// Format of the `Date` header on the login request
const DATE_FORMAT: &str = "%a %b %-d %H:%M:%S %z %Z %Y";

/// Format of the `timestamp` login field
const TIMESTAMP_FORMAT: &str = "%m%d%H%M%S";

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Connect failed: {0}")]
    Connect(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Login rejected by server (error {code:?})")]
    Rejected { code: Option<u64> },

    #[error("Interface bring-up failed: {0}")]
    Device(#[from] DeviceError),

    #[error("Cancelled")]
    Cancelled,
}

impl From<http::ReadError> for HandshakeError {
    fn from(e: http::ReadError) -> Self {
        match e {
            http::ReadError::Io(e) => HandshakeError::Io(e),
            http::ReadError::Protocol(e) => HandshakeError::Protocol(e),
        }
    }
}

impl HandshakeError {
    /// Error code shown to the user for this failure
    pub fn error_code(&self) -> ErrorCode {
        match self {
            HandshakeError::Rejected { code: Some(code) } if *code == u64::from(ERR_AUTH_FAILED) => {
                ErrorCode::CredentialsRejected
            }
            HandshakeError::Device(_) => ErrorCode::PermissionDenied,
            HandshakeError::Cancelled => ErrorCode::None,
            _ => ErrorCode::ConnectFailed,
        }
    }
}

/// Progress of one login exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Dialing,
    WatermarkSent,
    HelloReceived,
    AuthSent,
    Authenticated,
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Turn user input into `host:port`
///
/// - `[v6]:port` is kept as is
/// - `host:port` (a single colon) is kept as is
/// - a bare IPv6 literal gets brackets and the default port
/// - anything else gets the default port
pub fn normalize_address(host: &str) -> String {
    if host.contains(']') {
        return host.to_string();
    }
    match host.matches(':').count() {
        0 => format!("{}:{}", host, DEFAULT_PORT),
        1 => host.to_string(),
        _ => format!("[{}]:{}", host, DEFAULT_PORT),
    }
}

/// Value for the `Host` header: our local IP, else the target host
pub fn host_header(dialed: &Dialed, addr: &str) -> String {
    match dialed.local_addr {
        Some(local) => local.ip().to_string(),
        None => host_of(addr).to_string(),
    }
}

/// Login credentials
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection tuning fields sent with the login
#[derive(Debug, Clone)]
pub struct HandshakeOptions {
    pub hub: String,
    pub max_connection: u32,
    pub use_encrypt: bool,
    pub use_compress: bool,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            hub: "DEFAULT".to_string(),
            max_connection: 8,
            use_encrypt: true,
            use_compress: false,
        }
    }
}

/// Fields of the server hello echoed back in the login
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerHello {
    pub hello: Option<WireValue>,
    pub version: Option<WireValue>,
    pub build: Option<WireValue>,
}

impl ServerHello {
    pub fn from_record(record: &RecordSet) -> Self {
        Self {
            hello: record.get("hello").cloned(),
            version: record.get("version").cloned(),
            build: record.get("build").cloned(),
        }
    }
}

/// Drives one login exchange
#[derive(Debug)]
pub struct Handshake {
    credentials: Credentials,
    options: HandshakeOptions,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(credentials: Credentials, options: HandshakeOptions) -> Self {
        Self {
            credentials,
            options,
            state: HandshakeState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Open the transport to `addr` (already normalized)
    pub async fn dial(&mut self, dialer: &dyn Dialer, addr: &str) -> Result<Dialed, HandshakeError> {
        self.state = HandshakeState::Dialing;
        debug!(%addr, "Dialing gateway");
        match dialer.dial(addr).await {
            Ok(dialed) => {
                info!(%addr, local = ?dialed.local_addr, "Connection established");
                Ok(dialed)
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(e.into())
            }
        }
    }

    /// Run watermark, hello and login over `stream`
    ///
    /// Returns the auth reply. Anything the gateway sent after it stays in
    /// `stream`'s buffer for the tunnel.
    pub async fn negotiate<S>(
        &mut self,
        stream: &mut BufReader<S>,
        host: &str,
    ) -> Result<RecordSet, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.exchange(stream, host).await;
        if result.is_err() {
            self.state = HandshakeState::Failed;
        }
        result
    }

    async fn exchange<S>(
        &mut self,
        stream: &mut BufReader<S>,
        host: &str,
    ) -> Result<RecordSet, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let watermark = Watermark::generate();
        debug!(len = watermark.len(), "Uploading watermark");
        Request::post(CONNECT_PATH, watermark.into_bytes())
            .header("Connection", "Keep-Alive")
            .header("Content-Type", WATERMARK_CONTENT_TYPE)
            .header("Host", host)
            .send(stream.get_mut())
            .await?;
        self.state = HandshakeState::WatermarkSent;

        let body = http::read_response(stream).await?.into_octet_stream()?;
        let hello = ServerHello::from_record(&RecordSet::decode(&body)?);
        self.state = HandshakeState::HelloReceived;
        debug!(?hello, "Server hello received");

        let login = self.login_record(&hello).encode()?;
        let date = chrono::Local::now().format(DATE_FORMAT).to_string();
        Request::post(LOGIN_PATH, login)
            .header("Connection", "Keep-Alive")
            .header("Content-Type", OCTET_STREAM)
            .header("Date", date)
            .header("Host", host)
            .header("Keep-Alive", "timeout=15; max=19")
            .send(stream.get_mut())
            .await?;
        self.state = HandshakeState::AuthSent;

        let body = http::read_response(stream).await?.into_octet_stream()?;
        let reply = RecordSet::decode(&body)?;
        if let Some(error) = reply.get("error") {
            let code = error.as_u64();
            info!(?code, "Login rejected");
            return Err(HandshakeError::Rejected { code });
        }

        self.state = HandshakeState::Authenticated;
        info!(user = %self.credentials.username, hub = %self.options.hub, "Authenticated");
        Ok(reply)
    }

    /// Build the login record, echoing the hello fields
    pub fn login_record(&self, hello: &ServerHello) -> RecordSet {
        let mut record = RecordSet::new();
        record.insert("method", "login");
        record.insert("hubname", self.options.hub.as_str());
        record.insert("username", self.credentials.username.as_str());
        record.insert("authtype", AUTHTYPE_PLAIN_PASSWORD);
        record.insert("plain_password", self.credentials.password.as_str());
        record.insert(
            "timestamp",
            chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        );
        record.insert_opt("client_str", hello.hello.clone());
        record.insert_opt("client_ver", hello.version.clone());
        record.insert_opt("client_build", hello.build.clone());
        record.insert("max_connection", self.options.max_connection);
        record.insert("use_encrypt", self.options.use_encrypt);
        record.insert("use_compress", self.options.use_compress);
        record
    }
}
