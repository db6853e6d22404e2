//! Session controller
//!
//! Owns the connection state and drives one attempt end to end:
//! dial, login, interface bring-up, data plane, address lease, then waits
//! for an explicit disconnect or for the data plane to die. Every
//! transition except the caller-initiated `Connecting` is reported to the
//! [`StatusObserver`].

use crate::device::InterfaceProvider;
use crate::dhcp::{self, LeaseProvider};
use crate::protocol::handshake::host_header;
use crate::protocol::{normalize_address, Credentials, Handshake, HandshakeError, HandshakeOptions};
use crate::transport::Dialer;
use crate::tunnel::{Pipeline, PipelineConfig, PumpExit};
use crate::{Error, Result};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why the session is disconnected; meaningful only while `Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    #[default]
    None,
    ConnectFailed,
    PermissionDenied,
    CredentialsRejected,
}

impl From<&HandshakeError> for ErrorCode {
    fn from(e: &HandshakeError) -> Self {
        e.error_code()
    }
}

/// State plus error code, as seen by the front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: ConnState,
    pub error: ErrorCode,
}

impl Status {
    pub fn disconnected(error: ErrorCode) -> Self {
        Self {
            state: ConnState::Disconnected,
            error,
        }
    }

    pub fn connecting() -> Self {
        Self {
            state: ConnState::Connecting,
            error: ErrorCode::None,
        }
    }

    pub fn connected() -> Self {
        Self {
            state: ConnState::Connected,
            error: ErrorCode::None,
        }
    }

    /// One-line text for display
    pub fn message(&self) -> &'static str {
        match (self.state, self.error) {
            (ConnState::Connected, _) => "Connected",
            (ConnState::Connecting, _) => "Connecting...",
            (ConnState::Disconnected, ErrorCode::None) => "Disconnected",
            (ConnState::Disconnected, ErrorCode::ConnectFailed) => "Failed to connect to server",
            (ConnState::Disconnected, ErrorCode::PermissionDenied) => {
                "Permission denied, re-run with root privileges"
            }
            (ConnState::Disconnected, ErrorCode::CredentialsRejected) => {
                "User name or password error"
            }
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::disconnected(ErrorCode::None)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Receives a notification after every state transition
pub trait StatusObserver: Send + Sync {
    fn changed(&self, status: Status);
}

impl<F> StatusObserver for F
where
    F: Fn(Status) + Send + Sync,
{
    fn changed(&self, status: Status) {
        self(status)
    }
}

/// Parameters of one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Gateway address as entered by the user
    pub host: String,
    pub credentials: Credentials,
    pub options: HandshakeOptions,
    pub interface_name: String,
    pub pipeline: PipelineConfig,
    pub dhcp_attempts: u32,
    pub dhcp_attempt_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            credentials,
            options: HandshakeOptions::default(),
            interface_name: crate::DEFAULT_INTERFACE_NAME.to_string(),
            pipeline: PipelineConfig::default(),
            dhcp_attempts: 3,
            dhcp_attempt_timeout: Duration::from_secs(15),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty()
            || self.credentials.username.is_empty()
            || self.credentials.password.is_empty()
        {
            return Err(Error::Config(
                "host, username and password are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// External capabilities the session drives
#[derive(Clone)]
pub struct Collaborators {
    pub dialer: Arc<dyn Dialer>,
    pub interfaces: Arc<dyn InterfaceProvider>,
    pub leases: Arc<dyn LeaseProvider>,
    pub observer: Arc<dyn StatusObserver>,
}

impl Collaborators {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        interfaces: Arc<dyn InterfaceProvider>,
        leases: Arc<dyn LeaseProvider>,
    ) -> Self {
        Self {
            dialer,
            interfaces,
            leases,
            observer: Arc::new(|_: Status| {}),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observer = observer;
        self
    }
}

struct Inner {
    config: SessionConfig,
    collaborators: Collaborators,
    status: watch::Sender<Status>,
}

impl Inner {
    fn publish(&self, status: Status) {
        self.status.send_replace(status);
        debug!(?status, "Session state changed");
        self.collaborators.observer.changed(status);
    }

    /// Dial, log in, open the interface and start the data plane
    async fn establish(&self) -> std::result::Result<Pipeline, HandshakeError> {
        let addr = normalize_address(&self.config.host);
        let mut handshake =
            Handshake::new(self.config.credentials.clone(), self.config.options.clone());

        let dialed = handshake
            .dial(self.collaborators.dialer.as_ref(), &addr)
            .await?;
        let host = host_header(&dialed, &addr);
        let mut stream = BufReader::new(dialed.stream);
        handshake.negotiate(&mut stream, &host).await?;

        let iface = self
            .collaborators
            .interfaces
            .open(&self.config.interface_name)
            .await?;
        info!(interface = %iface.name(), "Interface up");

        let (reader, writer) = tokio::io::split(stream);
        Ok(Pipeline::start(
            reader,
            writer,
            iface,
            self.config.pipeline.clone(),
        ))
    }

    /// Acquire an address, then wait for the data plane to end
    async fn steady_state(&self, pipeline: &mut Pipeline) -> Option<PumpExit> {
        let lease = dhcp::acquire_for(
            self.collaborators.leases.as_ref(),
            &self.config.interface_name,
            self.config.dhcp_attempt_timeout,
            self.config.dhcp_attempts,
        );
        tokio::select! {
            exit = pipeline.wait() => return exit,
            result = lease => match result {
                Ok(lease) => info!(address = ?lease.address, "Address lease acquired"),
                Err(e) => warn!("Continuing without an address: {}", e),
            },
        }
        pipeline.wait().await
    }

    async fn run(self: Arc<Self>, quit: CancellationToken, ready: oneshot::Sender<Result<()>>) {
        let established = tokio::select! {
            _ = quit.cancelled() => Err(HandshakeError::Cancelled),
            result = self.establish() => result,
        };

        let mut pipeline = match established {
            Ok(pipeline) => pipeline,
            Err(e) => {
                let code = ErrorCode::from(&e);
                warn!(?code, "Connection attempt failed: {}", e);
                self.publish(Status::disconnected(code));
                let _ = ready.send(Err(e.into()));
                return;
            }
        };

        self.publish(Status::connected());
        let _ = ready.send(Ok(()));

        let exit = tokio::select! {
            _ = quit.cancelled() => None,
            exit = self.steady_state(&mut pipeline) => exit,
        };
        pipeline.shutdown().await;

        let status = match exit {
            None => {
                info!("Disconnected");
                Status::disconnected(ErrorCode::None)
            }
            Some(exit) => {
                match exit.result {
                    Err(e) => error!(pump = %exit.pump, "Tunnel lost: {}", e),
                    Ok(()) => error!(pump = %exit.pump, "Tunnel lost"),
                }
                Status::disconnected(ErrorCode::ConnectFailed)
            }
        };
        self.publish(status);
    }
}

/// A VPN session
pub struct Session {
    inner: Arc<Inner>,
    quit: Mutex<Option<CancellationToken>>,
}

impl Session {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        let (status, _) = watch::channel(Status::default());
        Self {
            inner: Arc::new(Inner {
                config,
                collaborators,
                status,
            }),
            quit: Mutex::new(None),
        }
    }

    /// Current status
    pub fn status(&self) -> Status {
        *self.inner.status.borrow()
    }

    /// Receiver following every status change
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    /// Start a connection attempt and wait until it is connected or failed
    ///
    /// The session keeps running in the background after this returns
    /// `Ok`; use [`Session::closed`] to wait for it to end.
    pub async fn connect(&self) -> Result<()> {
        self.inner.config.validate()?;

        let started = self.inner.status.send_if_modified(|status| {
            if status.state == ConnState::Disconnected {
                *status = Status::connecting();
                true
            } else {
                false
            }
        });
        if !started {
            return Err(Error::AlreadyActive);
        }

        let quit = CancellationToken::new();
        *self.quit.lock().unwrap_or_else(PoisonError::into_inner) = Some(quit.clone());

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(&self.inner).run(quit, ready_tx));
        ready_rx
            .await
            .unwrap_or(Err(Error::Handshake(HandshakeError::Cancelled)))
    }

    /// Request disconnect; the session reports `Disconnected` once torn down
    pub fn disconnect(&self) {
        if let Some(quit) = self
            .quit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            debug!("Disconnect requested");
            quit.cancel();
        }
    }

    /// Wait until the session is `Disconnected`
    pub async fn closed(&self) -> Status {
        let mut rx = self.subscribe();
        let result = rx
            .wait_for(|status| status.state == ConnState::Disconnected)
            .await
            .map(|status| *status);
        result.unwrap_or_default()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
