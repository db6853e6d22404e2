//! # softvpn
//!
//! A layer-2 VPN client that reaches a remote gateway over TLS, disguises its
//! login exchange as ordinary HTTPS uploads, then bridges a local TAP
//! interface to the tunnel frame by frame.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Session Controller                   │
//! │      (state, error code, change notifications)       │
//! ├──────────────────────────┬──────────────────────────┤
//! │    Handshake Protocol    │    Data-Plane Pipeline   │
//! │ (watermark, hello, auth) │ (iface ⇄ tunnel, ka)     │
//! ├──────────────────────────┼──────────────────────────┤
//! │    Wire Record Codec     │    Tunnel Frame Codec    │
//! ├──────────────────────────┴──────────────────────────┤
//! │                  Transport Layer                     │
//! │                 (TLS over TCP)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The virtual interface, the DHCP client and the status observer are
//! collaborators injected into the [`session::Session`] through traits.

pub mod config;
pub mod device;
pub mod dhcp;
pub mod logging;
pub mod obfuscation;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod tunnel;

pub use config::Config;
pub use session::{ConnState, ErrorCode, Session, Status};

/// Client version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default gateway port
pub const DEFAULT_PORT: u16 = 443;

/// Default name of the TAP interface brought up for the tunnel
pub const DEFAULT_INTERFACE_NAME: &str = "vpn_go";

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Handshake error: {0}")]
    Handshake(#[from] protocol::HandshakeError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Device error: {0}")]
    Device(#[from] device::DeviceError),

    #[error("Lease error: {0}")]
    Lease(#[from] dhcp::LeaseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session already active")]
    AlreadyActive,
}
