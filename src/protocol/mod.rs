//! Handshake protocol: record codec, HTTP envelope and the login exchange

pub mod handshake;
pub mod http;
pub mod pack;

pub use handshake::{
    normalize_address, Credentials, Handshake, HandshakeError, HandshakeOptions, HandshakeState,
    ServerHello,
};
pub use pack::{RecordSet, WireValue};

use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Field name length is zero")]
    BadNameLength,

    #[error("Item count {0} unsupported (only single-item fields)")]
    MultiItemUnsupported(u32),

    #[error("Record truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Unknown value type code: {0}")]
    UnknownType(u32),

    #[error("Field {0:?} is not valid UTF-8 text")]
    InvalidText(String),

    #[error("Field {0:?} has no value")]
    NilValue(String),

    #[error("Field {0:?} has a type the encoder cannot emit")]
    UnsupportedType(String),

    #[error("Field name is empty")]
    EmptyName,

    #[error("Bad server response: {0}")]
    BadServerResponse(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
}

/// Path of the watermark upload
pub const CONNECT_PATH: &str = "/vpnsvc/connect.cgi";

/// Path of the login request
pub const LOGIN_PATH: &str = "/vpnsvc/vpn.cgi";

/// Largest HTTP body accepted from the gateway (1 MiB)
pub const MAX_BODY_SIZE: usize = 1 << 20;

/// Error code the gateway reports for rejected credentials
pub const ERR_AUTH_FAILED: u32 = 9;

/// Auth type for plaintext password login
pub const AUTHTYPE_PLAIN_PASSWORD: u32 = 2;
