//! TLS transport to the gateway
//!
//! The gateway certificate is NOT verified: any chain is accepted. Gateways
//! commonly run self-signed certificates. This is a known gap.

use super::tcp::TcpDialer;
use super::{host_of, Dialed, Dialer, TransportConfig, TransportError};
use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, IpAddr, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// TLS dialer that skips certificate verification
pub struct TlsDialer {
    config: TransportConfig,
    tls_config: Arc<rustls::ClientConfig>,
}

impl TlsDialer {
    /// Create a new TLS dialer
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        Ok(Self {
            config,
            tls_config: Arc::new(insecure_client_config()?),
        })
    }
}

/// Build a rustls client config that accepts any server certificate
pub fn insecure_client_config() -> Result<rustls::ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let schemes = provider
        .signature_verification_algorithms
        .supported_schemes();

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipVerification { schemes }))
        .with_no_client_auth();
    Ok(config)
}

/// Server name for the ClientHello: DNS names as SNI, IP literals as-is
pub(crate) fn server_name(addr: &str) -> Result<ServerName<'static>, TransportError> {
    let host = host_of(addr);
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Ok(ServerName::IpAddress(IpAddr::from(ip)));
    }
    ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::Tls(format!("Invalid server name {}: {}", host, e)))
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self, addr: &str) -> Result<Dialed, TransportError> {
        let timeout = std::time::Duration::from_secs(self.config.connect_timeout);

        let tcp_stream = TcpDialer::connect_tcp(&self.config, addr).await?;
        let local_addr = tcp_stream.local_addr().ok();

        let connector = TlsConnector::from(self.tls_config.clone());
        let name = server_name(addr)?;

        let tls_stream = tokio::time::timeout(timeout, connector.connect(name, tcp_stream))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        debug!(%addr, "TLS session established");

        Ok(Dialed {
            stream: Box::new(tls_stream),
            local_addr,
        })
    }
}

#[derive(Debug)]
struct SkipVerification {
    schemes: Vec<SignatureScheme>,
}

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}
