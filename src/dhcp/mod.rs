//! Address lease acquisition for the tunnel interface
//!
//! The session resolves its interface in the OS link list, asks the DHCP
//! capability for a lease within `attempts × attempt_timeout`, and applies
//! whatever comes back. A missing lease is not fatal: the tunnel keeps
//! running without a configured address.

mod system;

pub use system::SystemDhcp;

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Lease errors
#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("Interface {0} not found in link list")]
    NoInterface(String),

    #[error("No lease after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("DHCP failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Address configuration obtained for an interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lease {
    pub interface: String,
    pub address: Option<Ipv4Addr>,
    pub prefix_len: Option<u8>,
    pub gateway: Option<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
}

/// DHCP capability
#[async_trait]
pub trait LeaseProvider: Send + Sync {
    /// Names of the network interfaces currently known to the OS
    async fn interfaces(&self) -> Result<Vec<String>, LeaseError>;

    /// Request a lease on any of `interfaces`, retrying up to `attempts` times
    async fn acquire(
        &self,
        interfaces: &[String],
        attempt_timeout: Duration,
        attempts: u32,
    ) -> Result<Lease, LeaseError>;

    /// Apply a lease to its interface
    async fn configure(&self, lease: &Lease) -> Result<(), LeaseError>;
}

/// Resolve `name`, acquire a lease under the overall budget, and apply it
pub async fn acquire_for(
    provider: &dyn LeaseProvider,
    name: &str,
    attempt_timeout: Duration,
    attempts: u32,
) -> Result<Lease, LeaseError> {
    let links: Vec<String> = provider
        .interfaces()
        .await?
        .into_iter()
        .filter(|link| link == name)
        .take(1)
        .collect();
    if links.is_empty() {
        return Err(LeaseError::NoInterface(name.to_string()));
    }

    let budget = attempt_timeout.saturating_mul(attempts.max(1));
    debug!(interface = %name, ?budget, attempts, "Requesting DHCP lease");

    let lease = tokio::time::timeout(budget, provider.acquire(&links, attempt_timeout, attempts))
        .await
        .map_err(|_| LeaseError::Timeout { attempts })??;

    provider.configure(&lease).await?;
    info!(interface = %lease.interface, address = ?lease.address, "Lease applied");
    Ok(lease)
}
