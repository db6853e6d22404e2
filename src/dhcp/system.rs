//! DHCP through the system client binary

use super::{Lease, LeaseError, LeaseProvider};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Directory listing the kernel's network interfaces
const SYS_CLASS_NET: &str = "/sys/class/net";

/// Runs an external DHCP client (for example `dhclient -1`) once per attempt.
///
/// The external client configures the interface itself, so the returned
/// lease only names the interface and `configure` has nothing left to do.
#[derive(Debug, Clone)]
pub struct SystemDhcp {
    program: String,
    args: Vec<String>,
}

impl SystemDhcp {
    /// Parse a command line such as `"dhclient -1"`; the interface name is appended
    pub fn new(command: &str) -> Result<Self, LeaseError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| LeaseError::Failed("empty DHCP command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    async fn run_once(&self, interface: &str) -> Result<(), LeaseError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(interface)
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(LeaseError::Failed(format!("{} exited with {}", self.program, status)))
        }
    }
}

impl Default for SystemDhcp {
    fn default() -> Self {
        Self {
            program: "dhclient".to_string(),
            args: vec!["-1".to_string()],
        }
    }
}

#[async_trait]
impl LeaseProvider for SystemDhcp {
    async fn interfaces(&self) -> Result<Vec<String>, LeaseError> {
        let mut entries = tokio::fs::read_dir(SYS_CLASS_NET).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn acquire(
        &self,
        interfaces: &[String],
        attempt_timeout: Duration,
        attempts: u32,
    ) -> Result<Lease, LeaseError> {
        for attempt in 1..=attempts {
            for interface in interfaces {
                debug!(%interface, attempt, "Running {}", self.program);
                match tokio::time::timeout(attempt_timeout, self.run_once(interface)).await {
                    Ok(Ok(())) => {
                        return Ok(Lease {
                            interface: interface.clone(),
                            ..Default::default()
                        })
                    }
                    Ok(Err(e)) => warn!(%interface, attempt, "DHCP attempt failed: {}", e),
                    Err(_) => warn!(%interface, attempt, "DHCP attempt timed out"),
                }
            }
        }
        Err(LeaseError::Timeout { attempts })
    }

    async fn configure(&self, lease: &Lease) -> Result<(), LeaseError> {
        debug!(interface = %lease.interface, "Lease already applied by system client");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        let dhcp = SystemDhcp::new("udhcpc -n -q -i").unwrap();
        assert_eq!(dhcp.program, "udhcpc");
        assert_eq!(dhcp.args, vec!["-n", "-q", "-i"]);

        assert!(SystemDhcp::new("   ").is_err());
    }

    #[tokio::test]
    async fn test_failing_command_exhausts_attempts() {
        let dhcp = SystemDhcp::new("false").unwrap();
        let result = dhcp
            .acquire(&["vpn_go".to_string()], Duration::from_secs(5), 2)
            .await;
        assert!(matches!(result, Err(LeaseError::Timeout { attempts: 2 })));
    }
}
