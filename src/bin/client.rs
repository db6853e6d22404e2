//! SoftVPN Client
//!
//! Command-line front-end for the session controller:
//! - Loads `[client]` and `[logging]` from the config file
//! - Dials the gateway over TLS and logs in
//! - Bridges the TAP interface until Ctrl-C or tunnel loss

use anyhow::{bail, Context, Result};
use clap::Parser;
use softvpn::{
    config::{generate_example_config, Config},
    device::TapProvider,
    dhcp::SystemDhcp,
    session::{Collaborators, Session, Status},
    transport::TlsDialer,
    ErrorCode,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// SoftVPN Client - layer-2 tunnel over disguised HTTPS
#[derive(Parser, Debug)]
#[command(name = "softvpn-client")]
#[command(about = "SoftVPN Client - layer-2 tunnel over disguised HTTPS")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Write an example configuration to the config path and exit
    #[arg(long)]
    generate_config: bool,

    /// Gateway address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// User name (overrides config)
    #[arg(short, long, env = "SOFTVPN_USERNAME")]
    username: Option<String>,

    /// Password (overrides config)
    #[arg(short, long, env = "SOFTVPN_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        return write_example_config(&args.config);
    }

    let mut config = if Path::new(&args.config).exists() {
        Config::load(&args.config).context("Failed to load configuration")?
    } else {
        Config::default()
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    softvpn::logging::init(&config.logging).context("Failed to initialize logging")?;

    let mut client = config.client.unwrap_or_default();
    if let Some(host) = args.host {
        client.host = host;
    }
    if let Some(username) = args.username {
        client.username = username;
    }
    if let Some(password) = args.password {
        client.password = password;
    }
    if client.host.is_empty() || client.username.is_empty() || client.password.is_empty() {
        bail!("You must set host, username and password (config file or command line)");
    }

    let dialer = TlsDialer::new(client.transport_config()).context("Failed to set up TLS")?;
    let leases = SystemDhcp::new(&client.dhcp_command).context("Invalid dhcp_command")?;
    let collaborators = Collaborators::new(Arc::new(dialer), Arc::new(TapProvider), Arc::new(leases))
        .with_observer(Arc::new(|status: Status| {
            info!(state = ?status.state, error = ?status.error, "{}", status.message());
        }));
    let session = Session::new(client.session_config(), collaborators);

    info!(host = %client.host, user = %client.username, "Connecting");
    if let Err(e) = session.connect().await {
        error!("{}", session.status().message());
        return Err(anyhow::Error::new(e).context("Connection failed"));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            session.disconnect();
            session.closed().await;
        }
        status = session.closed() => {
            if status.error != ErrorCode::None {
                warn!("Session ended: {}", status.message());
                bail!("{}", status.message());
            }
        }
    }

    Ok(())
}

fn write_example_config(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        bail!("{} already exists, refusing to overwrite", path);
    }
    generate_example_config()
        .save(path)
        .context("Failed to write example configuration")?;
    println!("Example configuration written to {}", path);
    Ok(())
}

