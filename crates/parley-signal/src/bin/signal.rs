//! Parley Signal Server
//!
//! WebRTC signaling relay with ICE server endpoint and static web client.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (port 3000, ./www, public STUN only)
//! parley-signal
//!
//! # Twilio TURN credentials for one site
//! TWILIO_ACCOUNT_SID=AC... TWILIO_AUTH_TOKEN=... \
//!     parley-signal --port 8080 --allowed-origin meet.example.com
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use parley_core::Config;
use parley_signal::SignalServer;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "parley-signal")]
#[command(about = "Parley WebRTC signaling relay")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory with index.html, legal.html and static assets
    #[arg(short, long)]
    www: Option<PathBuf>,

    /// Host allowed to fetch ICE servers (repeatable)
    #[arg(long = "allowed-origin", env = "ALLOWED_ORIGIN", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Twilio account SID for TURN credentials
    #[arg(long, env = "TWILIO_ACCOUNT_SID", hide_env_values = true)]
    twilio_account_sid: Option<String>,

    /// Twilio auth token for TURN credentials
    #[arg(long, env = "TWILIO_AUTH_TOKEN", hide_env_values = true)]
    twilio_auth_token: Option<String>,

    /// Drop empty channel records
    #[arg(long)]
    prune_empty_channels: bool,

    /// Print a sample configuration file and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    /// Load the config file and apply command-line overrides
    fn into_config(self) -> Result<Config, BoxError> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind = bind.parse()?;
        }
        if let Some(www) = self.www {
            config.server.www_dir = www;
        }
        if self.prune_empty_channels {
            config.server.prune_empty_channels = true;
        }
        if !self.allowed_origins.is_empty() {
            config.ice.allowed_origins = self.allowed_origins;
        }
        if self.twilio_account_sid.is_some() {
            config.ice.twilio_account_sid = self.twilio_account_sid;
        }
        if self.twilio_auth_token.is_some() {
            config.ice.twilio_auth_token = self.twilio_auth_token;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    let config = args.into_config()?;
    let addr = SocketAddr::new(config.server.bind, config.server.port);

    info!("Starting Parley Signal Server");
    info!("Serving web client from {:?}", config.server.www_dir);
    info!("ICE allowed origins: {:?}", config.ice.allowed_origins);
    if config.ice.twilio_credentials().is_some() {
        info!("Using Twilio for TURN credentials");
    } else {
        info!("Twilio not configured, serving STUN servers only");
    }

    let server = SignalServer::new(config);
    server.serve(addr).await?;

    Ok(())
}
