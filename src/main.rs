//! sync-relay server binary
//!
//! ```text
//! sync-relay [-v|--verbose] [--unfiltered] [--bind ADDR] [PORT [SEPARATOR]]
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use sync_relay::{RelayConfig, SyncRelay, DEFAULT_PORT};

/// Selective-broadcast relay for shared-model synchronization clients
#[derive(Parser, Debug)]
#[command(name = "sync-relay", version, about)]
struct Cli {
    /// Log every frame received and relayed
    #[arg(short, long)]
    verbose: bool,

    /// Relay whole frames to every client instead of filtering by model
    #[arg(long)]
    unfiltered: bool,

    /// Address to listen on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Port to listen on
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Frame separator, a single-byte character
    #[arg(default_value_t = '\n', hide_default_value = true)]
    separator: char,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,sync_relay=debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

impl Cli {
    /// Build the relay config, rejecting separators wider than one byte
    fn relay_config(&self) -> Result<RelayConfig, clap::Error> {
        let config = RelayConfig::with_addr(SocketAddr::new(self.bind, self.port))
            .separator(self.separator)
            .unfiltered(self.unfiltered)
            .verbose(self.verbose);

        if let Err(e) = config.separator_byte() {
            return Err(Cli::command().error(ErrorKind::InvalidValue, e));
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.relay_config() {
        Ok(config) => config,
        Err(e) => e.exit(),
    };
    init_tracing(cli.verbose);

    let relay = match SyncRelay::bind(config).await {
        Ok(relay) => relay,
        Err(e) => {
            tracing::error!("could not open port: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("started at port {}", relay.port());

    relay
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["sync-relay"]).unwrap();
        let config = cli.relay_config().unwrap();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.separator, '\n');
        assert!(!config.unfiltered);
    }

    #[test]
    fn test_port_and_separator() {
        let cli = Cli::try_parse_from(["sync-relay", "-v", "6000", "|"]).unwrap();
        let config = cli.relay_config().unwrap();

        assert_eq!(config.bind_addr.port(), 6000);
        assert_eq!(config.separator, '|');
        assert!(config.verbose);
    }

    #[test]
    fn test_multibyte_separator_is_usage_error() {
        let cli = Cli::try_parse_from(["sync-relay", "6000", "€"]).unwrap();
        let err = cli.relay_config().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }
}
