use std::process::Command;

use clap::Parser;
use tokio::net::lookup_host;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use ssh_reverse_mux_client::cli::Cli;
use ssh_reverse_mux_client::error::{ClientError, Result};
use ssh_reverse_mux_client::hook::run_hook;
use ssh_reverse_mux_client::ident::IdentSource;
use ssh_reverse_mux_client::negotiate::negotiate;
use ssh_reverse_mux_client::ssh::{exec, ssh_command};
use ssh_reverse_mux_protocol::{retries_within_timeout, MAX_SECRET_LEN};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(cmd) => {
            // Only reached when the exec itself failed.
            let e = exec(cmd);
            error!("failed to exec ssh: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<Command> {
    let secret = cli.auth_secret.as_bytes().to_vec();
    if secret.is_empty() || secret.len() > MAX_SECRET_LEN {
        return Err(ClientError::SecretLength);
    }

    let ident = IdentSource::from_cli(&cli).resolve(&secret).await?;
    debug!(ident_len = ident.len(), "identity resolved");

    let host = cli.parse_host();
    let mux_port = host.mux_port.unwrap_or(cli.mux_port);
    let server = lookup_host((host.host.as_str(), mux_port))
        .await?
        .next()
        .ok_or_else(|| ClientError::HostResolve(host.host.clone()))?;

    // One extra delay; the last is the schedule's tail and is never slept.
    let mut delays = retries_within_timeout(cli.attempts + 1, cli.timeout);
    delays.pop();

    info!(%server, attempts = cli.attempts, "negotiating reverse tunnel port");
    let (server_ssh_port, tun_port) = tokio::select! {
        negotiated = negotiate(server, &secret, &ident, &delays) => negotiated?,
        _ = shutdown_signal() => return Err(ClientError::Cancelled),
    };

    let ssh_port = cli.ssh_port.unwrap_or(server_ssh_port);
    info!(ssh_port, tun_port, "negotiated reverse tunnel");

    run_hook(&cli.mux_hook, ssh_port, tun_port).await;

    Ok(ssh_command(&host, ssh_port, tun_port, cli.debug_ssh))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT, giving up"),
                    _ = term.recv() => info!("received SIGTERM, giving up"),
                }
            }
            Err(e) => {
                error!("cannot install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                info!("received SIGINT, giving up");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt, giving up");
    }
}
