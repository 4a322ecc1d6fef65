use clap::Parser;
use tokio::net::lookup_host;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ssh_reverse_mux_protocol::{retries_within_timeout, MAX_SECRET_LEN};
use ssh_reverse_mux_server::cli::Cli;
use ssh_reverse_mux_server::error::{Result, ServerError};
use ssh_reverse_mux_server::listen::MuxServer;
use ssh_reverse_mux_store::IdentStore;

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

    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = IdentStore::open(&cli.ident_db)?;

    if cli.ident_list {
        for (ident, port) in store.entries() {
            println!("{ident}\t{port}");
        }
        return Ok(());
    }

    let secret = cli.auth_secret.clone().unwrap_or_default().into_bytes();
    if secret.is_empty() || secret.len() > MAX_SECRET_LEN {
        return Err(ServerError::SecretLength);
    }

    let addr = lookup_host((cli.bind.as_str(), cli.mux_port))
        .await?
        .next()
        .ok_or_else(|| ServerError::BindResolve(cli.bind.clone()))?;

    let delays = retries_within_timeout(cli.attempts, cli.timeout);
    let server = MuxServer::bind(
        addr,
        secret,
        store,
        cli.tunnel_port_range,
        cli.ssh_port,
        delays,
    )
    .await?;

    server.run(shutdown_signal()).await
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                    _ = term.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                error!("cannot install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt, shutting down");
    }
}
