use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use udp_chat::{
    cli::{Cli, Command},
    client,
    server::Server,
};

/// The client writes chat traffic to stdout, so its logs go to stderr.
fn init_tracing(default_filter: &str, log_to_stderr: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if log_to_stderr {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            init_tracing("info", false);

            let socket = UdpSocket::bind((args.address.as_str(), args.port))
                .await
                .with_context(|| format!("failed to bind {}:{}", args.address, args.port))?;
            let server = Server::new(socket, args.max_clients);
            let addr = server.local_addr()?;
            info!("server listening on {}", addr);
            info!(
                window = args.window,
                max_clients = args.max_clients,
                "window size is accepted but delivery is best-effort"
            );

            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Client(args) => {
            init_tracing("warn", true);
            client::run(args).await
        }
    }
}
