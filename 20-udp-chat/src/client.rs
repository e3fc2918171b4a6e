use std::{net::SocketAddr, process::ExitCode, thread};

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncWriteExt},
    net::lookup_host,
    select,
    sync::mpsc,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    console::{self, ConsoleCommand, HELP_TEXT, UsageError},
    session::{ClientEvent, ClientSession},
};

/// How the interactive loop ended.
enum LoopExit {
    Quit,
    Fatal,
}

pub async fn run(args: ClientArgs) -> Result<ExitCode> {
    let server = resolve_server(&args.address, args.port).await?;
    info!(%server, window = args.window, "joining chat server");

    let (mut session, mut events) = ClientSession::connect(args.user.as_str(), server).await?;
    if let Err(error) = session.join().await {
        session.close().await;
        return Err(error);
    }

    let mut stdin = match spawn_stdin_reader() {
        Ok(stdin) => stdin,
        Err(error) => {
            session.close().await;
            return Err(error);
        }
    };
    let exit = match run_client_loop(&mut session, &mut events, &mut stdin).await {
        Ok(exit) => exit,
        Err(error) => {
            session.close().await;
            return Err(error);
        }
    };

    match exit {
        LoopExit::Quit => {
            session.disconnect().await?;
            write_stdout("quitting").await?;
            Ok(ExitCode::SUCCESS)
        }
        LoopExit::Fatal => {
            session.close().await;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Resolves the server, preferring IPv4 since the server binds IPv4 by
/// default.
async fn resolve_server(host: &str, port: u16) -> Result<SocketAddr> {
    let candidates: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}"))?
        .collect();

    candidates
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .with_context(|| format!("no address found for {host}"))
}

/// Reads stdin on a plain thread. A blocking read there cannot hold up
/// runtime shutdown, so the process exits as soon as the session ends.
fn spawn_stdin_reader() -> Result<mpsc::UnboundedReceiver<io::Result<String>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

async fn run_client_loop(
    session: &mut ClientSession,
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    stdin: &mut mpsc::UnboundedReceiver<io::Result<String>>,
) -> Result<LoopExit> {
    let mut shutdown = session.shutdown_signal();

    loop {
        select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        write_event(&event).await?;
                        if event.is_fatal() {
                            return Ok(LoopExit::Fatal);
                        }
                    }
                    None => return Ok(LoopExit::Fatal),
                }
            }
            _ = shutdown.changed() => {
                // The receive path ended the session; show whatever it queued.
                while let Ok(event) = events.try_recv() {
                    write_event(&event).await?;
                }
                return Ok(LoopExit::Fatal);
            }
            line = stdin.recv() => {
                if !handle_stdin_line(line, session).await? {
                    return Ok(LoopExit::Quit);
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                return Ok(LoopExit::Quit);
            }
        }
    }
}

async fn handle_stdin_line(
    line: Option<io::Result<String>>,
    session: &mut ClientSession,
) -> Result<bool> {
    let Some(line) = line.transpose()? else {
        return Ok(false);
    };

    let command = match ConsoleCommand::parse(&line) {
        Ok(command) => command,
        Err(UsageError::Empty) => return Ok(true),
        Err(error) => {
            write_stdout(&error.to_string()).await?;
            return Ok(true);
        }
    };

    match command {
        ConsoleCommand::Msg { recipients, text } => {
            if let Err(error) = session.send_message(&recipients, &text).await {
                write_stderr(&format!("error: {error:#}")).await?;
            }
        }
        ConsoleCommand::List => {
            if let Err(error) = session.request_list().await {
                write_stderr(&format!("error: {error:#}")).await?;
            }
        }
        ConsoleCommand::Help => write_stdout(HELP_TEXT).await?,
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn write_event(event: &ClientEvent) -> io::Result<()> {
    write_stdout(&console::render(event)).await
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
