//! Two-peer TCP chat binary.
//!
//! `chat listen` waits for one peer, `chat connect` dials it. After that both
//! sides type lines to each other until either enters `/q` or the stream drops.

use chat_session::{Acceptor, Dialer, Establisher, Session, SessionState};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod logging;

use config::ChatConfig;
use logging::ChatLogFormatter;

/// Duplex text chat over a single TCP stream
#[derive(Parser, Debug)]
#[command(name = "chat", version, about = "Two-peer TCP text chat")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Host to bind (listen) or dial (connect)
    #[arg(long, global = true)]
    host: Option<String>,

    /// TCP port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Configuration file path
    #[arg(long, global = true, default_value = "chat.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Mode {
    /// Bind, accept exactly one peer, then chat
    Listen,
    /// Dial a listening peer, then chat
    Connect,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("chat={}", args.log_level).parse()?)
        .add_directive(format!("chat_session={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(ChatLogFormatter::new("chat"))
        .init();

    info!("Starting chat v{}", env!("CARGO_PKG_VERSION"));

    let mut chat_config = ChatConfig::load_from_file(&args.config)?;
    if let Some(host) = args.host {
        chat_config.host = host;
    }
    if let Some(port) = args.port {
        chat_config.port = port;
    }

    let establisher: Box<dyn Establisher> = match args.mode {
        Mode::Listen => Box::new(Acceptor::new(chat_config.endpoint())),
        Mode::Connect => Box::new(Dialer::new(chat_config.endpoint())),
    };
    let role = establisher.role();
    info!("Running as {} on {}", role, chat_config.endpoint());

    let (event_tx, event_rx) = mpsc::channel(100);
    let console_task = tokio::spawn(console::render_events(event_rx, std::io::stdout()));
    let input = console::spawn_stdin_reader()?;
    let state = Arc::new(SessionState::new());

    let result = Session::establish_and_run(
        establisher.as_ref(),
        chat_config.session_config(),
        state,
        input,
        event_tx,
    )
    .await;

    // Every event sender is gone once the session returns.
    match console_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => component_error!("console", "Console output failed: {}", e),
        Err(e) => warn!("Console task panicked: {}", e),
    }

    // Reported once, by anyhow, on the way out of main.
    let report = console::session_outcome(result, role)?;

    info!(
        "Chat finished: trigger={:?}, sent={}, received={}",
        report.trigger, report.stats.messages_sent, report.stats.messages_received
    );

    Ok(())
}
