//! Duplex chat session.
//!
//! A [`Session`] drives one established stream with two concurrent loops:
//! the outbound loop (local input to peer) runs as its own task, the inbound
//! loop (peer to display) runs on the caller's task. Both watch the shared
//! [`SessionState`] and stop as soon as it leaves `Connected`; whichever loop
//! notices the end first asks the [`ShutdownCoordinator`] to close the stream.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::Utf8ChunkDecoder;
use crate::error::EstablishError;
use crate::shutdown::{ShutdownCoordinator, ShutdownTrigger};
use crate::state::{SessionPhase, SessionState};
use crate::transport::{Endpoint, Establisher, Role};

/// Local input that ends the session without sending anything
pub const QUIT_TOKEN: &str = "/q";

/// Largest single read from the stream
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Configuration for a chat session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Upper bound for one read from the peer
    pub read_chunk_size: usize,
    /// Trimmed input equal to this ends the session locally
    pub quit_token: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            quit_token: QUIT_TOKEN.to_string(),
        }
    }
}

/// Events emitted by sessions
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Listener socket is bound; waiting for the peer
    Listening {
        /// Configured endpoint
        endpoint: Endpoint,
        /// Actual bound address
        local: SocketAddr,
    },
    /// Stream established
    Connected {
        /// Our role
        role: Role,
        /// Peer socket address
        peer: SocketAddr,
        /// Local socket address
        local: SocketAddr,
    },
    /// Text received from the peer
    MessageReceived {
        /// Display label of the sender
        from: &'static str,
        /// Decoded text of one read (no boundary guarantee)
        text: String,
    },
    /// First message arrived; the local user may start typing
    ReadyToSend,
    /// Session closed
    Disconnected {
        /// What ended it
        trigger: ShutdownTrigger,
    },
}

/// Statistics for a session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_in: u64,
    /// Total bytes sent
    pub bytes_out: u64,
    /// Reads that produced displayable text
    pub messages_received: u64,
    /// Lines written to the peer
    pub messages_sent: u64,
}

/// Outcome of a finished session
#[derive(Clone, Debug)]
pub struct SessionReport {
    /// Our role
    pub role: Role,
    /// Trigger that won the shutdown race
    pub trigger: Option<ShutdownTrigger>,
    /// Traffic counters
    pub stats: SessionStats,
}

/// Main session implementation
pub struct Session;

impl Session {
    /// Establish the stream with `establisher`, then run the session on it.
    ///
    /// Establishment failures are returned as-is and leave `state` in
    /// [`SessionPhase::Closed`]; no session is started.
    pub async fn establish_and_run<E>(
        establisher: &E,
        config: SessionConfig,
        state: Arc<SessionState>,
        input: mpsc::Receiver<String>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<SessionReport, EstablishError>
    where
        E: Establisher + ?Sized,
    {
        let role = establisher.role();
        state.advance(SessionPhase::Establishing);

        let established = match establisher.establish(&events).await {
            Ok(established) => established,
            Err(e) => {
                debug!(kind = ?e.io_kind(), "Establishing {} session failed: {}", role, e);
                state.advance(SessionPhase::Closed);
                return Err(e);
            }
        };

        state.advance(SessionPhase::Connected);
        events
            .send(SessionEvent::Connected {
                role,
                peer: established.peer,
                local: established.local,
            })
            .await
            .ok();

        Ok(Self::run(
            role,
            config,
            established.stream,
            established.listener,
            state,
            input,
            events,
        )
        .await)
    }

    /// Run both loops over an already established stream until it closes.
    pub async fn run<S>(
        role: Role,
        config: SessionConfig,
        stream: S,
        listener: Option<TcpListener>,
        state: Arc<SessionState>,
        input: mpsc::Receiver<String>,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionReport
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        state.advance(SessionPhase::Connected);
        info!("Starting {} session", role);

        let (reader, writer) = tokio::io::split(stream);
        let coordinator = Arc::new(ShutdownCoordinator::new(
            state.clone(),
            writer,
            listener,
            events.clone(),
        ));

        let outbound = tokio::spawn(outbound_loop(
            config.clone(),
            coordinator.clone(),
            input,
        ));

        let mut stats = inbound_loop(role, &config, reader, &coordinator, &events).await;

        match outbound.await {
            Ok(sent) => {
                stats.bytes_out = sent.bytes_out;
                stats.messages_sent = sent.messages_sent;
            }
            Err(e) => {
                warn!("Outbound loop aborted: {}", e);
                coordinator.shutdown(ShutdownTrigger::WriteFailed).await;
            }
        }

        let trigger = coordinator.trigger();
        info!(
            "Session ended ({}). Stats: {:?}",
            trigger.map(|t| t.to_string()).unwrap_or_else(|| "unknown".into()),
            stats
        );

        SessionReport {
            role,
            trigger,
            stats,
        }
    }
}

/// Local input to peer. Blocks on input; every non-quit line is written raw.
///
/// When the input source ends the loop stops sending but leaves the session
/// open; the inbound loop keeps displaying until the peer goes away.
async fn outbound_loop<W>(
    config: SessionConfig,
    coordinator: Arc<ShutdownCoordinator<W>>,
    mut input: mpsc::Receiver<String>,
) -> SessionStats
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stats = SessionStats::default();
    let mut phase = coordinator.state().watch();

    while phase.current() == SessionPhase::Connected {
        let line = tokio::select! {
            biased;
            _ = phase.left_connected() => break,
            line = input.recv() => line,
        };

        let Some(line) = line else {
            info!("Local input closed, still receiving");
            break;
        };

        let text = line.trim();
        if text == config.quit_token {
            debug!("Quit token entered");
            coordinator.shutdown(ShutdownTrigger::LocalQuit).await;
            break;
        }
        if text.is_empty() {
            continue;
        }

        let sent = tokio::select! {
            biased;
            _ = phase.left_connected() => break,
            sent = coordinator.send(text.as_bytes()) => sent,
        };

        match sent {
            Ok(()) => {
                stats.messages_sent += 1;
                stats.bytes_out += text.len() as u64;
                debug!("Sent {} bytes", text.len());
            }
            Err(e) => {
                warn!("Failed to send to peer: {}", e);
                coordinator.shutdown(ShutdownTrigger::WriteFailed).await;
                break;
            }
        }
    }

    stats
}

/// Peer to display. Any EOF or read error counts as the peer going away.
async fn inbound_loop<R, W>(
    role: Role,
    config: &SessionConfig,
    mut reader: R,
    coordinator: &ShutdownCoordinator<W>,
    events: &mpsc::Sender<SessionEvent>,
) -> SessionStats
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut stats = SessionStats::default();
    let mut phase = coordinator.state().watch();
    let mut decoder = Utf8ChunkDecoder::new();
    let mut buf = vec![0u8; config.read_chunk_size.max(1)];

    while phase.current() == SessionPhase::Connected {
        let read = tokio::select! {
            biased;
            _ = phase.left_connected() => break,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                if decoder.pending_len() > 0 {
                    debug!("Stream ended inside a character ({} bytes)", decoder.pending_len());
                }
                let tail = decoder.finish();
                display(role, tail, &mut stats, events).await;
                info!(peer = role.peer_label(), "Peer closed the connection");
                coordinator.shutdown(ShutdownTrigger::PeerClosed).await;
                break;
            }
            Ok(n) => {
                stats.bytes_in += n as u64;
                let text = decoder.decode(&buf[..n]);
                display(role, text, &mut stats, events).await;
            }
            Err(e) => {
                warn!(peer = role.peer_label(), "Read from peer failed: {}", e);
                coordinator.shutdown(ShutdownTrigger::ReadFailed).await;
                break;
            }
        }
    }

    // Releases our half of the stream.
    drop(reader);
    stats
}

async fn display(
    role: Role,
    text: String,
    stats: &mut SessionStats,
    events: &mpsc::Sender<SessionEvent>,
) {
    if text.is_empty() {
        return;
    }
    stats.messages_received += 1;
    events
        .send(SessionEvent::MessageReceived {
            from: role.peer_label(),
            text,
        })
        .await
        .ok();

    if stats.messages_received == 1 && role.announces_ready() {
        events.send(SessionEvent::ReadyToSend).await.ok();
    }
}
