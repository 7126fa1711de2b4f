//! Shutdown coordination.
//!
//! Either loop may decide the session is over: the outbound loop on `/q` or a
//! failed write, the inbound loop on EOF or a failed read. Both may do so at
//! the same moment. The coordinator lets exactly one of them close the
//! stream; everybody else gets `false` back and simply stops.

use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::session::SessionEvent;
use crate::state::{SessionPhase, SessionState};

/// What ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Local user typed the quit token
    LocalQuit,
    /// Writing to the peer failed
    WriteFailed,
    /// Peer closed its end (read returned EOF)
    PeerClosed,
    /// Reading from the peer failed
    ReadFailed,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownTrigger::LocalQuit => "local quit",
            ShutdownTrigger::WriteFailed => "write to peer failed",
            ShutdownTrigger::PeerClosed => "peer closed the connection",
            ShutdownTrigger::ReadFailed => "read from peer failed",
        };
        f.write_str(text)
    }
}

/// Owns the write half of the session stream (and the listening socket, for
/// the listener role) and releases them exactly once.
pub struct ShutdownCoordinator<W> {
    state: Arc<SessionState>,
    writer: Mutex<Option<W>>,
    listener: Mutex<Option<TcpListener>>,
    trigger: OnceLock<ShutdownTrigger>,
    events: mpsc::Sender<SessionEvent>,
}

impl<W> fmt::Debug for ShutdownCoordinator<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("phase", &self.state.phase())
            .field("trigger", &self.trigger.get())
            .finish()
    }
}

impl<W> ShutdownCoordinator<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Take ownership of the write half and optional listening socket
    pub fn new(
        state: Arc<SessionState>,
        writer: W,
        listener: Option<TcpListener>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            state,
            writer: Mutex::new(Some(writer)),
            listener: Mutex::new(listener),
            trigger: OnceLock::new(),
            events,
        }
    }

    /// Shared session state
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// The trigger that won, once shutdown has started
    pub fn trigger(&self) -> Option<ShutdownTrigger> {
        self.trigger.get().copied()
    }

    /// Write `bytes` to the peer. Fails with `NotConnected` once closed.
    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) if self.state.is_connected() => {
                writer.write_all(bytes).await?;
                writer.flush().await
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "session stream already closed",
            )),
        }
    }

    /// Close the session. Returns true for the single caller that performed
    /// the close; every other call is a no-op returning false.
    pub async fn shutdown(&self, trigger: ShutdownTrigger) -> bool {
        if !self.state.begin_closing() {
            debug!(
                "Shutdown request ({}) ignored, session is {}",
                trigger,
                self.state.phase()
            );
            return false;
        }
        let _ = self.trigger.set(trigger);
        info!("Closing session: {}", trigger);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                // The peer may already be gone; the handle is dropped regardless.
                debug!("Stream shutdown after {}: {}", trigger, e);
            }
        }

        let listener = self.listener.lock().await.take();
        if let Some(listener) = listener {
            if let Ok(addr) = listener.local_addr() {
                debug!("Closing listening socket {}", addr);
            }
        }

        self.state.advance(SessionPhase::Closed);
        self.events
            .send(SessionEvent::Disconnected { trigger })
            .await
            .ok();
        true
    }
}
