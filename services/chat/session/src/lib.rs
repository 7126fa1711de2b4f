//! TCP establishment, duplex send/recv loops and idempotent shutdown for a
//! two-peer text chat.
//!
//! One process listens, the other dials; after that both run the same
//! [`Session`]: an outbound loop writing local input lines to the stream and
//! an inbound loop turning stream bytes into [`SessionEvent::MessageReceived`]
//! events. There is no framing on the wire and no quit handshake; either side
//! ends the session by closing its end of the stream.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chat_session::{Acceptor, Endpoint, Session, SessionConfig, SessionEvent, SessionState};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), chat_session::EstablishError> {
//! let (input_tx, input_rx) = mpsc::channel::<String>(16);
//! let (event_tx, mut event_rx) = mpsc::channel(100);
//!
//! tokio::spawn(async move {
//!     while let Some(event) = event_rx.recv().await {
//!         if let SessionEvent::MessageReceived { from, text } = event {
//!             println!("{}: {}", from, text);
//!         }
//!     }
//! });
//!
//! input_tx.send("hello".to_string()).await.ok();
//!
//! let acceptor = Acceptor::new(Endpoint::default());
//! let state = Arc::new(SessionState::new());
//! let report =
//!     Session::establish_and_run(&acceptor, SessionConfig::default(), state, input_rx, event_tx)
//!         .await?;
//! println!("session ended: {:?}", report.trigger);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod transport;

// Re-export main types
pub use codec::Utf8ChunkDecoder;
pub use error::EstablishError;
pub use session::{
    Session, SessionConfig, SessionEvent, SessionReport, SessionStats, DEFAULT_READ_CHUNK_SIZE,
    QUIT_TOKEN,
};
pub use shutdown::{ShutdownCoordinator, ShutdownTrigger};
pub use state::{PhaseWatch, SessionPhase, SessionState};
pub use transport::{
    connect_tcp, listen_tcp, Acceptor, Dialer, Endpoint, Established, Establisher, Role,
    DEFAULT_HOST, DEFAULT_PORT, LISTEN_BACKLOG,
};
