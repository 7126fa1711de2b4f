//! Connection establishment error types.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while producing the session stream.
///
/// Every variant is fatal for the process: establishment is never retried.
#[derive(Error, Debug)]
pub enum EstablishError {
    /// Host name did not resolve to any usable address
    #[error("cannot resolve {host}:{port}")]
    Resolve {
        /// Configured host
        host: String,
        /// Configured port
        port: u16,
        /// Underlying resolver error, if any
        #[source]
        source: Option<io::Error>,
    },

    /// Socket could not be created or configured
    #[error("socket setup failed: {0}")]
    Socket(#[source] io::Error),

    /// Bind refused (port in use, permission denied, ...)
    #[error("bind to {addr} failed: {source}")]
    Bind {
        /// Address we tried to bind
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Listen call failed after a successful bind
    #[error("listen on {addr} failed: {source}")]
    Listen {
        /// Bound address
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Accept failed while waiting for the peer
    #[error("accept on {addr} failed: {source}")]
    Accept {
        /// Listening address
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Dial refused or peer unreachable
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// Address we dialed
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl EstablishError {
    /// The I/O error kind behind this failure, when there is one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            EstablishError::Resolve { source, .. } => source.as_ref().map(|e| e.kind()),
            EstablishError::Socket(e) => Some(e.kind()),
            EstablishError::Bind { source, .. }
            | EstablishError::Listen { source, .. }
            | EstablishError::Accept { source, .. }
            | EstablishError::Connect { source, .. } => Some(source.kind()),
        }
    }
}
