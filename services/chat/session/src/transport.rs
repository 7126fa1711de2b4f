//! TCP transport and connection establishment for chat sessions.
//!
//! Both roles produce the same thing: one open duplex [`TcpStream`] to one
//! peer. The listener role binds (with address reuse), listens with a backlog
//! of one and accepts a single peer; the connector role dials. Neither retries.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::EstablishError;
use crate::session::SessionEvent;

/// Port used when nothing else is configured
pub const DEFAULT_PORT: u16 = 15777;

/// Host used when nothing else is configured
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Pending connections the listener will queue; one peer per process.
pub const LISTEN_BACKLOG: u32 = 1;

/// Host and port of the chat endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve to a socket address, preferring IPv4
    pub async fn resolve(&self) -> Result<SocketAddr, EstablishError> {
        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| EstablishError::Resolve {
                host: self.host.clone(),
                port: self.port,
                source: Some(e),
            })?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| EstablishError::Resolve {
                host: self.host.clone(),
                port: self.port,
                source: None,
            })
    }
}

/// Which side of the conversation this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Binds, listens and accepts one peer ("server")
    Listener,
    /// Dials the listener ("client")
    Connector,
}

impl Role {
    /// Label shown in front of text received from the peer
    pub fn peer_label(self) -> &'static str {
        match self {
            Role::Listener => "Client",
            Role::Connector => "Server",
        }
    }

    /// Whether the one-time "ready to send" prompt follows the first message
    pub fn announces_ready(self) -> bool {
        matches!(self, Role::Listener)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Listener => f.write_str("listener"),
            Role::Connector => f.write_str("connector"),
        }
    }
}

/// Result of a successful establishment
#[derive(Debug)]
pub struct Established {
    /// The duplex stream to the peer
    pub stream: TcpStream,
    /// Remote address
    pub peer: SocketAddr,
    /// Local address of the stream
    pub local: SocketAddr,
    /// Listening socket, kept until shutdown (listener role only)
    pub listener: Option<TcpListener>,
}

/// Strategy producing the session stream.
#[async_trait]
pub trait Establisher: Send + Sync {
    /// Role this strategy implements
    fn role(&self) -> Role;

    /// Block until one stream is open, or fail.
    async fn establish(
        &self,
        events: &mpsc::Sender<SessionEvent>,
    ) -> Result<Established, EstablishError>;
}

/// Listener role: bind + listen(1) + accept
#[derive(Debug, Clone)]
pub struct Acceptor {
    endpoint: Endpoint,
}

impl Acceptor {
    /// Create an acceptor for `endpoint`
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Establisher for Acceptor {
    fn role(&self) -> Role {
        Role::Listener
    }

    async fn establish(
        &self,
        events: &mpsc::Sender<SessionEvent>,
    ) -> Result<Established, EstablishError> {
        let addr = self.endpoint.resolve().await?;
        let listener = listen_tcp(addr)?;
        let local = listener.local_addr().map_err(EstablishError::Socket)?;
        info!("Listening on {} (backlog {})", local, LISTEN_BACKLOG);

        events
            .send(SessionEvent::Listening {
                endpoint: self.endpoint.clone(),
                local,
            })
            .await
            .ok();

        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|source| EstablishError::Accept { addr: local, source })?;
        info!(peer = %peer, "Accepted connection");

        let local = stream.local_addr().map_err(EstablishError::Socket)?;
        Ok(Established {
            stream,
            peer,
            local,
            listener: Some(listener),
        })
    }
}

/// Connector role: dial
#[derive(Debug, Clone)]
pub struct Dialer {
    endpoint: Endpoint,
}

impl Dialer {
    /// Create a dialer for `endpoint`
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Establisher for Dialer {
    fn role(&self) -> Role {
        Role::Connector
    }

    async fn establish(
        &self,
        _events: &mpsc::Sender<SessionEvent>,
    ) -> Result<Established, EstablishError> {
        let addr = self.endpoint.resolve().await?;
        info!("Attempting to connect to {}", addr);

        let stream = connect_tcp(addr).await?;
        let peer = stream.peer_addr().map_err(EstablishError::Socket)?;
        let local = stream.local_addr().map_err(EstablishError::Socket)?;
        info!(peer = %peer, "TCP connection established");

        Ok(Established {
            stream,
            peer,
            local,
            listener: None,
        })
    }
}

fn new_socket(addr: SocketAddr) -> Result<TcpSocket, EstablishError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    };
    socket.map_err(EstablishError::Socket)
}

/// Create a TCP listener bound to `addr` with address reuse and a backlog of one
pub fn listen_tcp(addr: SocketAddr) -> Result<TcpListener, EstablishError> {
    let socket = new_socket(addr)?;
    // Must be set before bind so a restarted listener can reclaim the port.
    socket.set_reuseaddr(true).map_err(EstablishError::Socket)?;
    socket
        .bind(addr)
        .map_err(|source| EstablishError::Bind { addr, source })?;
    debug!("Bound {}", addr);

    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|source| EstablishError::Listen { addr, source })
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> Result<TcpStream, EstablishError> {
    new_socket(addr)?
        .connect(addr)
        .await
        .map_err(|source| EstablishError::Connect { addr, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn start_acceptor(
        endpoint: Endpoint,
    ) -> (
        SocketAddr,
        tokio::task::JoinHandle<Result<Established, EstablishError>>,
    ) {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(async move { Acceptor::new(endpoint).establish(&tx).await });

        match timeout(Duration::from_secs(2), rx.recv()).await.unwrap() {
            Some(SessionEvent::Listening { local, .. }) => (local, handle),
            other => panic!("Expected Listening event, got {:?}", other),
        }
    }

    #[test]
    fn test_role_labels() {
        assert_eq!(Role::Listener.peer_label(), "Client");
        assert_eq!(Role::Connector.peer_label(), "Server");
        assert!(Role::Listener.announces_ready());
        assert!(!Role::Connector.announces_ready());
    }

    #[test]
    fn test_default_endpoint() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.port, 15777);
        assert_eq!(endpoint.to_string(), "127.0.0.1:15777");
    }

    #[tokio::test]
    async fn test_resolve_prefers_ipv4() {
        let addr = Endpoint::new("localhost", 4000).resolve().await.unwrap();
        assert_eq!(addr.port(), 4000);
        assert!(addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn test_listener_and_connector_pair_up() {
        let (local, accept) = start_acceptor(Endpoint::new("127.0.0.1", 0)).await;

        let (tx, _rx) = mpsc::channel(4);
        let dialer = Dialer::new(Endpoint::new("127.0.0.1", local.port()));
        assert_eq!(dialer.role(), Role::Connector);
        let dialed = timeout(Duration::from_secs(2), dialer.establish(&tx))
            .await
            .unwrap()
            .unwrap();

        let accepted = timeout(Duration::from_secs(2), accept)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(accepted.peer, dialed.local);
        assert_eq!(dialed.peer, local);
        assert!(accepted.listener.is_some());
        assert!(dialed.listener.is_none());
    }

    #[tokio::test]
    async fn test_bind_fails_when_port_in_use() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let (tx, mut rx) = mpsc::channel(4);
        let err = Acceptor::new(Endpoint::new("127.0.0.1", port))
            .establish(&tx)
            .await
            .unwrap_err();

        assert!(matches!(err, EstablishError::Bind { .. }), "got {err}");
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::AddrInUse));
        // never announced as listening
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };

        let (tx, _rx) = mpsc::channel(4);
        let err = Dialer::new(Endpoint::new("127.0.0.1", port))
            .establish(&tx)
            .await
            .unwrap_err();
        assert!(matches!(err, EstablishError::Connect { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_listener_rebinds_after_previous_session() {
        let (local, accept) = start_acceptor(Endpoint::new("127.0.0.1", 0)).await;
        let client = TcpStream::connect(local).await.unwrap();
        let accepted = accept.await.unwrap().unwrap();

        // Listener side closes first, leaving its end in TIME_WAIT.
        drop(accepted);
        drop(client);

        let (again, accept) = start_acceptor(Endpoint::new("127.0.0.1", local.port())).await;
        assert_eq!(again.port(), local.port());
        accept.abort();
    }
}
