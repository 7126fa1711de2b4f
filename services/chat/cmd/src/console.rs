//! Console side of the chat: stdin lines in, session events out.

use anyhow::{Context, Result};
use chat_session::{EstablishError, Role, SessionEvent, SessionReport, QUIT_TOKEN};
use std::io::{BufRead, BufReader, Write};
use tokio::sync::mpsc;

/// Read lines from `reader` on a dedicated OS thread.
///
/// The thread blocks in `read_line` and cannot be interrupted; it is never
/// joined and simply dies with the process. The channel closes on EOF.
pub fn spawn_line_reader<R>(reader: R, capacity: usize) -> Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        crate::component_warn!("console", "Failed to read input: {}", e);
                        break;
                    }
                }
            }
            crate::component_debug!("console", "Input reader finished");
        })
        .context("failed to spawn console input thread")?;
    Ok(rx)
}

/// Stdin as a line channel
pub fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>> {
    spawn_line_reader(BufReader::new(std::io::stdin()), 16)
}

fn ready_prompt() -> String {
    format!("Enter a message or {} to quit", QUIT_TOKEN)
}

/// Diagnostic printed when the stream could not be established
pub fn establish_failure_message(role: Role) -> &'static str {
    match role {
        Role::Listener => "Cannot bind server",
        Role::Connector => "Cannot connect to server",
    }
}

/// Attach the user-facing diagnostic to an establishment failure
pub fn session_outcome(
    result: std::result::Result<SessionReport, EstablishError>,
    role: Role,
) -> Result<SessionReport> {
    result.context(establish_failure_message(role))
}

/// Lines shown to the user for one event
pub fn render(event: &SessionEvent) -> Vec<String> {
    match event {
        SessionEvent::Listening { endpoint, local } => vec![
            String::new(),
            format!("Server listening on {} port {}", endpoint.host, local.port()),
        ],
        SessionEvent::Connected {
            role: Role::Listener,
            peer,
            ..
        } => vec![
            format!("Connected to {} on port {}", peer.ip(), peer.port()),
            "Waiting for message...".to_string(),
        ],
        SessionEvent::Connected {
            role: Role::Connector,
            peer,
            ..
        } => vec![
            String::new(),
            format!("Connected to {} on port {}", peer.ip(), peer.port()),
            ready_prompt(),
        ],
        SessionEvent::MessageReceived { from, text } => vec![format!("{}: {}", from, text)],
        SessionEvent::ReadyToSend => vec![ready_prompt()],
        // No "peer left" notice on screen; logged only.
        SessionEvent::Disconnected { .. } => Vec::new(),
    }
}

/// Print events until every sender is gone
pub async fn render_events<W: Write>(
    mut events: mpsc::Receiver<SessionEvent>,
    mut out: W,
) -> std::io::Result<()> {
    while let Some(event) = events.recv().await {
        if let SessionEvent::Disconnected { trigger } = &event {
            crate::component_info!("console", "Session closed: {}", trigger);
        }
        for line in render(&event) {
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_session::{Endpoint, ShutdownTrigger};
    use std::io::Cursor;
    use std::net::SocketAddr;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_listener_screens() {
        let listening = render(&SessionEvent::Listening {
            endpoint: Endpoint::new("localhost", 15777),
            local: addr("127.0.0.1:15777"),
        });
        assert_eq!(listening, vec!["", "Server listening on localhost port 15777"]);

        let connected = render(&SessionEvent::Connected {
            role: Role::Listener,
            peer: addr("127.0.0.1:50123"),
            local: addr("127.0.0.1:15777"),
        });
        assert_eq!(
            connected,
            vec!["Connected to 127.0.0.1 on port 50123", "Waiting for message..."]
        );

        let message = render(&SessionEvent::MessageReceived {
            from: Role::Listener.peer_label(),
            text: "hello".to_string(),
        });
        assert_eq!(message, vec!["Client: hello"]);
        assert_eq!(
            render(&SessionEvent::ReadyToSend),
            vec!["Enter a message or /q to quit"]
        );
    }

    #[test]
    fn test_connector_screens() {
        let connected = render(&SessionEvent::Connected {
            role: Role::Connector,
            peer: addr("127.0.0.1:15777"),
            local: addr("127.0.0.1:50123"),
        });
        assert_eq!(
            connected,
            vec![
                "",
                "Connected to 127.0.0.1 on port 15777",
                "Enter a message or /q to quit"
            ]
        );

        let message = render(&SessionEvent::MessageReceived {
            from: Role::Connector.peer_label(),
            text: "hi".to_string(),
        });
        assert_eq!(message, vec!["Server: hi"]);
    }

    #[test]
    fn test_disconnect_is_silent() {
        assert!(render(&SessionEvent::Disconnected {
            trigger: ShutdownTrigger::PeerClosed
        })
        .is_empty());
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(establish_failure_message(Role::Listener), "Cannot bind server");
        assert_eq!(
            establish_failure_message(Role::Connector),
            "Cannot connect to server"
        );
    }

    #[test]
    fn test_establish_failure_reported_once() {
        let bind = EstablishError::Bind {
            addr: addr("127.0.0.1:15777"),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        let err = session_outcome(Err(bind), Role::Listener).unwrap_err();

        assert_eq!(err.to_string(), "Cannot bind server");
        let report = format!("{:?}", err);
        assert!(report.starts_with("Cannot bind server"));
        assert_eq!(report.matches("bind to 127.0.0.1:15777").count(), 1);
    }

    #[tokio::test]
    async fn test_line_reader_delivers_lines_then_closes() {
        let mut rx = spawn_line_reader(Cursor::new("hello\n  /q  \nlast"), 4).unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx.recv().await.as_deref(), Some("  /q  "));
        assert_eq!(rx.recv().await.as_deref(), Some("last"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_render_events_until_closed() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(SessionEvent::MessageReceived {
            from: "Client",
            text: "one".to_string(),
        })
        .await
        .unwrap();
        tx.send(SessionEvent::ReadyToSend).await.unwrap();
        tx.send(SessionEvent::Disconnected {
            trigger: ShutdownTrigger::LocalQuit,
        })
        .await
        .unwrap();
        drop(tx);

        let mut out = Vec::new();
        render_events(rx, &mut out).await.unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Client: one\nEnter a message or /q to quit\n"
        );
    }
}
