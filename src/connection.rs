use crate::error::{LanLightError, Result};
use crate::protocol::{Command, Reply};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Network location of a device, shared between the device and its connection task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub online: bool,
}

/// Command channel to one device
///
/// Commands are queued without blocking; a background task owns the TCP
/// stream and (re)connects to whatever the shared endpoint says at send time.
pub struct Connection {
    tx: mpsc::UnboundedSender<Command>,
}

impl Connection {
    /// Spawn the connection task for a device
    ///
    /// Outside a tokio runtime no task can be spawned; the connection is
    /// then closed from the start and every send fails.
    pub fn spawn(device_id: String, endpoint: Arc<Mutex<Endpoint>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run(device_id, endpoint, rx));
            }
            Err(_) => {
                tracing::warn!("No tokio runtime, commands to {} will be dropped", device_id);
            }
        }

        Self { tx }
    }

    /// Queue a command without waiting for the device to answer
    pub fn send_only(&self, command: Command) -> Result<()> {
        tracing::debug!("Queueing {} (id {})", command.method, command.id);
        self.tx
            .send(command)
            .map_err(|_| LanLightError::ConnectionClosed)
    }

    /// Whether the background task is still accepting commands
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Link {
    peer: (String, u16),
    writer: OwnedWriteHalf,
}

async fn run(
    device_id: String,
    endpoint: Arc<Mutex<Endpoint>>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut link: Option<Link> = None;

    while let Some(command) = rx.recv().await {
        let line = match command.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode {} for {}: {}", command.method, device_id, e);
                continue;
            }
        };

        let peer = {
            let ep = lock(&endpoint);
            (ep.address.clone(), ep.port)
        };

        // The device may have moved since the last rediscovery
        if link.as_ref().is_some_and(|l| l.peer != peer) {
            tracing::info!("{} moved to {}:{}, reconnecting", device_id, peer.0, peer.1);
            link = None;
        }

        if link.is_none() {
            match connect(&device_id, &peer).await {
                Ok(writer) => link = Some(Link { peer: peer.clone(), writer }),
                Err(e) => {
                    tracing::warn!(
                        "Failed to connect to {} at {}:{}: {}",
                        device_id,
                        peer.0,
                        peer.1,
                        e
                    );
                    lock(&endpoint).online = false;
                    continue;
                }
            }
        }

        if let Some(active) = link.as_mut() {
            tracing::debug!("Sending to {}: {}", device_id, line.trim_end());
            if let Err(e) = active.writer.write_all(line.as_bytes()).await {
                tracing::warn!("Failed to send {} to {}: {}", command.method, device_id, e);
                lock(&endpoint).online = false;
                link = None;
            }
        }
    }

    tracing::debug!("Connection task for {} exiting", device_id);
}

async fn connect(device_id: &str, peer: &(String, u16)) -> Result<OwnedWriteHalf> {
    if peer.0.is_empty() {
        return Err(LanLightError::InvalidLocation(format!("{} has no address", device_id)));
    }

    tracing::info!("Connecting to {} at {}:{}", device_id, peer.0, peer.1);
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((peer.0.as_str(), peer.1)))
        .await
        .map_err(|_| {
            LanLightError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        })??;

    let (read, write) = stream.into_split();

    let device_id = device_id.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(read).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match serde_json::from_str::<Reply>(&line) {
                    Ok(reply) if reply.has_error() => {
                        tracing::warn!(
                            "{} rejected command {:?}: {:?}",
                            device_id,
                            reply.id,
                            reply.error
                        );
                    }
                    Ok(reply) => {
                        tracing::debug!("Reply from {}: {:?}", device_id, reply);
                    }
                    Err(e) => {
                        tracing::debug!("Unparseable line from {}: {} ({})", device_id, line, e);
                    }
                },
                Ok(None) => {
                    tracing::info!("{} closed the connection", device_id);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Read error from {}: {}", device_id, e);
                    break;
                }
            }
        }
    });

    Ok(write)
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_commands_written_as_json_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let endpoint = Arc::new(Mutex::new(Endpoint {
            address: "127.0.0.1".to_string(),
            port,
            online: true,
        }));
        let conn = Connection::spawn("bulb1".to_string(), endpoint.clone());
        conn.send_only(Command::new(1, "toggle")).unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let line = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line, r#"{"id":1,"method":"toggle","params":[]}"#);
        assert!(lock(&endpoint).online);
    }

    #[tokio::test]
    async fn test_unreachable_device_marked_offline() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Arc::new(Mutex::new(Endpoint {
            address: "127.0.0.1".to_string(),
            port,
            online: true,
        }));
        let conn = Connection::spawn("bulb2".to_string(), endpoint.clone());
        conn.send_only(Command::new(1, "toggle")).unwrap();

        for _ in 0..100 {
            if !lock(&endpoint).online {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!lock(&endpoint).online);
    }

    #[test]
    fn test_send_without_runtime_fails() {
        let endpoint = Arc::new(Mutex::new(Endpoint::default()));
        let conn = Connection::spawn("bulb3".to_string(), endpoint);
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send_only(Command::new(1, "toggle")),
            Err(LanLightError::ConnectionClosed)
        ));
    }
}
